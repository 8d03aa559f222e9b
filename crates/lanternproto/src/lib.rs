//! Control protocol and service runtime for the lantern workers.
//!
//! The lantern manager supervises each worker over a private PAIR channel
//! carrying four message types: ENABLE, KILL, SETTINGS and STATE. This crate
//! owns both ends of that conversation:
//!
//! - [`message`] / [`state`] / [`settings`] - the wire types
//! - [`channel`] - the PAIR transport with blocking and non-blocking reads
//! - [`service`] - the worker-side control loop ([`ServiceRuntime`]) and the
//!   hook trait domain workers implement ([`Service`])
//! - [`connector`] - the manager-side handle ([`ServiceConnector`]) with its
//!   background state listener
//! - [`timer`] - the drift-correcting pacer workers use between runs
//!
//! The worker loop is deliberately single threaded: control messages are
//! only observed between units of work, during blocking waits, or between
//! the increments of a safe delay, so worker state needs no locking. The
//! only shared state in the system is the connector's cached [`ServiceState`]
//! behind a mutex.

pub mod channel;
pub mod connector;
pub mod message;
pub mod service;
pub mod settings;
pub mod state;
pub mod timer;

pub use channel::{ChannelError, ControlChannel};
pub use connector::{ConnectorError, ServiceConnector};
pub use message::{MessageKind, ProtocolError, ServiceMessage};
pub use service::{
    RuntimeError, Service, ServiceContext, ServiceError, ServiceOptions, ServiceRuntime,
    SettingUnit,
};
pub use settings::{keys, SettingsError, SettingsSnapshot};
pub use state::{ServiceState, StatusValue};
pub use timer::DelayTimer;
