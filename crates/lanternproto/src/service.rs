//! The worker-side control loop.
//!
//! A worker process is a [`Service`] implementation driven by a
//! [`ServiceRuntime`]. The runtime owns the control channel and the
//! lifecycle flags; the service owns the domain work. Control messages are
//! observed at three points only: while blocked waiting for work to be
//! enabled, at the check after each unit of work, and between the
//! increments of a safe delay. There is no preemption, which is what lets
//! worker state live without locks.
//!
//! Lifecycle: a worker that requires settings stays uninitialized until the
//! first SETTINGS message, then runs its one-time setup. An ENABLE received
//! before that point is remembered and applied once setup completes. KILL
//! is terminal: the shutting-down flag is set once, the disable and
//! shutdown hooks run, and the loop exits; later ENABLE/SETTINGS messages
//! are not processed.

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ControlChannel};
use crate::message::ServiceMessage;
use crate::settings::{SettingsError, SettingsSnapshot};
use crate::state::ServiceState;

/// Failure modes a service hook may report.
///
/// `Recoverable` is for expected, retryable conditions (the LED server is
/// unreachable, the analyser stalled): the runtime records it in the
/// reported state and retries after a safe delay. Anything else is fatal
/// and ends the worker process.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{message}")]
    Recoverable { value: i64, message: String },

    #[error(transparent)]
    Fatal(Box<dyn std::error::Error + Send + Sync>),
}

impl ServiceError {
    pub fn recoverable(value: impl Into<i64>, message: impl Into<String>) -> Self {
        ServiceError::Recoverable {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn fatal(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ServiceError::Fatal(err.into())
    }
}

impl From<ChannelError> for ServiceError {
    fn from(e: ChannelError) -> Self {
        ServiceError::Fatal(Box::new(e))
    }
}

/// Errors that end the worker's run loop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("control channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("service hook failed: {0}")]
    Service(#[from] ServiceError),
}

/// The hook set a domain worker implements.
///
/// All hooks receive a [`ServiceContext`] for setting reads, state
/// reporting and custom sends. Defaults are no-ops so a worker only
/// implements what it needs; `run_once` is the one mandatory hook.
pub trait Service {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Setting units in evaluation order. Collected once at construction.
    fn setting_units(&self) -> Vec<SettingUnit> {
        Vec::new()
    }

    /// One-time initialization, run after the first settings are known
    /// (or immediately when the worker does not require settings).
    fn setup(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Start or stop the domain activity. Only invoked on actual
    /// transitions, and only once the worker is initialized.
    fn set_enabled(
        &mut self,
        _ctx: &mut ServiceContext<'_>,
        _enable: bool,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Release resources before the process exits. Runs exactly once.
    fn on_shutdown(&mut self, _ctx: &mut ServiceContext<'_>) {}

    /// One unit of periodic domain work.
    fn run_once(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError>;

    /// A setting unit's bound keys changed; `unit` is the unit's name.
    fn settings_changed(&mut self, _ctx: &mut ServiceContext<'_>, _unit: &str) {}

    /// A message with a non-standard type code arrived.
    fn handle_message(&mut self, _ctx: &mut ServiceContext<'_>, _msg: ServiceMessage) {}
}

/// A named group of bound setting keys with an optional change callback.
///
/// Units are checked against each incoming snapshot in registration order.
/// When any bound key's value differs from the currently applied one, every
/// bound key present in the snapshot is copied over (full overwrite) and,
/// for units registered with a callback, `settings_changed` fires once with
/// the unit's name. A later unit's callback may read values applied by an
/// earlier unit in the same pass.
#[derive(Debug, Clone)]
pub struct SettingUnit {
    name: &'static str,
    keys: Vec<&'static str>,
    notify: bool,
}

impl SettingUnit {
    pub fn new(name: &'static str, keys: &[&'static str]) -> Self {
        Self {
            name,
            keys: keys.to_vec(),
            notify: false,
        }
    }

    /// Fire `settings_changed` for this unit on every applied change.
    pub fn with_callback(mut self) -> Self {
        self.notify = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn has_changes(&self, applied: &SettingsSnapshot, snapshot: &SettingsSnapshot) -> bool {
        self.keys.iter().any(|key| match snapshot.get(key) {
            Some(value) => applied.get(key) != Some(value),
            None => false,
        })
    }
}

/// Runtime knobs, with the defaults the shipped workers use.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Defer setup until the first SETTINGS message.
    pub require_settings: bool,
    /// Upper bound on each sleep inside a safe delay, and therefore on the
    /// extra shutdown latency a backoff can add.
    pub safe_delay_increment: Duration,
    /// Pause after a recoverable `run_once` failure.
    pub error_backoff: Duration,
    /// Status value for the very first STATE message.
    pub initial_status: Option<i64>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            require_settings: false,
            safe_delay_increment: Duration::from_millis(500),
            error_backoff: Duration::from_secs(5),
            initial_status: None,
        }
    }
}

/// Lifecycle flags plus the last state actually sent, so redundant STATE
/// messages are suppressed.
#[derive(Debug)]
struct StateTracker {
    enabled: bool,
    shutting_down: bool,
    value: Option<i64>,
    last_sent: Option<ServiceState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            enabled: false,
            shutting_down: false,
            value: None,
            last_sent: None,
        }
    }

    /// Send the current state if it differs from the last one sent.
    /// `value` carries over from the previous report when `None`; `msg`
    /// does not.
    fn publish(
        &mut self,
        channel: &ControlChannel,
        value: Option<i64>,
        msg: Option<String>,
    ) -> Result<(), ChannelError> {
        if let Some(v) = value {
            self.value = Some(v);
        }
        let state = ServiceState {
            enabled: self.enabled,
            shutting_down: self.shutting_down,
            value: self.value,
            msg,
        };
        if self.last_sent.as_ref() != Some(&state) {
            debug!(%state, "state updated");
            channel.send(&ServiceMessage::State(state.clone()))?;
            self.last_sent = Some(state);
        }
        Ok(())
    }
}

/// The surface hooks may touch: applied settings, state reporting, and the
/// raw channel for custom payloads.
pub struct ServiceContext<'a> {
    channel: &'a ControlChannel,
    tracker: &'a mut StateTracker,
    settings: &'a SettingsSnapshot,
}

impl ServiceContext<'_> {
    /// Typed read of an applied setting. Only keys bound by some unit are
    /// ever applied.
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Result<T, SettingsError> {
        self.settings.get_as(key)
    }

    /// The applied settings as a whole.
    pub fn settings(&self) -> &SettingsSnapshot {
        self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.tracker.enabled
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tracker.shutting_down
    }

    /// Report a status value and optional detail. Deduplicated: nothing is
    /// sent unless the resulting state differs from the last one sent.
    pub fn update_state(
        &mut self,
        value: Option<i64>,
        msg: Option<String>,
    ) -> Result<(), ServiceError> {
        self.tracker.publish(self.channel, value, msg)?;
        Ok(())
    }

    /// Send a custom message to the manager.
    pub fn send(&self, msg: &ServiceMessage) -> Result<(), ServiceError> {
        self.channel.send(msg)?;
        Ok(())
    }
}

struct Core {
    channel: ControlChannel,
    opts: ServiceOptions,
    units: Vec<SettingUnit>,
    applied: SettingsSnapshot,
    tracker: StateTracker,
    initialized: bool,
    name: &'static str,
}

impl Core {
    fn ctx(&mut self) -> ServiceContext<'_> {
        ServiceContext {
            channel: &self.channel,
            tracker: &mut self.tracker,
            settings: &self.applied,
        }
    }

    fn publish(&mut self, value: Option<i64>, msg: Option<String>) -> Result<(), RuntimeError> {
        self.tracker.publish(&self.channel, value, msg)?;
        Ok(())
    }

    fn handle_message<S: Service>(
        &mut self,
        service: &mut S,
        msg: ServiceMessage,
    ) -> Result<(), RuntimeError> {
        debug!(service = self.name, kind = ?msg.kind(), "control message");
        match msg {
            ServiceMessage::Enable(enable) => {
                if !self.tracker.shutting_down && enable != self.tracker.enabled {
                    self.set_enabled(service, enable)?;
                    self.publish(None, None)?;
                }
            }
            ServiceMessage::Kill => {
                if !self.tracker.shutting_down {
                    self.begin_shutdown(service);
                    self.publish(None, None)?;
                }
            }
            ServiceMessage::Settings(snapshot) => {
                if !self.tracker.shutting_down {
                    self.apply_settings(service, &snapshot);
                    if !self.initialized {
                        self.run_setup(service)?;
                    }
                }
            }
            ServiceMessage::State(state) => {
                // STATE flows worker -> manager only.
                warn!(service = self.name, %state, "ignoring STATE sent to worker");
            }
            custom @ ServiceMessage::Custom { .. } => {
                service.handle_message(&mut self.ctx(), custom);
            }
        }
        Ok(())
    }

    fn set_enabled<S: Service>(
        &mut self,
        service: &mut S,
        enable: bool,
    ) -> Result<(), RuntimeError> {
        self.tracker.enabled = enable;
        // A pending enable before setup is remembered; the hook fires once
        // setup completes.
        if self.initialized {
            service
                .set_enabled(&mut self.ctx(), enable)
                .map_err(RuntimeError::Service)?;
        }
        Ok(())
    }

    fn begin_shutdown<S: Service>(&mut self, service: &mut S) {
        info!(service = self.name, "shutdown requested");
        self.tracker.shutting_down = true;
        if self.tracker.enabled {
            self.tracker.enabled = false;
            if self.initialized {
                if let Err(e) = service.set_enabled(&mut self.ctx(), false) {
                    warn!(service = self.name, error = %e, "disable hook failed during shutdown");
                }
            }
        }
        service.on_shutdown(&mut self.ctx());
    }

    fn run_setup<S: Service>(&mut self, service: &mut S) -> Result<(), RuntimeError> {
        service
            .setup(&mut self.ctx())
            .map_err(RuntimeError::Service)?;
        self.initialized = true;
        info!(service = self.name, "service initialized");
        if self.tracker.enabled {
            service
                .set_enabled(&mut self.ctx(), true)
                .map_err(RuntimeError::Service)?;
        }
        Ok(())
    }

    fn apply_settings<S: Service>(&mut self, service: &mut S, snapshot: &SettingsSnapshot) {
        for i in 0..self.units.len() {
            if !self.units[i].has_changes(&self.applied, snapshot) {
                continue;
            }
            let (name, notify) = (self.units[i].name, self.units[i].notify);
            for key in self.units[i].keys.clone() {
                match snapshot.get(key) {
                    Some(value) => self.applied.insert(key, value.clone()),
                    None => warn!(service = self.name, key, "bound setting missing from snapshot"),
                }
            }
            debug!(service = self.name, unit = name, "setting unit updated");
            if notify {
                service.settings_changed(&mut self.ctx(), name);
            }
        }
    }

    fn safe_delay<S: Service>(
        &mut self,
        service: &mut S,
        total: Duration,
    ) -> Result<(), RuntimeError> {
        let increment = self.opts.safe_delay_increment;
        let mut remaining = total;
        while remaining > increment {
            std::thread::sleep(increment);
            remaining -= increment;

            if let Some(msg) = self.channel.try_recv()? {
                self.handle_message(service, msg)?;
            }
            if self.tracker.shutting_down {
                return Ok(());
            }
        }
        std::thread::sleep(remaining);
        Ok(())
    }
}

/// Drives a [`Service`] against the manager's control channel.
pub struct ServiceRuntime<S: Service> {
    core: Core,
    service: S,
}

impl<S: Service> ServiceRuntime<S> {
    /// Connect back to the manager's endpoint and report initial state.
    /// Unless `require_settings` is set, one-time setup runs here too.
    pub fn connect(
        endpoint: &str,
        service: S,
        opts: ServiceOptions,
    ) -> Result<Self, RuntimeError> {
        let channel = ControlChannel::connect(endpoint)?;
        Self::over(channel, service, opts)
    }

    /// Drive the service over an already-established channel.
    pub fn over(
        channel: ControlChannel,
        mut service: S,
        opts: ServiceOptions,
    ) -> Result<Self, RuntimeError> {
        let units = service.setting_units();
        let initial_status = opts.initial_status;
        let mut core = Core {
            channel,
            opts,
            units,
            applied: SettingsSnapshot::new(),
            tracker: StateTracker::new(),
            initialized: false,
            name: service.name(),
        };
        core.publish(initial_status, None)?;

        if !core.opts.require_settings {
            core.run_setup(&mut service)?;
        }
        Ok(Self { core, service })
    }

    /// The service loop. Returns when a KILL has been processed, or with
    /// the fatal error that ended the worker.
    pub fn run(mut self) -> Result<(), RuntimeError> {
        info!(service = self.core.name, "service loop starting");
        while !self.core.tracker.shutting_down {
            let msg = if self.core.tracker.enabled && self.core.initialized {
                let worked = self.service.run_once(&mut self.core.ctx());
                match worked {
                    Ok(()) => {}
                    Err(ServiceError::Recoverable { value, message }) => {
                        warn!(
                            service = self.core.name,
                            error = %message,
                            "recoverable failure, backing off"
                        );
                        self.core.publish(Some(value), Some(message))?;
                        let backoff = self.core.opts.error_backoff;
                        self.core.safe_delay(&mut self.service, backoff)?;
                        if self.core.tracker.shutting_down {
                            break;
                        }
                    }
                    Err(fatal) => return Err(RuntimeError::Service(fatal)),
                }
                // Disabled costs nothing; enabled costs one check per tick.
                self.core.channel.try_recv()?
            } else {
                Some(self.core.channel.recv()?)
            };

            if let Some(msg) = msg {
                self.core.handle_message(&mut self.service, msg)?;
            }
        }
        info!(service = self.core.name, "service loop exited");
        Ok(())
    }
}
