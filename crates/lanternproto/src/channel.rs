//! The point-to-point control channel.
//!
//! One PAIR socket per worker, bound by the manager on an ephemeral
//! localhost port and connected to by the worker process. Messages are
//! newline-free JSON strings, one per zmq frame, so ordering per direction
//! comes straight from the socket.
//!
//! Error policy follows the control loop's needs: a non-blocking read that
//! fails is reported as "no message" (the worker must keep ticking), while
//! a failure on a blocking operation is fatal for the endpoint.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::message::{MessageKind, ProtocolError, ServiceMessage};

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel transport failure: {0}")]
    Transport(#[from] zmq::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("bound endpoint has no printable address")]
    Endpoint,
}

/// One endpoint of the manager <-> worker channel.
pub struct ControlChannel {
    socket: zmq::Socket,
    endpoint: String,
    // Sockets borrow from the context; keep it alive for the channel's lifetime.
    _context: zmq::Context,
}

impl ControlChannel {
    /// Manager side: bind a fresh PAIR endpoint on an ephemeral localhost
    /// port. The resulting [`endpoint`](Self::endpoint) is passed to the
    /// spawned worker.
    pub fn bind() -> Result<Self, ChannelError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::PAIR)?;
        socket.set_linger(0)?;
        socket.bind("tcp://127.0.0.1:*")?;
        let endpoint = socket
            .get_last_endpoint()?
            .map_err(|_| ChannelError::Endpoint)?;
        debug!(endpoint, "control channel bound");
        Ok(Self {
            socket,
            endpoint,
            _context: context,
        })
    }

    /// Worker side: connect back to the manager's endpoint.
    pub fn connect(endpoint: &str) -> Result<Self, ChannelError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::PAIR)?;
        socket.set_linger(0)?;
        socket.connect(endpoint)?;
        debug!(endpoint, "control channel connected");
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
            _context: context,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queue a message for the peer. Does not wait for delivery.
    pub fn send(&self, msg: &ServiceMessage) -> Result<(), ChannelError> {
        let raw = msg.encode()?;
        self.socket.send(raw.as_str(), 0)?;
        Ok(())
    }

    /// Block until the next message arrives. A transport failure here is
    /// fatal for the endpoint.
    pub fn recv(&self) -> Result<ServiceMessage, ChannelError> {
        let raw = self.recv_raw(0)?;
        Ok(ServiceMessage::decode(&raw)?)
    }

    /// Block until a message of `kind` arrives, discarding anything else.
    pub fn recv_matching(&self, kind: MessageKind) -> Result<ServiceMessage, ChannelError> {
        loop {
            let msg = self.recv()?;
            if msg.kind() == kind {
                return Ok(msg);
            }
            debug!(want = ?kind, got = ?msg.kind(), "discarding non-matching message");
        }
    }

    /// Non-blocking read. Nothing queued, and any transport-level failure,
    /// both come back as `None`; an undecodable frame is still an error.
    pub fn try_recv(&self) -> Result<Option<ServiceMessage>, ChannelError> {
        match self.socket.recv_string(zmq::DONTWAIT) {
            Ok(Ok(raw)) => Ok(Some(ServiceMessage::decode(&raw)?)),
            Ok(Err(_)) => Err(ChannelError::Protocol(ProtocolError::Payload {
                kind: MessageKind::Other(0),
                detail: "frame is not UTF-8".into(),
            })),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => {
                warn!(error = %e, "non-blocking read failed, treating as no message");
                Ok(None)
            }
        }
    }

    /// Wait up to `timeout` for a message. Used by the connector's listener
    /// so it can observe its stop flag between polls.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<ServiceMessage>, ChannelError> {
        let events = self
            .socket
            .poll(zmq::POLLIN, timeout.as_millis() as i64)?;
        if events == 0 {
            return Ok(None);
        }
        self.try_recv()
    }

    fn recv_raw(&self, flags: i32) -> Result<String, ChannelError> {
        match self.socket.recv_string(flags)? {
            Ok(raw) => Ok(raw),
            Err(_) => Err(ChannelError::Protocol(ProtocolError::Payload {
                kind: MessageKind::Other(0),
                detail: "frame is not UTF-8".into(),
            })),
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
