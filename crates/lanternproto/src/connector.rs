//! The manager-side handle for one supervised worker.
//!
//! A connector binds the channel endpoint the worker connects back to,
//! offers fire-and-forget control sends, and runs a background listener
//! thread that keeps the last reported [`ServiceState`] available without
//! ever blocking the manager.
//!
//! There is no heartbeat: a worker that dies without a word just stops
//! producing STATE messages. [`last_update_age`](ServiceConnector::last_update_age)
//! exposes how long that silence has lasted so callers can apply their own
//! staleness policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::channel::{ChannelError, ControlChannel};
use crate::message::ServiceMessage;
use crate::settings::SettingsSnapshot;
use crate::state::ServiceState;

/// How long the listener blocks per poll; bounds how quickly `stop` and
/// foreground sends get the channel back.
const LISTEN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("failed to spawn state listener: {0}")]
    Listener(#[from] std::io::Error),

    #[error("worker reported no state within {0:?}")]
    ReadyTimeout(Duration),
}

#[derive(Debug)]
struct Observed {
    state: ServiceState,
    updates: u64,
    last_update: Option<Instant>,
}

struct Shared {
    observed: Mutex<Observed>,
    ready: Condvar,
    stop: AtomicBool,
}

/// Supervisor handle: one per worker process.
pub struct ServiceConnector {
    channel: Arc<Mutex<ControlChannel>>,
    endpoint: String,
    shared: Arc<Shared>,
    listener: Option<JoinHandle<()>>,
}

impl ServiceConnector {
    /// Bind a fresh endpoint and start the state listener.
    pub fn bind() -> Result<Self, ConnectorError> {
        let channel = ControlChannel::bind()?;
        let endpoint = channel.endpoint().to_string();
        let channel = Arc::new(Mutex::new(channel));

        let shared = Arc::new(Shared {
            observed: Mutex::new(Observed {
                state: ServiceState::idle(),
                updates: 0,
                last_update: None,
            }),
            ready: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let listener = {
            let channel = Arc::clone(&channel);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("lantern-state-listener".into())
                .spawn(move || listen(channel, shared))?
        };

        Ok(Self {
            channel,
            endpoint,
            shared,
            listener: Some(listener),
        })
    }

    /// The address the spawned worker must connect back to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Signal the worker to start or stop its domain activity.
    pub fn enable(&self, enable: bool) -> Result<(), ConnectorError> {
        self.send(&ServiceMessage::Enable(enable))
    }

    /// Signal the worker to shut down. Terminal for the worker.
    pub fn shutdown(&self) -> Result<(), ConnectorError> {
        self.send(&ServiceMessage::Kill)
    }

    /// Push a complete settings snapshot.
    pub fn update_settings(&self, snapshot: &SettingsSnapshot) -> Result<(), ConnectorError> {
        self.send(&ServiceMessage::Settings(snapshot.clone()))
    }

    /// The last state the worker reported. Never blocks on the worker.
    pub fn state(&self) -> ServiceState {
        self.lock_observed().state.clone()
    }

    /// Time since the last STATE message, if any arrived yet. A long
    /// silence from an enabled worker is the only crash signal there is.
    pub fn last_update_age(&self) -> Option<Duration> {
        self.lock_observed().last_update.map(|t| t.elapsed())
    }

    /// Block until the worker's first STATE message confirms it started.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<ServiceState, ConnectorError> {
        let guard = self.lock_observed();
        let (guard, result) = self
            .shared
            .ready
            .wait_timeout_while(guard, timeout, |obs| obs.updates == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && guard.updates == 0 {
            return Err(ConnectorError::ReadyTimeout(timeout));
        }
        Ok(guard.state.clone())
    }

    /// Stop the listener thread. Called automatically on drop.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
    }

    fn send(&self, msg: &ServiceMessage) -> Result<(), ConnectorError> {
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channel.send(msg)?;
        Ok(())
    }

    fn lock_observed(&self) -> std::sync::MutexGuard<'_, Observed> {
        self.shared
            .observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ServiceConnector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen(channel: Arc<Mutex<ControlChannel>>, shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        // Hold the channel only for one bounded poll so foreground sends
        // interleave with the listener.
        let received = {
            let channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
            channel.recv_timeout(LISTEN_POLL)
        };
        match received {
            Ok(Some(ServiceMessage::State(state))) => {
                debug!(%state, "state received");
                let mut observed = shared
                    .observed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                observed.state = state;
                observed.updates += 1;
                observed.last_update = Some(Instant::now());
                shared.ready.notify_all();
            }
            Ok(Some(other)) => {
                warn!(kind = ?other.kind(), "unexpected message on supervisor channel");
            }
            Ok(None) => {}
            Err(e) => {
                // A broken channel cannot recover; leave the cached state
                // as the last word from the worker.
                error!(error = %e, "state listener stopping on channel failure");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_defaults_to_idle_before_any_report() {
        let connector = ServiceConnector::bind().unwrap();
        assert_eq!(connector.state(), ServiceState::idle());
        assert!(connector.last_update_age().is_none());
    }

    #[test]
    fn listener_caches_latest_state() {
        let mut connector = ServiceConnector::bind().unwrap();
        let worker = ControlChannel::connect(connector.endpoint()).unwrap();

        let reported = ServiceState {
            enabled: true,
            shutting_down: false,
            value: Some(1),
            msg: None,
        };
        worker.send(&ServiceMessage::State(reported.clone())).unwrap();

        let ready = connector.wait_until_ready(Duration::from_secs(2)).unwrap();
        assert_eq!(ready, reported);
        assert_eq!(connector.state(), reported);
        assert!(connector.last_update_age().is_some());
        connector.stop();
    }

    #[test]
    fn ready_wait_times_out_without_a_worker() {
        let connector = ServiceConnector::bind().unwrap();
        let err = connector
            .wait_until_ready(Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ReadyTimeout(_)));
    }

    #[test]
    fn sends_reach_the_worker_while_listening() {
        let connector = ServiceConnector::bind().unwrap();
        let worker = ControlChannel::connect(connector.endpoint()).unwrap();

        connector.enable(true).unwrap();
        connector.shutdown().unwrap();

        assert_eq!(worker.recv().unwrap(), ServiceMessage::Enable(true));
        assert_eq!(worker.recv().unwrap(), ServiceMessage::Kill);
    }
}
