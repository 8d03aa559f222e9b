//! Worker process supervision.
//!
//! The manager binds one control channel per worker, launches the worker
//! executable with the endpoint to connect back to, and from then on only
//! talks through the connector: settings snapshots and enable flags go
//! down, state observations come back. Worker stdout/stderr are inherited;
//! workers do their own tracing.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lanternconf::LanternConfig;
use lanternproto::{ServiceConnector, ServiceState};
use tracing::{info, warn};

/// How long a freshly spawned worker gets to report its first state.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for a worker to exit before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// The workers this daemon supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceId {
    Capture,
    Audio,
}

impl ServiceId {
    pub const ALL: [ServiceId; 2] = [ServiceId::Capture, ServiceId::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Capture => "capture",
            ServiceId::Audio => "audio",
        }
    }

    /// Name of the worker executable, expected next to `lanternd` (or under
    /// `LANTERN_WORKER_DIR` when set).
    pub fn executable(&self) -> &'static str {
        match self {
            ServiceId::Capture => "lantern-capture",
            ServiceId::Audio => "lantern-audio",
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locate a worker executable: `LANTERN_WORKER_DIR` when set, otherwise
/// the directory the current executable lives in.
pub fn resolve_worker(id: ServiceId) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LANTERN_WORKER_DIR") {
        return Ok(PathBuf::from(dir).join(id.executable()));
    }
    let exe = std::env::current_exe().context("cannot locate current executable")?;
    let dir = exe
        .parent()
        .context("current executable has no parent directory")?;
    Ok(dir.join(id.executable()))
}

struct Supervised {
    connector: ServiceConnector,
    child: Child,
}

/// Owns the configuration and all supervised workers.
pub struct ServiceManager {
    config: LanternConfig,
    services: Vec<(ServiceId, Supervised)>,
}

impl ServiceManager {
    pub fn new(config: LanternConfig) -> Self {
        Self {
            config,
            services: Vec::new(),
        }
    }

    pub fn config(&self) -> &LanternConfig {
        &self.config
    }

    /// Spawn every worker, push the initial settings, and apply the
    /// configured enable flags.
    pub fn start(&mut self) -> Result<()> {
        for id in ServiceId::ALL {
            let program = resolve_worker(id)?;
            self.spawn_with(id, &program)?;
        }
        self.push_settings()?;

        if self.config.capture.enabled {
            self.enable(ServiceId::Capture, true)?;
        }
        if self.config.audio.enabled {
            self.enable(ServiceId::Audio, true)?;
        }
        Ok(())
    }

    /// Spawn one worker from an explicit executable path and wait for its
    /// readiness handshake (the first STATE message).
    pub fn spawn_with(&mut self, id: ServiceId, program: &Path) -> Result<()> {
        let connector = ServiceConnector::bind()?;
        info!(
            service = %id,
            program = %program.display(),
            endpoint = connector.endpoint(),
            "spawning worker"
        );
        let mut child = Command::new(program)
            .arg("--connect")
            .arg(connector.endpoint())
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;

        match connector.wait_until_ready(READY_TIMEOUT) {
            Ok(state) => info!(service = %id, %state, "worker ready"),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e).with_context(|| format!("{id} worker never reported state"));
            }
        }

        self.services.push((id, Supervised { connector, child }));
        Ok(())
    }

    fn supervised(&self, id: ServiceId) -> Option<&Supervised> {
        self.services
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, s)| s)
    }

    pub fn connector(&self, id: ServiceId) -> Option<&ServiceConnector> {
        self.supervised(id).map(|s| &s.connector)
    }

    /// Fan the current settings snapshot out to every worker.
    pub fn push_settings(&self) -> Result<()> {
        let snapshot = self.config.snapshot();
        for (id, supervised) in &self.services {
            supervised
                .connector
                .update_settings(&snapshot)
                .with_context(|| format!("failed to push settings to {id}"))?;
        }
        Ok(())
    }

    /// Replace the configuration and push the new snapshot to all workers.
    pub fn update_config(&mut self, config: LanternConfig) -> Result<()> {
        self.config = config;
        self.push_settings()
    }

    pub fn enable(&self, id: ServiceId, enable: bool) -> Result<()> {
        let supervised = self
            .supervised(id)
            .with_context(|| format!("{id} is not running"))?;
        supervised.connector.enable(enable)?;
        Ok(())
    }

    /// Last observed state and observation age for every worker.
    pub fn states(&self) -> Vec<(ServiceId, ServiceState, Option<Duration>)> {
        self.services
            .iter()
            .map(|(id, s)| (*id, s.connector.state(), s.connector.last_update_age()))
            .collect()
    }

    /// Signal every worker to shut down, then reap the processes. A worker
    /// that outlives the grace period is killed.
    pub fn shutdown(&mut self) -> Result<()> {
        for (id, supervised) in &self.services {
            if let Err(e) = supervised.connector.shutdown() {
                warn!(service = %id, error = %e, "failed to signal shutdown");
            }
        }

        for (id, supervised) in &mut self.services {
            match wait_with_grace(&mut supervised.child, EXIT_GRACE) {
                Ok(status) => info!(service = %id, %status, "worker exited"),
                Err(e) => {
                    warn!(service = %id, error = %e, "worker did not exit, killing");
                    let _ = supervised.child.kill();
                    let _ = supervised.child.wait();
                }
            }
        }
        self.services.clear();
        Ok(())
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if !self.services.is_empty() {
            let _ = self.shutdown();
        }
    }
}

fn wait_with_grace(child: &mut Child, grace: Duration) -> Result<std::process::ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait().context("failed to poll worker process")? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("still running after {grace:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executables_are_distinct() {
        assert_eq!(ServiceId::Capture.executable(), "lantern-capture");
        assert_eq!(ServiceId::Audio.executable(), "lantern-audio");
        assert_eq!(ServiceId::ALL.len(), 2);
    }

    #[test]
    fn resolver_defaults_next_to_the_daemon() {
        // Without the env override the worker path sits beside the
        // current executable.
        if std::env::var("LANTERN_WORKER_DIR").is_err() {
            let path = resolve_worker(ServiceId::Capture).unwrap();
            assert!(path.ends_with("lantern-capture"));
        }
    }
}
