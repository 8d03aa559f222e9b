//! Subscriber setup shared by the daemon and the worker binaries.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `RUST_LOG` wins over the configured
/// level so a single worker can be turned up without touching config.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set subscriber: {e}"))?;
    Ok(())
}

/// Worker binaries have no config file; they log at `info` unless
/// `RUST_LOG` says otherwise.
pub fn init_from_env() -> Result<()> {
    init("info")
}
