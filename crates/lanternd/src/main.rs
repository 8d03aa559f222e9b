//! The lantern ambient lighting daemon.
//!
//! Loads the configuration, spawns the capture and audio workers, and
//! supervises them until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lanternconf::LanternConfig;
use lanternd::manager::ServiceManager;
use lanternd::{logging, signal};
use tracing::{debug, info};

/// The lantern ambient lighting daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./lantern.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the daemon (default)
    Run,
    /// Print the effective configuration and exit
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LanternConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command.unwrap_or(Cmd::Run) {
        Cmd::Config => {
            print!("{}", config.to_toml());
            Ok(())
        }
        Cmd::Run => run(config),
    }
}

fn run(config: LanternConfig) -> Result<()> {
    logging::init(&config.log.level)?;
    info!("lanternd {} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = signal::shutdown_flag();

    let mut manager = ServiceManager::new(config);
    manager.start()?;
    info!("workers running");

    while !shutdown.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_secs(1));
        for (id, state, age) in manager.states() {
            debug!(
                service = %id,
                %state,
                observed_secs_ago = age.map(|a| a.as_secs()),
                "worker state"
            );
        }
    }

    info!("shutting down workers");
    manager.shutdown()?;
    info!("lanternd shutdown complete");
    Ok(())
}
