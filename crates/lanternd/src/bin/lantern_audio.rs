//! Audio effect worker executable.

use anyhow::Result;
use clap::Parser;
use lanternd::logging;
use lanternd::workers::{AudioService, LogSink, PulseSource};
use lanternproto::ServiceRuntime;
use tracing::info;

/// The lantern audio effect worker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Control channel endpoint to connect back to (e.g. tcp://127.0.0.1:40123)
    #[arg(long)]
    connect: String,
}

fn main() -> Result<()> {
    logging::init_from_env()?;
    let cli = Cli::parse();
    info!("lantern-audio {} starting", env!("CARGO_PKG_VERSION"));

    let service = AudioService::new(
        Box::new(LogSink::new("audio")),
        Box::new(PulseSource::new(16)),
    );
    ServiceRuntime::connect(&cli.connect, service, AudioService::options())?.run()?;

    info!("lantern-audio terminated");
    Ok(())
}
