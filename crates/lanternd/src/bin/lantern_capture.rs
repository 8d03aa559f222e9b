//! Screen capture worker executable.

use anyhow::Result;
use clap::Parser;
use lanternd::logging;
use lanternd::workers::{CaptureService, LogSink, SweepSource};
use lanternproto::ServiceRuntime;
use tracing::info;

/// The lantern screen capture worker
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
    info!("lantern-capture {} starting", env!("CARGO_PKG_VERSION"));

    let service = CaptureService::new(
        Box::new(LogSink::new("capture")),
        Box::new(SweepSource::new()),
    );
    ServiceRuntime::connect(&cli.connect, service, CaptureService::options())?.run()?;

    info!("lantern-capture terminated");
    Ok(())
}
