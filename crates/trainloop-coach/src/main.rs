//! Trainloop daemon entry point.
//!
//! Binary name: `trainloopd`
//!
//! Loads configuration from the data directory, starts the workflow
//! runtime, and runs until interrupted.

use std::path::PathBuf;

use clap::Parser;
use trainloop_coach::runtime::Runtime;
use trainloop_infra::config::{database_url, load_config};
use trainloop_observe::tracing_setup::{init_tracing, shutdown_tracing};

#[derive(Parser)]
#[command(name = "trainloopd", about = "Trainloop background execution fabric")]
struct Cli {
    /// Directory holding the database and trainloop.toml.
    #[arg(long, env = "TRAINLOOP_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Export spans through the OpenTelemetry stdout exporter.
    #[arg(long)]
    otel: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.otel, cli.verbose).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let config = load_config(&cli.data_dir).await;
    let url = database_url(&config, &cli.data_dir);
    tracing::info!(data_dir = %cli.data_dir.display(), "starting trainloopd");

    let runtime = Runtime::start(&config, &url).await?;
    tracing::info!("fabric running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    runtime.shutdown().await;
    shutdown_tracing();
    Ok(())
}
