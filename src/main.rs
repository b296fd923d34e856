//! Meter recorder utility

use std::path::PathBuf;

use clap::Parser;
use meter_recorder::{config::AppConfig, errors::MeterRecorderError, recorder, shutdown};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Record utility meter readings received by rtl_tcp and rtlamr.
#[derive(Parser, Debug)]
#[command(name = "meter-recorder", version, about, long_about = None)]
struct Cli {
    /// Optionally specify the path to the meter database
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), MeterRecorderError> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("meter_recorder=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load(cli.database.as_deref())?;
    let shutdown_signal = shutdown::install_signal_handler();

    match recorder::run(&config, shutdown_signal).await {
        Ok(stats) => {
            info!("Meter recorder stopped after persisting {} readings", stats.persisted);
            Ok(())
        }
        Err(e) => {
            error!("Meter recorder failed: {}", e);
            Err(e)
        }
    }
}
