//! Tick recorder - entry point.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tickrec_core::EventBus;
use tickrec_persistence::FileAccountRegistry;
use tickrec_recorder::{console, ActivityLog, AppConfig, Application};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Records bid/ask ticks from the trading API to CSV day files.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKREC_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Directory of account files, overriding the configured one
    #[arg(long)]
    accounts_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any connection)
    tickrec_wire::init_crypto();

    let args = Args::parse();

    tickrec_telemetry::init_logging()?;

    info!("Starting tickrec v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > TICKREC_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKREC_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = AppConfig::from_file(&config_path)?;
    if let Some(dir) = args.accounts_dir {
        config.accounts_dir = dir;
    }
    info!(host = %config.api.host, port = config.api.port, accounts_dir = %config.accounts_dir, "Configuration loaded");

    let events = EventBus::default();
    let console = tokio::spawn(console::log_events(events.subscribe()));
    let activity_stop = CancellationToken::new();
    let activity = ActivityLog::from_config(&config.activity)
        .map(|log| tokio::spawn(log.run(events.subscribe(), activity_stop.clone())));

    let registry = Arc::new(FileAccountRegistry::new(&config.accounts_dir));
    let app = Application::new(config, registry, events)?;

    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let result = app.run().await;
    activity_stop.cancel();
    if let Some(activity) = activity {
        let _ = activity.await;
    }
    console.abort();
    result?;

    Ok(())
}
