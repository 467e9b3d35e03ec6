//! # Notification Worker
//!
//! Long-running consumer: pulls notifications from the durable queue and
//! stores them locally until interrupted.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};

use notification_pipeline::logging::init_structured_logging;
use notification_pipeline::{NotificationPipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "notification-worker")]
#[command(about = "Consume entity-event notifications from the durable queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file; NOTIFY_* environment variables override it
    #[arg(env = "NOTIFY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    if let Err(e) = run(cli).await {
        error!(error = %e, kind = e.kind(), "Notification worker failed");
        eprintln!("❌ {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> notification_pipeline::Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    info!(config = ?config.sanitized(), "Configuration loaded");

    let pipeline = NotificationPipeline::connect(config).await?;
    let processor = pipeline.store_processor();
    processor.start().await?;

    info!(
        processor_id = %processor.processor_id(),
        "✅ Notification worker running, press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down notification worker");
    processor.stop().await?;

    let stats = processor.stats();
    info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        abandoned = stats.abandoned,
        stored = pipeline.store().len(),
        "Notification worker stopped"
    );
    Ok(())
}
