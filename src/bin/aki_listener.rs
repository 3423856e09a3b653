//! AKI listener
//!
//! Connects to the hospital MLLP feed, acknowledges every message, keeps the
//! patient store up to date and pages on positive predictions.
//!
//! Usage:
//!   cargo run --release --bin aki_listener
//!
//! Environment variables:
//!   MLLP_ADDRESS - MLLP source host:port (default: localhost:8440)
//!   PAGER_ADDRESS - Pager host:port (default: localhost:8441)
//!   SNAPSHOT_PATH - Store snapshot path (default: aki_snapshot.json)
//!   SNAPSHOT_BACKEND - json | sqlite (default: json)
//!   HISTORY_PATH - Historical CSV loaded when no snapshot exists

use dotenv::dotenv;
use labstream::listener::{self, RuntimeConfig};
use labstream::pipeline::PipelineConfig;
use log::{error, info};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let runtime_config = RuntimeConfig::from_env()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&runtime_config.rust_log),
    )
    .target(env_logger::Target::Stderr)
    .init();

    let pipeline_config = PipelineConfig::from_env();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("");
        info!("⚠️  Shutdown requested, finishing current message...");
        let _ = shutdown_tx.send(true);
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");
    listener::run(runtime_config, pipeline_config, shutdown_rx).await?;

    info!("✅ AKI listener stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            error!("❌ Failed to listen for SIGTERM: {}", err);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => info!("⚠️  Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C"),
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
