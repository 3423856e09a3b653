use crate::listener::client::run_with_reconnect;
use crate::listener::config::RuntimeConfig;
use crate::persistence::{open_backend, persistence_task, restore_store, save_engine};
use crate::pipeline::alert::HttpPager;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::engine::PipelineEngine;
use crate::pipeline::ingestion::SessionContext;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::scorer::RatioScorer;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Restore the store, run the MLLP client until shutdown, then save.
pub async fn run(
    runtime_config: RuntimeConfig,
    pipeline_config: PipelineConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("🚀 Starting AKI listener");
    log::info!("   ├─ MLLP source: {}", runtime_config.mllp_address);
    log::info!("   ├─ Pager: {}", runtime_config.pager_address);
    log::info!(
        "   ├─ Snapshot: {} ({})",
        pipeline_config.snapshot_path,
        pipeline_config.snapshot_backend.as_str()
    );
    log::info!(
        "   ├─ Observation kind: {}",
        pipeline_config.observation_kind.as_deref().unwrap_or("any")
    );
    log::info!(
        "   ├─ Rolling statistic: {}",
        pipeline_config.rolling_statistic.as_str()
    );
    log::info!(
        "   ├─ Auto-create on read: {}",
        pipeline_config.auto_create_on_read
    );
    log::info!(
        "   └─ Timeouts: scorer {}ms, pager {}ms",
        pipeline_config.scorer_timeout_ms,
        pipeline_config.alert_timeout_ms
    );

    let backend = open_backend(&pipeline_config)?;
    log::info!("📊 Snapshot backend: {}", backend.backend_type());

    let store = restore_store(&pipeline_config, backend.as_ref()).await?;
    let engine = Arc::new(Mutex::new(PipelineEngine::from_config(&pipeline_config, store)));

    let pager = HttpPager::new(&runtime_config.pager_address, pipeline_config.alert_timeout())?;
    log::info!("📟 Pager endpoint: {}", pager.url());

    let metrics = Arc::new(PipelineMetrics::new());
    let context = SessionContext::new(
        &pipeline_config,
        engine.clone(),
        Arc::new(RatioScorer::new(pipeline_config.scorer_ratio_threshold)),
        Arc::new(pager),
        metrics.clone(),
    );

    let autosave = pipeline_config.autosave_interval().map(|every| {
        log::info!("💾 Autosave every {:?}", every);
        tokio::spawn(persistence_task(
            engine.clone(),
            backend.clone(),
            every,
            shutdown.clone(),
        ))
    });

    let result = run_with_reconnect(&runtime_config, context, shutdown).await;

    if let Some(handle) = autosave {
        handle.abort();
    }

    log::info!("🔄 Saving final snapshot...");
    match save_engine(&engine, backend.as_ref()).await {
        Ok(count) => log::info!("✅ Saved {} patients", count),
        Err(e) => log::error!("❌ Failed to save snapshot: {}", e),
    }

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(summary) => log::info!("📊 Final metrics: {}", summary),
        Err(e) => log::warn!("⚠️  Could not serialize metrics: {}", e),
    }

    result?;
    Ok(())
}
