//! Snapshot persistence for the patient store
//!
//! The store is written as a whole-table snapshot, periodically by
//! `persistence_task` and once more at shutdown, and restored at startup.

use crate::pipeline::config::{PipelineConfig, SnapshotBackendKind};
use crate::pipeline::db::SqliteSnapshotBackend;
use crate::pipeline::engine::{self, PipelineEngine};
use crate::pipeline::history::CsvHistoryLoader;
use crate::pipeline::store::{PatientStore, StoreSnapshot};
use async_trait::async_trait;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::watch, time::interval};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Replace the stored snapshot
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError>;

    /// `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Pretty-printed JSON file, replaced atomically via a sibling temp file
pub struct JsonSnapshotBackend {
    path: PathBuf,
}

impl JsonSnapshotBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotBackend for JsonSnapshotBackend {
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;

        log::debug!(
            "Saved {} patients to {}",
            snapshot.patients.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        if !self.path.exists() {
            log::info!("No existing snapshot file found: {}", self.path.display());
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&json)?;

        log::info!(
            "Loaded {} patients from {}",
            snapshot.patients.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    fn backend_type(&self) -> &'static str {
        "json"
    }
}

pub fn open_backend(config: &PipelineConfig) -> Result<Arc<dyn SnapshotBackend>, PersistenceError> {
    let backend: Arc<dyn SnapshotBackend> = match config.snapshot_backend {
        SnapshotBackendKind::Json => Arc::new(JsonSnapshotBackend::new(&config.snapshot_path)),
        SnapshotBackendKind::Sqlite => Arc::new(SqliteSnapshotBackend::open(&config.snapshot_path)?),
    };
    Ok(backend)
}

/// Build the startup store: snapshot first, then the history CSV, else empty
pub async fn restore_store(
    config: &PipelineConfig,
    backend: &dyn SnapshotBackend,
) -> Result<PatientStore, Box<dyn std::error::Error>> {
    let policy = config.store_policy();

    if let Some(snapshot) = backend.load().await? {
        let store = PatientStore::from_snapshot(snapshot, policy);
        log::info!(
            "♻️  Restored {} patients (width {}) from {} snapshot",
            store.len(),
            store.width(),
            backend.backend_type()
        );
        return Ok(store);
    }

    let mut store = PatientStore::new(policy);
    if let Some(history_path) = &config.history_path {
        let loaded = CsvHistoryLoader::new(history_path).load_into(&mut store)?;
        log::info!(
            "📥 Loaded {} historical results for {} patients from {}",
            loaded,
            store.len(),
            history_path
        );
    }
    Ok(store)
}

/// Snapshot the engine and hand it to `backend`
pub async fn save_engine(
    engine: &Mutex<PipelineEngine>,
    backend: &dyn SnapshotBackend,
) -> Result<usize, PersistenceError> {
    let snapshot = engine::lock(engine).snapshot();
    backend.save(&snapshot).await?;
    Ok(snapshot.patients.len())
}

/// Background task that periodically saves the store until shutdown
pub async fn persistence_task(
    engine: Arc<Mutex<PipelineEngine>>,
    backend: Arc<dyn SnapshotBackend>,
    autosave_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval_timer = interval(autosave_interval);
    // first tick completes immediately
    interval_timer.tick().await;

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                match save_engine(&engine, backend.as_ref()).await {
                    Ok(count) => log::debug!("💾 Autosaved {} patients", count),
                    Err(e) => log::warn!("⚠️  Failed to save snapshot: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
