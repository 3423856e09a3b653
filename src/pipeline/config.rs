//! Pipeline configuration from environment variables

use super::store::StorePolicy;
use super::windows::Statistic;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotBackendKind {
    Json,
    Sqlite,
}

impl SnapshotBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotBackendKind::Json => "json",
            SnapshotBackendKind::Sqlite => "sqlite",
        }
    }
}

/// Configuration for the ingestion pipeline
///
/// Loaded from environment variables with sensible defaults. Unparseable
/// values fall back to the default with a warning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Snapshot file (JSON) or database (SQLite)
    pub snapshot_path: String,

    pub snapshot_backend: SnapshotBackendKind,

    /// Autosave period in seconds, 0 disables autosave
    pub snapshot_interval_secs: u64,

    /// Historical CSV, loaded only when no snapshot exists
    pub history_path: Option<String>,

    pub auto_create_on_read: bool,

    pub rolling_statistic: Statistic,

    /// OBX type label to store, `None` accepts every label
    pub observation_kind: Option<String>,

    pub scorer_timeout_ms: u64,

    pub alert_timeout_ms: u64,

    pub scorer_ratio_threshold: f64,

    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SNAPSHOT_PATH` (default: aki_snapshot.json)
    /// - `SNAPSHOT_BACKEND` json | sqlite (default: json)
    /// - `SNAPSHOT_INTERVAL_SECS` (default: 60)
    /// - `HISTORY_PATH` (default: unset)
    /// - `AUTO_CREATE_ON_READ` (default: true)
    /// - `ROLLING_STATISTIC` mean | median (default: mean)
    /// - `OBSERVATION_KIND` (default: CREATININE, empty accepts all)
    /// - `SCORER_TIMEOUT_MS` (default: 500)
    /// - `ALERT_TIMEOUT_MS` (default: 2000)
    /// - `SCORER_RATIO_THRESHOLD` (default: 1.5)
    /// - `STATS_INTERVAL_SECS` (default: 30)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let snapshot_backend = match parsed("SNAPSHOT_BACKEND", "json").to_lowercase().as_str() {
            "json" => SnapshotBackendKind::Json,
            "sqlite" => SnapshotBackendKind::Sqlite,
            other => {
                log::warn!("Invalid SNAPSHOT_BACKEND '{}', defaulting to json", other);
                SnapshotBackendKind::Json
            }
        };

        let rolling_statistic = {
            let raw = parsed("ROLLING_STATISTIC", "mean");
            Statistic::from_str(&raw).unwrap_or_else(|| {
                log::warn!("Invalid ROLLING_STATISTIC '{}', defaulting to mean", raw);
                Statistic::Mean
            })
        };

        let observation_kind = Some(parsed("OBSERVATION_KIND", "CREATININE"))
            .map(|kind| kind.trim().to_string())
            .filter(|kind| !kind.is_empty());

        Self {
            snapshot_path: parsed("SNAPSHOT_PATH", "aki_snapshot.json"),
            snapshot_backend,
            snapshot_interval_secs: parse_or(&lookup, "SNAPSHOT_INTERVAL_SECS", 60),
            history_path: lookup("HISTORY_PATH").filter(|p| !p.is_empty()),
            auto_create_on_read: parse_or(&lookup, "AUTO_CREATE_ON_READ", true),
            rolling_statistic,
            observation_kind,
            scorer_timeout_ms: parse_or(&lookup, "SCORER_TIMEOUT_MS", 500),
            alert_timeout_ms: parse_or(&lookup, "ALERT_TIMEOUT_MS", 2_000),
            scorer_ratio_threshold: parse_or(&lookup, "SCORER_RATIO_THRESHOLD", 1.5),
            stats_interval_secs: parse_or(&lookup, "STATS_INTERVAL_SECS", 30),
        }
    }

    pub fn store_policy(&self) -> StorePolicy {
        StorePolicy {
            auto_create_on_read: self.auto_create_on_read,
        }
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.scorer_timeout_ms)
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_timeout_ms)
    }

    /// Never zero, `tokio::time::interval` rejects a zero period
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        match self.snapshot_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().to_lowercase().parse().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', defaulting to {:?}", key, raw, default);
            default
        }),
    }
}
