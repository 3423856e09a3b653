//! Scoring seam between the feature pipeline and the AKI classifier
//!
//! The trained model is an external collaborator. The pipeline only depends on
//! the `Scorer` trait; `RatioScorer` is a deterministic baseline so the
//! listener runs without a model.

use super::features::FeatureVector;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("scorer failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Scorer: Send + Sync {
    /// `true` when the patient should be paged
    async fn score(&self, features: &FeatureVector) -> Result<bool, ScorerError>;

    /// Scorer name for logging
    fn name(&self) -> &'static str;
}

/// Run `scorer` with an upper bound on how long the caller waits
pub async fn score_with_timeout(
    scorer: &dyn Scorer,
    features: &FeatureVector,
    timeout: Duration,
) -> Result<bool, ScorerError> {
    match tokio::time::timeout(timeout, scorer.score(features)).await {
        Ok(result) => result,
        Err(_) => Err(ScorerError::Timeout(timeout)),
    }
}

/// Flags a patient when the latest value has risen to `threshold` times the
/// lowest earlier value in the window.
pub struct RatioScorer {
    threshold: f64,
}

impl RatioScorer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Latest value over the lowest earlier value, if there is a baseline
    pub fn ratio(&self, features: &FeatureVector) -> Option<f64> {
        let mut values = features.recent_values();
        let latest = values.next()?;
        let baseline = values.fold(f64::INFINITY, f64::min);

        if !baseline.is_finite() || baseline <= 0.0 {
            return None;
        }
        Some(latest / baseline)
    }
}

impl Default for RatioScorer {
    fn default() -> Self {
        Self::new(1.5)
    }
}

#[async_trait]
impl Scorer for RatioScorer {
    async fn score(&self, features: &FeatureVector) -> Result<bool, ScorerError> {
        Ok(self
            .ratio(features)
            .map(|ratio| ratio >= self.threshold)
            .unwrap_or(false))
    }

    fn name(&self) -> &'static str {
        "ratio"
    }
}
