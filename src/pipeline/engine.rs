//! Pipeline engine
//!
//! Owns the patient store and the rolling window, and turns each parsed event
//! into a store mutation plus, for observations, a feature vector ready for
//! scoring. The engine is synchronous: callers share it behind a
//! `std::sync::Mutex` and never hold the lock across an `.await`.
//!
//! ```text
//! ParsedEvent
//!     ↓
//! PipelineEngine::apply()
//!     ├─ Admission    → PatientStore::apply_admission
//!     ├─ AdminUpdate  → PatientStore::read
//!     └─ Observation  → PatientStore::append_observation
//!                         → TrailingWindow::record
//!                         → features::build
//!     ↓
//! EngineOutcome
//! ```

use super::config::PipelineConfig;
use super::features::{self, FeatureVector};
use super::store::{age_on, PatientStore, StoreSnapshot};
use super::windows::{RollingWindow, Statistic, TrailingWindow};
use crate::hl7::ParsedEvent;
use chrono::NaiveDateTime;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Feature vector for a patient that just received an observation
#[derive(Debug, Clone)]
pub struct Assessment {
    pub mrn: String,
    /// Slot index the observation landed in
    pub slot: usize,
    pub features: FeatureVector,
    /// Absolute time of the most recent observation
    pub reference_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub enum EngineOutcome {
    Admitted { mrn: String, age: Option<u32> },
    Updated { mrn: String, known: bool },
    Observed(Assessment),
    /// Observation of a kind the pipeline does not track
    Ignored { mrn: String, kind: String },
}

pub struct PipelineEngine {
    store: PatientStore,

    /// Trailing-hour window over accepted observation values
    rolling: TrailingWindow,

    /// OBX label to accept, `None` accepts everything
    observation_kind: Option<String>,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl PipelineEngine {
    /// Create an engine around `store` using wall-clock arrival times
    pub fn new(store: PatientStore, statistic: Statistic, observation_kind: Option<String>) -> Self {
        Self::new_with_timestamp_fn(
            store,
            statistic,
            observation_kind,
            Box::new(|| chrono::Utc::now().timestamp()),
        )
    }

    /// Create an engine with a custom arrival clock (Unix seconds)
    pub fn new_with_timestamp_fn(
        store: PatientStore,
        statistic: Statistic,
        observation_kind: Option<String>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            store,
            rolling: TrailingWindow::new(statistic),
            observation_kind,
            now_fn,
        }
    }

    pub fn from_config(config: &PipelineConfig, store: PatientStore) -> Self {
        Self::new(
            store,
            config.rolling_statistic,
            config.observation_kind.clone(),
        )
    }

    pub fn store(&self) -> &PatientStore {
        &self.store
    }

    pub fn statistic(&self) -> Statistic {
        self.rolling.statistic()
    }

    /// Apply one classified message to the store.
    ///
    /// Admission age is taken on the date in the admission's MSH header, not
    /// the wall clock, so replaying a feed yields the same ages.
    pub fn apply(&mut self, event: ParsedEvent) -> EngineOutcome {
        match event {
            ParsedEvent::Admission {
                mrn,
                dob,
                sex,
                time,
            } => {
                let age = age_on(dob, time.date());
                if age.is_none() {
                    log::warn!("DOB {} for MRN {} is after the admission time", dob, mrn);
                }
                self.store.apply_admission(&mrn, age, sex);
                EngineOutcome::Admitted { mrn, age }
            }

            ParsedEvent::AdminUpdate { mrn, .. } => {
                let known = self.store.read(&mrn).is_some();
                EngineOutcome::Updated { mrn, known }
            }

            ParsedEvent::Observation {
                mrn,
                time,
                kind,
                value,
            } => {
                if !self.accepts(&kind) {
                    return EngineOutcome::Ignored { mrn, kind };
                }

                let slot = self.store.append_observation(&mrn, time, value);
                self.rolling.record(value, (self.now_fn)());

                let record = self.store.get_or_create(&mrn);
                let (features, reference_time) = features::build(record);

                EngineOutcome::Observed(Assessment {
                    mrn,
                    slot,
                    features,
                    reference_time,
                })
            }
        }
    }

    fn accepts(&self, kind: &str) -> bool {
        match &self.observation_kind {
            Some(expected) => expected.eq_ignore_ascii_case(kind.trim()),
            None => true,
        }
    }

    /// Rolling statistic over the trailing hour of arrivals
    pub fn rolling_summary(&mut self) -> Option<f64> {
        let now = (self.now_fn)();
        self.rolling.summary(now)
    }

    /// Values currently inside the rolling window
    pub fn rolling_len(&self) -> usize {
        self.rolling.len()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.to_snapshot((self.now_fn)())
    }
}

/// Lock the shared engine, recovering the guard if a holder panicked
pub fn lock(engine: &Mutex<PipelineEngine>) -> MutexGuard<'_, PipelineEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}
