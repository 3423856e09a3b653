//! # Feature pipeline
//!
//! Everything between a parsed HL7 event and a paging decision:
//!
//! 1. `store` keeps demographics and a growing, rectangular table of
//!    (timestamp, value) slots per patient
//! 2. `features` projects a record into the fixed 12-wide classifier input
//! 3. `windows` tracks a trailing-hour statistic over incoming values
//! 4. `engine` applies events to the store under one lock
//! 5. `scorer` and `alert` are the outbound collaborators
//! 6. `ingestion` drives one MLLP connection end to end
//!
//! ## Module Organization
//!
//! - `store` - Patient history store and snapshot rows
//! - `features` - Feature window builder
//! - `windows` - Rolling statistics window
//! - `engine` - Event application, shared behind `Arc<Mutex<_>>`
//! - `scorer` - Scorer trait and the ratio baseline
//! - `alert` - Pager trait and HTTP implementation
//! - `metrics` - Atomic counters
//! - `history` - Historical CSV loader
//! - `db` - SQLite snapshot backend
//! - `config` - Environment configuration
//! - `ingestion` - Per-connection session

pub mod alert;
pub mod config;
pub mod db;
pub mod engine;
pub mod features;
pub mod history;
pub mod ingestion;
pub mod metrics;
pub mod scorer;
pub mod store;
pub mod windows;

pub use alert::{AlertError, AlertSender, HttpPager};
pub use config::PipelineConfig;
pub use engine::{Assessment, EngineOutcome, PipelineEngine};
pub use features::FeatureVector;
pub use ingestion::{Session, SessionContext, SessionEnd, SessionError};
pub use metrics::{Counter, PipelineMetrics};
pub use scorer::{RatioScorer, Scorer, ScorerError};
pub use store::{PatientRecord, PatientStore, StorePolicy, StoreSnapshot};
pub use windows::{RollingWindow, Statistic, TrailingWindow};
