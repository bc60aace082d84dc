//! Library exports for reuse in benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// TOML configuration.
pub mod config;
/// Fixed-schema feature extraction.
pub mod features;
/// Multi-account fetch, fingerprinting and deduplication.
pub mod ingest;
/// Feedback collection, retraining and model versions.
pub mod learning;
/// Tracing subscriber setup.
pub mod logging;
/// Message data model.
pub mod message;
/// Base models and the weighted ensemble.
pub mod ml;
/// End-to-end triage pipeline.
pub mod triage;

pub use config::TriageConfig;
pub use learning::{ActiveLearner, Priority};
pub use message::{AccountId, Message};
pub use triage::{TriageEngine, TriageError};
