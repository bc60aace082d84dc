//! Persisted triage settings.
//!
//! Every table and field carries a serde default so that partial or older TOML files
//! keep loading as new knobs are added.

mod defaults;
mod errors;
mod io;

use serde::{Deserialize, Serialize};

use crate::ml::{BaseModelKind, gbdt_stump, logreg, mlp};
use defaults::*;

pub use errors::ConfigError;
pub use io::{CONFIG_FILE_NAME, config_path, load_from, load_or_default, save_to};

/// Root configuration document (`config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub accounts: AccountSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub ensemble: EnsembleSettings,
    #[serde(default)]
    pub learning: LearningSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Fetch and deduplication behaviour across accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Accounts whose copies win when a message exists in several mailboxes, highest first.
    #[serde(default)]
    pub priority_order: Vec<String>,
    #[serde(default = "default_max_messages_per_account")]
    pub max_messages_per_account: usize,
    #[serde(default = "default_true")]
    pub parallel_fetch: bool,
    #[serde(default = "default_true")]
    pub cross_account_deduplication: bool,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            priority_order: Vec::new(),
            max_messages_per_account: default_max_messages_per_account(),
            parallel_fetch: true,
            cross_account_deduplication: true,
        }
    }
}

/// Thresholds that route predictions to human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Predictions below this confidence are flagged uncertain.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f32,
    /// Predictions whose top-two probability gap is below this are flagged uncertain.
    #[serde(default = "default_uncertainty_margin")]
    pub uncertainty_margin: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            low_confidence_threshold: default_low_confidence_threshold(),
            uncertainty_margin: default_uncertainty_margin(),
        }
    }
}

/// One ensemble slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSettings {
    pub kind: BaseModelKind,
    /// Non-negative vote weight; weights are normalized at combination time.
    pub weight: f32,
}

/// Ensemble composition and per-model hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSettings {
    #[serde(default = "default_members")]
    pub members: Vec<MemberSettings>,
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f32,
    /// Seed for splits, initialization and shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub logreg: logreg::TrainOptions,
    #[serde(default)]
    pub gbdt_stump: gbdt_stump::TrainOptions,
    #[serde(default)]
    pub mlp: mlp::TrainOptions,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            members: default_members(),
            validation_fraction: default_validation_fraction(),
            seed: default_seed(),
            logreg: logreg::TrainOptions::default(),
            gbdt_stump: gbdt_stump::TrainOptions::default(),
            mlp: mlp::TrainOptions::default(),
        }
    }
}

/// Metric used by the promotion gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryMetric {
    #[default]
    MacroF1,
    WeightedF1,
    Accuracy,
}

/// Upper bound for `learning.training_timeout_secs` (one week).
pub const MAX_TRAINING_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Retraining cadence and promotion gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSettings {
    /// Samples required before a training run is attempted.
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,
    /// New validated samples that make `should_retrain` fire.
    #[serde(default = "default_retrain_threshold")]
    pub retrain_threshold: usize,
    #[serde(default)]
    pub primary_metric: PrimaryMetric,
    /// Required improvement over the active version; negative values are treated as zero.
    #[serde(default)]
    pub promotion_margin: f32,
    /// Abort training after this many seconds.
    #[serde(default)]
    pub training_timeout_secs: Option<u64>,
    /// Minimum rule confidence for a bootstrap label to be collected.
    #[serde(default = "default_bootstrap_min_confidence")]
    pub bootstrap_min_confidence: f32,
    /// Train only on human-confirmed samples.
    #[serde(default)]
    pub validated_only: bool,
    /// Observed messages awaiting feedback; the oldest is dropped beyond this.
    #[serde(default = "default_observed_capacity")]
    pub observed_capacity: usize,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            min_training_samples: default_min_training_samples(),
            retrain_threshold: default_retrain_threshold(),
            primary_metric: PrimaryMetric::default(),
            promotion_margin: 0.0,
            training_timeout_secs: None,
            bootstrap_min_confidence: default_bootstrap_min_confidence(),
            validated_only: false,
            observed_capacity: default_observed_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub log_to_file: bool,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: true,
            max_log_files: default_max_log_files(),
        }
    }
}

impl TriageConfig {
    /// Check value ranges, returning every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        let model = &self.model;
        if !(0.0..=1.0).contains(&model.low_confidence_threshold) {
            issues.push(format!(
                "model.low_confidence_threshold must be within [0, 1], got {}",
                model.low_confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&model.uncertainty_margin) {
            issues.push(format!(
                "model.uncertainty_margin must be within [0, 1], got {}",
                model.uncertainty_margin
            ));
        }
        let ensemble = &self.ensemble;
        if ensemble.members.is_empty() {
            issues.push("ensemble.members cannot be empty".to_string());
        }
        for member in &ensemble.members {
            if !member.weight.is_finite() || member.weight < 0.0 {
                issues.push(format!(
                    "ensemble member {:?} has invalid weight {}",
                    member.kind, member.weight
                ));
            }
        }
        let total: f32 = ensemble.members.iter().map(|m| m.weight.max(0.0)).sum();
        if !ensemble.members.is_empty() && total <= 0.0 {
            issues.push("ensemble member weights must not all be zero".to_string());
        }
        if !(ensemble.validation_fraction > 0.0 && ensemble.validation_fraction < 1.0) {
            issues.push(format!(
                "ensemble.validation_fraction must be within (0, 1), got {}",
                ensemble.validation_fraction
            ));
        }
        let learning = &self.learning;
        if learning.min_training_samples == 0 {
            issues.push("learning.min_training_samples must be positive".to_string());
        }
        if learning.observed_capacity == 0 {
            issues.push("learning.observed_capacity must be positive".to_string());
        }
        if let Some(secs) = learning
            .training_timeout_secs
            .filter(|&secs| secs > MAX_TRAINING_TIMEOUT_SECS)
        {
            issues.push(format!(
                "learning.training_timeout_secs must be at most {MAX_TRAINING_TIMEOUT_SECS}, got {secs}"
            ));
        }
        if !(0.0..=1.0).contains(&learning.bootstrap_min_confidence) {
            issues.push(format!(
                "learning.bootstrap_min_confidence must be within [0, 1], got {}",
                learning.bootstrap_min_confidence
            ));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }
}
