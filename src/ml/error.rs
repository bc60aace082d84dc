use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while training, loading or querying classifiers.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Not enough samples or classes to train or stratify.
    #[error("Insufficient training data: {0}")]
    InsufficientData(String),
    /// Feature vectors or a persisted model were produced under another schema.
    #[error("Feature schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
    /// Prediction requested before training or loading.
    #[error("Classifier has not been trained")]
    NotTrained,
    /// Training aborted by cancellation or timeout.
    #[error("Training was cancelled")]
    Cancelled,
    #[error("Invalid classifier options: {0}")]
    InvalidOptions(String),
    /// A persisted or freshly built model failed structural validation.
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Failed to access model file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Model JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
