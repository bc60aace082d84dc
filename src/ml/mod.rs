//! Priority classifiers: base models, the weighted ensemble and their shared plumbing.
//!
//! Base models train on standardized rows and return class distributions aligned with
//! the dataset's class list. The ensemble owns standardization, the train/validation
//! split and uncertainty scoring.

pub mod base;
pub mod cancel;
pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod gbdt_stump;
pub mod logreg;
pub mod metrics;
pub mod mlp;
pub mod normalize;
pub mod split;

pub use base::{BaseModel, BaseModelKind, build_member, member_from_json};
pub use cancel::CancelToken;
pub use dataset::TrainDataset;
pub use ensemble::{
    ClassProbability, EnsembleClassifier, FeatureImportance, LabeledExample, MemberPrediction,
    MemberReport, Prediction, TrainingReport, UncertaintyReason, UncertaintyThresholds,
};
pub use error::ClassifierError;
pub use gbdt_stump::{argmax, softmax};
pub use metrics::{ClassificationMetrics, ConfusionMatrix, PerClassMetric};
