use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PrimaryMetric;
use crate::ml::BaseModelKind;
use crate::ml::metrics::ClassificationMetrics;

/// Validation accuracy of a single member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberReport {
    pub name: String,
    pub kind: BaseModelKind,
    pub weight: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f32,
}

/// Everything measured during one ensemble training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub classes: Vec<String>,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// Samples per class across both splits.
    pub class_counts: BTreeMap<String, usize>,
    pub metrics: ClassificationMetrics,
    pub members: Vec<MemberReport>,
    /// Weight-scaled importances summed across members, highest first.
    pub feature_importances: Vec<FeatureImportance>,
    pub duration_ms: u64,
}

impl TrainingReport {
    pub fn score(&self, metric: PrimaryMetric) -> f32 {
        metric_value(&self.metrics, metric)
    }

    pub fn top_features(&self, n: usize) -> &[FeatureImportance] {
        &self.feature_importances[..n.min(self.feature_importances.len())]
    }
}

/// Read the configured headline metric from a metric set.
pub fn metric_value(metrics: &ClassificationMetrics, metric: PrimaryMetric) -> f32 {
    match metric {
        PrimaryMetric::MacroF1 => metrics.macro_f1,
        PrimaryMetric::WeightedF1 => metrics.weighted_f1,
        PrimaryMetric::Accuracy => metrics.accuracy,
    }
}
