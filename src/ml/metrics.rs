//! Evaluation metrics for classification models.

use serde::{Deserialize, Serialize};

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    n_classes: usize,
    /// Row-major counts indexed `truth * K + predicted`.
    cells: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            cells: vec![0; n_classes * n_classes],
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Record one prediction. Out-of-range indices are dropped.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth < self.n_classes && predicted < self.n_classes {
            let cell = &mut self.cells[truth * self.n_classes + predicted];
            *cell = cell.saturating_add(1);
        }
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.cells[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().map(|&count| u64::from(count)).sum()
    }

    /// Examples whose true class is `class`.
    fn support(&self, class: usize) -> u64 {
        (0..self.n_classes).map(|p| u64::from(self.get(class, p))).sum()
    }

    /// Examples predicted as `class`.
    fn predicted(&self, class: usize) -> u64 {
        (0..self.n_classes).map(|t| u64::from(self.get(t, class))).sum()
    }

    /// Share of examples on the diagonal; zero for an empty matrix.
    pub fn accuracy(&self) -> f32 {
        let correct: u64 = (0..self.n_classes).map(|c| u64::from(self.get(c, c))).sum();
        ratio(correct, self.total())
    }

    /// Precision, recall and F1 for one class.
    pub fn class_metric(&self, class: usize, class_id: String) -> PerClassMetric {
        let hits = u64::from(self.get(class, class));
        let support = self.support(class);
        let precision = ratio(hits, self.predicted(class));
        let recall = ratio(hits, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        PerClassMetric {
            class_id,
            support: u32::try_from(support).unwrap_or(u32::MAX),
            precision,
            recall,
            f1,
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f32 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f32 / denominator as f32
    }
}

/// Serialized validation metrics attached to training reports and model versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f32,
    pub macro_f1: f32,
    pub weighted_f1: f32,
    pub per_class: Vec<PerClassMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassMetric {
    pub class_id: String,
    pub support: u32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// Full metric set with class names attached.
///
/// Macro F1 averages over classes with non-zero support; weighted F1 weights by support.
pub fn classification_metrics(cm: &ConfusionMatrix, classes: &[String]) -> ClassificationMetrics {
    let per_class: Vec<PerClassMetric> = (0..cm.n_classes())
        .map(|idx| {
            let class_id = classes.get(idx).cloned().unwrap_or_else(|| idx.to_string());
            cm.class_metric(idx, class_id)
        })
        .collect();
    let supported: Vec<f32> = per_class
        .iter()
        .filter(|metric| metric.support > 0)
        .map(|metric| metric.f1)
        .collect();
    let macro_f1 = if supported.is_empty() {
        0.0
    } else {
        supported.iter().sum::<f32>() / supported.len() as f32
    };
    let total_support: f32 = per_class.iter().map(|metric| metric.support as f32).sum();
    let weighted_f1 = if total_support > 0.0 {
        per_class
            .iter()
            .map(|metric| metric.f1 * metric.support as f32)
            .sum::<f32>()
            / total_support
    } else {
        0.0
    };
    ClassificationMetrics {
        accuracy: cm.accuracy(),
        macro_f1,
        weighted_f1,
        per_class,
    }
}
