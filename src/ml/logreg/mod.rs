//! Multinomial logistic regression over standardized feature vectors.

use serde::{Deserialize, Serialize};

use crate::ml::ClassifierError;
use crate::ml::gbdt_stump::{argmax, softmax};

mod train;
pub use train::{TrainOptions, train_logreg};

/// Linear softmax classifier with optional temperature scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRegModel {
    pub model_version: i64,
    pub feature_len: usize,
    pub classes: Vec<String>,
    /// Shape: `[n_classes][feature_len]`, row-major.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub temperature: f32,
}

impl LogRegModel {
    /// Validate the model dimensions.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let classes = self.classes.len();
        if classes == 0 {
            return Err(ClassifierError::InvalidModel("No classes defined".to_string()));
        }
        if self.weights.len() != classes * self.feature_len {
            return Err(ClassifierError::InvalidModel(
                "weights length mismatch".to_string(),
            ));
        }
        if self.bias.len() != classes {
            return Err(ClassifierError::InvalidModel("bias length mismatch".to_string()));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(ClassifierError::InvalidModel(
                "temperature must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Compute class probabilities for a single feature row.
    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        if features.len() != self.feature_len {
            return Vec::new();
        }
        let classes = self.classes.len();
        if classes == 0 {
            return Vec::new();
        }
        let temp = self.temperature.max(1e-6);
        let logits: Vec<f32> = (0..classes)
            .map(|c| {
                let row = &self.weights[c * self.feature_len..(c + 1) * self.feature_len];
                let dot: f32 = row.iter().zip(features).map(|(w, x)| w * x).sum();
                (self.bias[c] + dot) / temp
            })
            .collect();
        softmax(&logits)
    }

    /// Return the argmax class index for the given row.
    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(&self.predict_proba(features))
    }

    /// Mean absolute coefficient per feature, normalized to sum to one.
    ///
    /// Inputs are standardized upstream, so coefficient magnitudes are comparable.
    pub fn feature_importances(&self) -> Vec<f32> {
        let mut importances = vec![0.0f32; self.feature_len];
        for class_row in self.weights.chunks(self.feature_len.max(1)) {
            for (acc, w) in importances.iter_mut().zip(class_row) {
                *acc += w.abs();
            }
        }
        normalize_importances(importances)
    }
}

/// Scale non-negative scores to sum to one; all-zero input stays all zero.
pub(crate) fn normalize_importances(mut scores: Vec<f32>) -> Vec<f32> {
    for v in &mut scores {
        if !v.is_finite() || *v < 0.0 {
            *v = 0.0;
        }
    }
    let total: f32 = scores.iter().sum();
    if total > 0.0 {
        for v in &mut scores {
            *v /= total;
        }
    }
    scores
}
