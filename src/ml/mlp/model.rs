use serde::{Deserialize, Serialize};

use crate::ml::ClassifierError;
use crate::ml::gbdt_stump::{argmax, softmax};
use crate::ml::logreg::normalize_importances;

/// ReLU hidden layer followed by a softmax output layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpModel {
    pub model_version: i64,
    pub feature_len: usize,
    pub classes: Vec<String>,
    pub hidden_size: usize,
    /// Shape: `[hidden_size][feature_len]`.
    pub weights1: Vec<f32>,
    pub bias1: Vec<f32>,
    /// Shape: `[n_classes][hidden_size]`.
    pub weights2: Vec<f32>,
    pub bias2: Vec<f32>,
}

impl MlpModel {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let input = self.feature_len;
        let hidden = self.hidden_size;
        let classes = self.classes.len();
        let fail = |msg: &str| Err(ClassifierError::InvalidModel(msg.to_string()));
        if classes == 0 || hidden == 0 {
            return fail("mlp needs at least one class and one hidden unit");
        }
        if self.weights1.len() != input * hidden {
            return fail("weights1 length mismatch");
        }
        if self.bias1.len() != hidden {
            return fail("bias1 length mismatch");
        }
        if self.weights2.len() != classes * hidden {
            return fail("weights2 length mismatch");
        }
        if self.bias2.len() != classes {
            return fail("bias2 length mismatch");
        }
        Ok(())
    }

    pub(crate) fn hidden_activations(&self, features: &[f32]) -> Vec<f32> {
        let input = self.feature_len;
        (0..self.hidden_size)
            .map(|h| {
                let row = &self.weights1[h * input..(h + 1) * input];
                let sum = self.bias1[h] + row.iter().zip(features).map(|(w, x)| w * x).sum::<f32>();
                sum.max(0.0)
            })
            .collect()
    }

    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        if features.len() != self.feature_len || self.classes.is_empty() || self.hidden_size == 0
        {
            return Vec::new();
        }
        let hidden = self.hidden_size;
        let hidden_act = self.hidden_activations(features);
        let logits: Vec<f32> = (0..self.classes.len())
            .map(|c| {
                let row = &self.weights2[c * hidden..(c + 1) * hidden];
                self.bias2[c] + row.iter().zip(&hidden_act).map(|(w, a)| w * a).sum::<f32>()
            })
            .collect();
        softmax(&logits)
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(&self.predict_proba(features))
    }

    /// Connection-weight importance: `sum_h |w1[h][i]| * sum_c |w2[c][h]|`, normalized.
    pub fn feature_importances(&self) -> Vec<f32> {
        let input = self.feature_len;
        let hidden = self.hidden_size;
        let outgoing: Vec<f32> = (0..hidden)
            .map(|h| {
                (0..self.classes.len())
                    .map(|c| self.weights2[c * hidden + h].abs())
                    .sum()
            })
            .collect();
        let mut scores = vec![0.0f32; input];
        for (h, out) in outgoing.iter().enumerate() {
            let row = &self.weights1[h * input..(h + 1) * input];
            for (score, w) in scores.iter_mut().zip(row) {
                *score += w.abs() * out;
            }
        }
        normalize_importances(scores)
    }
}
