use serde::{Deserialize, Serialize};

use crate::ml::ClassifierError;
use crate::ml::logreg::normalize_importances;

/// One-split tree fitted to a round's residuals for a single class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    /// Column of the feature vector tested by the split.
    pub feature_index: u16,
    /// Split point in standardized feature space.
    pub threshold: f32,
    /// Output when the feature is at or below the threshold.
    pub left_value: f32,
    /// Output above the threshold.
    pub right_value: f32,
    /// Reduction in squared residual error achieved by the split.
    #[serde(default)]
    pub gain: f32,
}

impl Stump {
    /// Leaf value for `features`; a missing feature reads as zero.
    pub fn predict(&self, features: &[f32]) -> f32 {
        match features.get(self.feature_index as usize) {
            Some(&value) if value > self.threshold => self.right_value,
            Some(_) => self.left_value,
            None if 0.0 > self.threshold => self.right_value,
            None => self.left_value,
        }
    }
}

/// Softmax-boosted stumps, one per class per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtStumpModel {
    /// Parameter layout version.
    pub model_version: i64,
    /// Expected feature vector width.
    pub feature_len: usize,
    /// Class names in output order.
    pub classes: Vec<String>,
    /// Shrinkage applied to every stump output.
    pub learning_rate: f32,
    /// Log class priors the rounds start from.
    pub init_raw: Vec<f32>,
    /// Indexed `[round][class]`.
    pub stumps: Vec<Vec<Stump>>,
}

impl GbdtStumpModel {
    /// Reject parameter sets whose shapes disagree.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let invalid = |reason: String| Err(ClassifierError::InvalidModel(reason));
        if self.classes.len() < 2 {
            return invalid(format!("gbdt_stump needs 2+ classes, got {}", self.classes.len()));
        }
        if self.init_raw.len() != self.classes.len() {
            return invalid(format!(
                "{} priors for {} classes",
                self.init_raw.len(),
                self.classes.len()
            ));
        }
        for (round_idx, round) in self.stumps.iter().enumerate() {
            if round.len() != self.classes.len() {
                return invalid(format!(
                    "round {round_idx} carries {} stumps for {} classes",
                    round.len(),
                    self.classes.len()
                ));
            }
            if let Some(stump) = round
                .iter()
                .find(|stump| stump.feature_index as usize >= self.feature_len)
            {
                return invalid(format!(
                    "round {round_idx} splits on feature {} beyond length {}",
                    stump.feature_index, self.feature_len
                ));
            }
        }
        Ok(())
    }

    /// Raw per-class scores: the log priors plus every round's shrunken stump output.
    pub fn predict_raw(&self, features: &[f32]) -> Vec<f32> {
        self.stumps.iter().fold(self.init_raw.clone(), |mut raw, round| {
            for (score, stump) in raw.iter_mut().zip(round) {
                *score += self.learning_rate * stump.predict(features);
            }
            raw
        })
    }

    /// Class distribution for `features`.
    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        softmax(&self.predict_raw(features))
    }

    /// Index of the most probable class.
    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(&self.predict_raw(features))
    }

    /// Total split gain per feature, normalized to sum to one.
    pub fn feature_importances(&self) -> Vec<f32> {
        let mut gains = vec![0.0f32; self.feature_len];
        for stump in self.stumps.iter().flatten() {
            if let Some(slot) = gains.get_mut(stump.feature_index as usize) {
                *slot += stump.gain.max(0.0);
            }
        }
        normalize_importances(gains)
    }
}

/// Numerically stable softmax; falls back to uniform when the logits overflow.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    let peak = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|&logit| (logit - peak).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.into_iter().map(|e| e / total).collect()
    } else {
        vec![1.0 / raw.len().max(1) as f32; raw.len()]
    }
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, top), (idx, &value)| {
            if value > top { (idx, value) } else { (best, top) }
        })
        .0
}
