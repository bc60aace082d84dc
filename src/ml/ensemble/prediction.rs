use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::super::BaseModelKind;
use crate::config::ModelSettings;

/// Why a prediction was routed to review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyReason {
    /// Top probability is below the low-confidence threshold.
    LowConfidence,
    /// Top two classes are closer than the margin threshold.
    NarrowMargin,
    LowConfidenceAndNarrowMargin,
}

/// Review-routing thresholds; either condition alone marks a prediction uncertain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyThresholds {
    pub low_confidence: f32,
    pub margin: f32,
}

impl Default for UncertaintyThresholds {
    fn default() -> Self {
        Self::from(&ModelSettings::default())
    }
}

impl From<&ModelSettings> for UncertaintyThresholds {
    fn from(settings: &ModelSettings) -> Self {
        Self {
            low_confidence: settings.low_confidence_threshold,
            margin: settings.uncertainty_margin,
        }
    }
}

/// Top class, its probability and its lead over the runner-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub top: usize,
    pub confidence: f32,
    pub margin: f32,
    pub reason: Option<UncertaintyReason>,
}

impl UncertaintyThresholds {
    pub fn assess(&self, probabilities: &[f32]) -> Assessment {
        let mut top = 0usize;
        let mut first = f32::NEG_INFINITY;
        let mut second = 0.0f32;
        for (idx, &p) in probabilities.iter().enumerate() {
            if p > first {
                if first.is_finite() {
                    second = first;
                }
                first = p;
                top = idx;
            } else if p > second {
                second = p;
            }
        }
        let confidence = if first.is_finite() { first } else { 0.0 };
        let margin = (confidence - second).max(0.0);
        let low = confidence < self.low_confidence;
        let narrow = margin < self.margin;
        let reason = match (low, narrow) {
            (true, true) => Some(UncertaintyReason::LowConfidenceAndNarrowMargin),
            (true, false) => Some(UncertaintyReason::LowConfidence),
            (false, true) => Some(UncertaintyReason::NarrowMargin),
            (false, false) => None,
        };
        Assessment {
            top,
            confidence,
            margin,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f32,
}

/// One member's vote for a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPrediction {
    pub name: String,
    pub kind: BaseModelKind,
    /// Normalized weight used in the combination.
    pub weight: f32,
    /// The member's own top class and its probability.
    pub label: String,
    pub confidence: f32,
    /// The member's probability for the ensemble's predicted class; low values mark
    /// disagreement with the combined vote.
    #[serde(default)]
    pub probability_of_predicted: f32,
    /// Member returned an unusable distribution and was replaced by a uniform one.
    #[serde(default)]
    pub degraded: bool,
}

/// Ensemble output for one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    /// Top probability minus the runner-up.
    pub margin: f32,
    /// Ensemble distribution in class order.
    pub probabilities: Vec<ClassProbability>,
    pub members: Vec<MemberPrediction>,
    pub uncertain: bool,
    pub uncertainty: Option<UncertaintyReason>,
    /// Model version that produced the prediction, when served from the registry.
    #[serde(default)]
    pub version_id: Option<Uuid>,
}

impl Prediction {
    pub fn probability_of(&self, label: &str) -> Option<f32> {
        self.probabilities
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.probability)
    }
}

/// Repair a member distribution so it is non-negative and sums to one.
///
/// Returns the repaired distribution and whether the input had to be replaced wholesale.
pub(crate) fn sanitize_distribution(raw: &[f32], n_classes: usize) -> (Vec<f32>, bool) {
    let uniform = || vec![1.0 / n_classes.max(1) as f32; n_classes];
    if raw.len() != n_classes {
        return (uniform(), true);
    }
    let cleaned: Vec<f32> = raw
        .iter()
        .map(|&p| if p.is_finite() && p > 0.0 { p } else { 0.0 })
        .collect();
    let sum: f32 = cleaned.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return (uniform(), true);
    }
    (cleaned.into_iter().map(|p| p / sum).collect(), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> UncertaintyThresholds {
        UncertaintyThresholds {
            low_confidence: 0.3,
            margin: 0.1,
        }
    }

    #[test]
    fn narrow_margin_alone_marks_uncertain() {
        let assessment = thresholds().assess(&[0.52, 0.48, 0.0, 0.0, 0.0]);
        assert_eq!(assessment.top, 0);
        assert!((assessment.confidence - 0.52).abs() < 1e-6);
        assert!((assessment.margin - 0.04).abs() < 1e-6);
        assert_eq!(assessment.reason, Some(UncertaintyReason::NarrowMargin));
    }

    #[test]
    fn low_confidence_alone_marks_uncertain() {
        let thresholds = UncertaintyThresholds {
            low_confidence: 0.5,
            margin: 0.05,
        };
        let assessment = thresholds.assess(&[0.1, 0.45, 0.25, 0.2]);
        assert_eq!(assessment.top, 1);
        assert_eq!(assessment.reason, Some(UncertaintyReason::LowConfidence));
    }

    #[test]
    fn confident_prediction_is_certain() {
        let assessment = thresholds().assess(&[0.1, 0.8, 0.1]);
        assert_eq!(assessment.reason, None);
        assert!((assessment.margin - 0.7).abs() < 1e-6);
    }

    #[test]
    fn runner_up_found_when_it_precedes_winner() {
        let assessment = thresholds().assess(&[0.3, 0.05, 0.65]);
        assert_eq!(assessment.top, 2);
        assert!((assessment.margin - 0.35).abs() < 1e-6);
    }

    #[test]
    fn sanitize_repairs_or_replaces() {
        let (dist, degraded) = sanitize_distribution(&[2.0, f32::NAN, -1.0, 2.0], 4);
        assert!(!degraded);
        assert_eq!(dist, vec![0.5, 0.0, 0.0, 0.5]);
        let (dist, degraded) = sanitize_distribution(&[0.0, 0.0], 2);
        assert!(degraded);
        assert_eq!(dist, vec![0.5, 0.5]);
        let (_, degraded) = sanitize_distribution(&[1.0], 3);
        assert!(degraded);
    }
}
