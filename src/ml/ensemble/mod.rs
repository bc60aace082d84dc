//! Weighted ensemble over heterogeneous base models.
//!
//! Members are fitted independently on the same standardized training split and
//! combined as a convex mixture of their class distributions. The combined
//! distribution decides the label; its top probability and top-two margin decide
//! whether the prediction goes to review.

mod persist;
mod prediction;
mod report;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use super::base::{BaseModel, BaseModelKind, build_member};
use super::metrics::{ConfusionMatrix, classification_metrics};
use super::normalize::Standardizer;
use super::split::stratified_split;
use super::{CancelToken, ClassifierError, TrainDataset, argmax};
use crate::config::{EnsembleSettings, ModelSettings};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector, schema_id};

pub use prediction::{
    Assessment, ClassProbability, MemberPrediction, Prediction, UncertaintyReason,
    UncertaintyThresholds,
};
pub use persist::ENSEMBLE_FORMAT_VERSION;
pub use report::{FeatureImportance, MemberReport, TrainingReport, metric_value};

pub(crate) use persist::write_atomic;

use prediction::sanitize_distribution;

/// A labeled feature vector the ensemble can learn from.
pub trait LabeledExample {
    /// Stable identity used to key the stratified split.
    fn key(&self) -> &str;
    fn features(&self) -> &FeatureVector;
    fn label(&self) -> &str;
}

#[derive(Debug)]
struct Member {
    model: Box<dyn BaseModel>,
    weight: f32,
}

/// State that only exists once the ensemble has been trained or loaded.
#[derive(Debug, Clone)]
struct Fitted {
    schema_id: String,
    classes: Vec<String>,
    standardizer: Standardizer,
}

#[derive(Debug)]
pub struct EnsembleClassifier {
    members: Vec<Member>,
    thresholds: UncertaintyThresholds,
    seed: u64,
    fitted: Option<Fitted>,
}

impl EnsembleClassifier {
    /// Assemble an untrained ensemble from explicit members.
    ///
    /// Weights must be finite and non-negative with a positive total.
    pub fn new(
        members: Vec<(Box<dyn BaseModel>, f32)>,
        thresholds: UncertaintyThresholds,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        if members.is_empty() {
            return Err(ClassifierError::InvalidOptions(
                "ensemble needs at least one member".to_string(),
            ));
        }
        if let Some((model, weight)) = members
            .iter()
            .find(|(_, weight)| !weight.is_finite() || *weight < 0.0)
        {
            return Err(ClassifierError::InvalidOptions(format!(
                "member {} has invalid weight {weight}",
                model.name()
            )));
        }
        if members.iter().map(|(_, weight)| weight).sum::<f32>() <= 0.0 {
            return Err(ClassifierError::InvalidOptions(
                "member weights must not all be zero".to_string(),
            ));
        }
        Ok(Self {
            members: members
                .into_iter()
                .map(|(model, weight)| Member { model, weight })
                .collect(),
            thresholds,
            seed,
            fitted: None,
        })
    }

    /// Untrained ensemble described by configuration.
    pub fn from_settings(
        ensemble: &EnsembleSettings,
        model: &ModelSettings,
    ) -> Result<Self, ClassifierError> {
        let members = ensemble
            .members
            .iter()
            .enumerate()
            .map(|(slot, member)| (build_member(member.kind, ensemble, slot), member.weight))
            .collect();
        Self::new(members, UncertaintyThresholds::from(model), ensemble.seed)
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    /// Class labels in distribution order; empty until trained.
    pub fn classes(&self) -> &[String] {
        self.fitted
            .as_ref()
            .map(|fitted| fitted.classes.as_slice())
            .unwrap_or(&[])
    }

    pub fn schema_id(&self) -> Option<&str> {
        self.fitted.as_ref().map(|fitted| fitted.schema_id.as_str())
    }

    pub fn thresholds(&self) -> UncertaintyThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: UncertaintyThresholds) {
        self.thresholds = thresholds;
    }

    /// `(name, kind, normalized weight)` per member.
    pub fn member_weights(&self) -> Vec<(String, BaseModelKind, f32)> {
        let total = self.total_weight();
        self.members
            .iter()
            .map(|member| {
                (
                    member.model.name().to_string(),
                    member.model.kind(),
                    member.weight / total,
                )
            })
            .collect()
    }

    fn total_weight(&self) -> f32 {
        self.members.iter().map(|member| member.weight).sum::<f32>().max(f32::MIN_POSITIVE)
    }

    /// Fit the standardizer and every member, then score on a held-out split.
    ///
    /// On error the ensemble is left untrained.
    pub fn train<S: LabeledExample>(
        &mut self,
        samples: &[S],
        validation_fraction: f32,
        cancel: &CancelToken,
    ) -> Result<TrainingReport, ClassifierError> {
        let started = Instant::now();
        self.fitted = None;
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(ClassifierError::InvalidOptions(format!(
                "validation fraction must be within (0, 1), got {validation_fraction}"
            )));
        }
        if samples.is_empty() {
            return Err(ClassifierError::InsufficientData("no samples".to_string()));
        }
        let expected = schema_id();
        for sample in samples {
            let vector = sample.features();
            if vector.schema_id() != expected || vector.len() != FEATURE_COUNT {
                return Err(ClassifierError::SchemaMismatch {
                    expected: expected.to_string(),
                    found: vector.schema_id().to_string(),
                });
            }
        }

        let classes: Vec<String> = samples
            .iter()
            .map(|sample| sample.label().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.len() < 2 {
            return Err(ClassifierError::InsufficientData(format!(
                "need at least 2 classes, found {}",
                classes.len()
            )));
        }
        let class_index: HashMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(idx, class_id)| (class_id.as_str(), idx))
            .collect();
        let labels: Vec<usize> = samples
            .iter()
            .map(|sample| class_index.get(sample.label()).copied().unwrap_or(0))
            .collect();
        let keys: Vec<&str> = samples.iter().map(|sample| sample.key()).collect();
        let split = stratified_split(&keys, &labels, &classes, self.seed, validation_fraction)?;

        let raw_train: Vec<&[f32]> = split
            .train
            .iter()
            .map(|&row| samples[row].features().values())
            .collect();
        let standardizer = Standardizer::fit(
            &raw_train.iter().map(|row| row.to_vec()).collect::<Vec<_>>(),
            FEATURE_COUNT,
        );
        let train = TrainDataset {
            classes: classes.clone(),
            feature_len: FEATURE_COUNT,
            x: raw_train.iter().map(|row| standardizer.transform(row)).collect(),
            y: split.train.iter().map(|&row| labels[row]).collect(),
        };
        let val_x: Vec<Vec<f32>> = split
            .validation
            .iter()
            .map(|&row| standardizer.transform(samples[row].features().values()))
            .collect();
        let val_y: Vec<usize> = split.validation.iter().map(|&row| labels[row]).collect();

        cancel.check()?;
        self.members
            .par_iter_mut()
            .map(|member| member.model.fit(&train, cancel))
            .collect::<Result<Vec<()>, ClassifierError>>()?;

        self.fitted = Some(Fitted {
            schema_id: expected.to_string(),
            classes: classes.clone(),
            standardizer,
        });

        let mut ensemble_cm = ConfusionMatrix::new(classes.len());
        let mut member_cms = vec![ConfusionMatrix::new(classes.len()); self.members.len()];
        for (row, &truth) in val_x.iter().zip(&val_y) {
            let (combined, per_member) = self.combine(row);
            ensemble_cm.add(truth, argmax(&combined));
            for (cm, (dist, _)) in member_cms.iter_mut().zip(&per_member) {
                cm.add(truth, argmax(dist));
            }
        }

        let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
        for &label in &labels {
            *class_counts.entry(classes[label].clone()).or_default() += 1;
        }
        let total = self.total_weight();
        let members = self
            .members
            .iter()
            .zip(&member_cms)
            .map(|(member, cm)| MemberReport {
                name: member.model.name().to_string(),
                kind: member.model.kind(),
                weight: member.weight / total,
                accuracy: cm.accuracy(),
            })
            .collect();
        let report = TrainingReport {
            metrics: classification_metrics(&ensemble_cm, &classes),
            classes,
            train_samples: split.train.len(),
            validation_samples: split.validation.len(),
            class_counts,
            members,
            feature_importances: self.feature_importances(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Ensemble trained on {} samples ({} validation): accuracy {:.3}, macro F1 {:.3}",
            report.train_samples,
            report.validation_samples,
            report.metrics.accuracy,
            report.metrics.macro_f1
        );
        Ok(report)
    }

    /// Weight-scaled member importances summed per feature, highest first.
    pub fn feature_importances(&self) -> Vec<FeatureImportance> {
        let total = self.total_weight();
        let mut scores = vec![0.0f32; FEATURE_COUNT];
        for member in &self.members {
            let share = member.weight / total;
            for (score, value) in scores.iter_mut().zip(member.model.feature_importances()) {
                if value.is_finite() && value > 0.0 {
                    *score += share * value;
                }
            }
        }
        let mut ranked: Vec<FeatureImportance> = FEATURE_NAMES
            .iter()
            .zip(scores)
            .map(|(name, importance)| FeatureImportance {
                feature: (*name).to_string(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        ranked
    }

    /// Ensemble class distribution for one vector, aligned with [`Self::classes`].
    pub fn predict_proba(&self, vector: &FeatureVector) -> Result<Vec<f32>, ClassifierError> {
        let row = self.prepare(vector)?;
        Ok(self.combine(&row).0)
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<Prediction, ClassifierError> {
        let row = self.prepare(vector)?;
        let classes = self.classes();
        let (combined, per_member) = self.combine(&row);
        let assessment = self.thresholds.assess(&combined);
        let total = self.total_weight();
        let members = self
            .members
            .iter()
            .zip(per_member)
            .map(|(member, (dist, degraded))| {
                let top = argmax(&dist);
                MemberPrediction {
                    name: member.model.name().to_string(),
                    kind: member.model.kind(),
                    weight: member.weight / total,
                    label: classes[top].clone(),
                    confidence: dist[top],
                    probability_of_predicted: dist[assessment.top],
                    degraded,
                }
            })
            .collect();
        Ok(Prediction {
            label: classes[assessment.top].clone(),
            confidence: assessment.confidence,
            margin: assessment.margin,
            probabilities: classes
                .iter()
                .zip(&combined)
                .map(|(label, &probability)| ClassProbability {
                    label: label.clone(),
                    probability,
                })
                .collect(),
            members,
            uncertain: assessment.reason.is_some(),
            uncertainty: assessment.reason,
            version_id: None,
        })
    }

    fn prepare(&self, vector: &FeatureVector) -> Result<Vec<f32>, ClassifierError> {
        let fitted = self.fitted.as_ref().ok_or(ClassifierError::NotTrained)?;
        if vector.schema_id() != fitted.schema_id || vector.len() != fitted.standardizer.dim() {
            return Err(ClassifierError::SchemaMismatch {
                expected: fitted.schema_id.clone(),
                found: vector.schema_id().to_string(),
            });
        }
        Ok(fitted.standardizer.transform(vector.values()))
    }

    /// Convex combination of sanitized member distributions.
    fn combine(&self, row: &[f32]) -> (Vec<f32>, Vec<(Vec<f32>, bool)>) {
        let n_classes = self.classes().len();
        let total = self.total_weight();
        let mut combined = vec![0.0f32; n_classes];
        let mut per_member = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let (dist, degraded) = sanitize_distribution(&member.model.predict_proba(row), n_classes);
            if degraded {
                warn!(
                    "Member {} returned an unusable distribution; using uniform",
                    member.model.name()
                );
            }
            let share = member.weight / total;
            for (acc, p) in combined.iter_mut().zip(&dist) {
                *acc += share * p;
            }
            per_member.push((dist, degraded));
        }
        let sum: f32 = combined.iter().sum();
        if sum > 0.0 && sum.is_finite() {
            combined.iter_mut().for_each(|p| *p /= sum);
        }
        (combined, per_member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;

    struct Example {
        key: String,
        label: String,
        features: FeatureVector,
    }

    impl LabeledExample for Example {
        fn key(&self) -> &str {
            &self.key
        }
        fn features(&self) -> &FeatureVector {
            &self.features
        }
        fn label(&self) -> &str {
            &self.label
        }
    }

    fn example(idx: usize, label: &str, signal: f32) -> Example {
        let mut values = vec![0.0f32; FEATURE_COUNT];
        values[0] = signal + (idx % 7) as f32 * 0.01;
        values[5] = (idx % 3) as f32;
        Example {
            key: format!("m{idx}"),
            label: label.to_string(),
            features: FeatureVector::from_parts(schema_id(), values),
        }
    }

    fn two_class_samples() -> Vec<Example> {
        (0..40)
            .map(|idx| {
                if idx % 2 == 0 {
                    example(idx, "archive", -1.0)
                } else {
                    example(idx, "important", 1.0)
                }
            })
            .collect()
    }

    fn ensemble() -> EnsembleClassifier {
        EnsembleClassifier::from_settings(&EnsembleSettings::default(), &ModelSettings::default())
            .unwrap()
    }

    #[test]
    fn predict_before_training_fails() {
        let vector = FeatureVector::from_parts(schema_id(), vec![0.0; FEATURE_COUNT]);
        assert!(matches!(
            ensemble().predict(&vector),
            Err(ClassifierError::NotTrained)
        ));
    }

    #[test]
    fn trains_and_separates_clear_signal() {
        let mut model = ensemble();
        let report = model
            .train(&two_class_samples(), 0.2, &CancelToken::new())
            .unwrap();
        assert_eq!(report.classes, vec!["archive", "important"]);
        assert_eq!(report.train_samples + report.validation_samples, 40);
        assert_eq!(report.members.len(), 3);
        assert!(report.metrics.accuracy >= 0.9);
        assert_eq!(report.feature_importances[0].feature, FEATURE_NAMES[0]);

        let prediction = model.predict(&example(99, "important", 1.0).features).unwrap();
        assert_eq!(prediction.label, "important");
        let sum: f32 = prediction.probabilities.iter().map(|p| p.probability).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(prediction.members.len(), 3);
    }

    #[test]
    fn member_breakdown_scores_the_ensemble_label() {
        let mut model = ensemble();
        model
            .train(&two_class_samples(), 0.2, &CancelToken::new())
            .unwrap();
        let prediction = model.predict(&example(98, "archive", -0.2).features).unwrap();
        let mut weighted = 0.0f32;
        for member in &prediction.members {
            assert!(member.probability_of_predicted <= member.confidence + 1e-6);
            if member.label == prediction.label {
                assert_eq!(member.probability_of_predicted, member.confidence);
            }
            weighted += member.weight * member.probability_of_predicted;
        }
        assert!((weighted - prediction.confidence).abs() < 1e-4);
    }

    #[test]
    fn single_class_is_insufficient() {
        let samples: Vec<Example> = (0..10).map(|idx| example(idx, "normal", 0.0)).collect();
        let result = ensemble().train(&samples, 0.2, &CancelToken::new());
        assert!(matches!(result, Err(ClassifierError::InsufficientData(_))));
    }

    #[test]
    fn class_with_one_sample_is_insufficient() {
        let samples = vec![
            example(0, "low", 0.0),
            example(1, "low", 0.1),
            example(2, "normal", 0.5),
            example(3, "critical", 1.0),
        ];
        let result = ensemble().train(&samples, 0.2, &CancelToken::new());
        assert!(matches!(result, Err(ClassifierError::InsufficientData(_))));
    }

    #[test]
    fn foreign_schema_is_rejected() {
        let mut samples = two_class_samples();
        samples[3].features = FeatureVector::from_parts("old", vec![0.0; FEATURE_COUNT]);
        let result = ensemble().train(&samples, 0.2, &CancelToken::new());
        assert!(matches!(result, Err(ClassifierError::SchemaMismatch { .. })));
    }

    #[test]
    fn cancelled_training_leaves_ensemble_untrained() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut model = ensemble();
        let result = model.train(&two_class_samples(), 0.2, &cancel);
        assert!(matches!(result, Err(ClassifierError::Cancelled)));
        assert!(!model.is_trained());
    }

    #[test]
    fn zero_total_weight_is_rejected() {
        let settings = EnsembleSettings::default();
        let members = vec![(build_member(BaseModelKind::LogReg, &settings, 0), 0.0)];
        let result = EnsembleClassifier::new(members, UncertaintyThresholds::default(), 0);
        assert!(matches!(result, Err(ClassifierError::InvalidOptions(_))));
    }
}
