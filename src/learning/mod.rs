//! Active learning: collect labels, retrain on demand, gate promotion on validation quality.
//!
//! A cycle moves `Collecting -> Training -> Evaluating -> Promoted | Rejected` and then
//! back to collecting. Any failure during training leaves the active version untouched.

mod bootstrap;
mod observed;
mod registry;
mod review;
mod samples;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

pub use bootstrap::{BOOTSTRAP_RULESET_VERSION, WeakLabel, bootstrap_label, weak_labels_for_message};
pub use registry::{
    DirectoryVersionStore, ModelRegistry, ModelVersion, StoreError, StoredVersions, VersionEntry,
    VersionListing, VersionStore,
};
pub use review::{ReviewItem, ReviewQueue};
pub use samples::{Admission, Priority, SampleBuffer, SampleOrigin, TrainingSample, UnknownPriority};

use crate::config::{EnsembleSettings, LearningSettings, ModelSettings, PrimaryMetric, TriageConfig};
use crate::features::{FeatureExtractor, FeatureVector, SenderStatsStore};
use crate::message::Message;
use crate::ml::{CancelToken, ClassifierError, EnsembleClassifier, Prediction, TrainingReport};
use observed::{Observed, ObservedCache};

#[derive(Debug, Error)]
pub enum LearningError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("A training run is already in progress")]
    TrainingInProgress,
    #[error("No observed message with id {0}")]
    UnknownMessage(String),
    #[error("No model version with id {0}")]
    UnknownVersion(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where the learning cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Collecting,
    Training,
    Evaluating,
    Promoted,
    Rejected,
}

/// Record of one evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub outcome: CycleState,
    pub metric: PrimaryMetric,
    pub candidate_score: f32,
    pub active_score: Option<f32>,
    pub training_samples: usize,
    /// Id of the promoted version; `None` for rejections.
    pub version_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub enum RetrainOutcome {
    Promoted {
        version: ModelVersion,
        report: TrainingReport,
    },
    Rejected {
        candidate_score: f32,
        active_score: f32,
        report: TrainingReport,
    },
}

impl RetrainOutcome {
    pub fn is_promoted(&self) -> bool {
        matches!(self, RetrainOutcome::Promoted { .. })
    }

    pub fn report(&self) -> &TrainingReport {
        match self {
            RetrainOutcome::Promoted { report, .. } | RetrainOutcome::Rejected { report, .. } => {
                report
            }
        }
    }
}

/// Clears the in-progress flag however the training run ends, and returns an
/// interrupted cycle to `Collecting`.
struct TrainingGuard<'a> {
    flag: &'a AtomicBool,
    state: &'a Mutex<CycleState>,
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if matches!(*state, CycleState::Training | CycleState::Evaluating) {
            *state = CycleState::Collecting;
        }
        drop(state);
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct ActiveLearner {
    learning: LearningSettings,
    ensemble: EnsembleSettings,
    model: ModelSettings,
    extractor: FeatureExtractor,
    sender_stats: Arc<SenderStatsStore>,
    observed: Mutex<ObservedCache>,
    samples: Mutex<SampleBuffer>,
    review: Mutex<ReviewQueue>,
    registry: ModelRegistry,
    state: Mutex<CycleState>,
    training: AtomicBool,
    audit: Mutex<Vec<AuditRecord>>,
}

impl ActiveLearner {
    pub fn new(config: &TriageConfig, sender_stats: Arc<SenderStatsStore>) -> Self {
        Self::with_registry(config, sender_stats, ModelRegistry::new())
    }

    pub fn with_registry(
        config: &TriageConfig,
        sender_stats: Arc<SenderStatsStore>,
        registry: ModelRegistry,
    ) -> Self {
        Self {
            learning: config.learning.clone(),
            ensemble: config.ensemble.clone(),
            model: config.model.clone(),
            extractor: FeatureExtractor::new(),
            sender_stats,
            observed: Mutex::new(ObservedCache::new(config.learning.observed_capacity)),
            samples: Mutex::new(SampleBuffer::new()),
            review: Mutex::new(ReviewQueue::new()),
            registry,
            state: Mutex::new(CycleState::Collecting),
            training: AtomicBool::new(false),
            audit: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn state(&self) -> CycleState {
        *lock(&self.state)
    }

    fn set_state(&self, state: CycleState) {
        *lock(&self.state) = state;
    }

    /// Extract features for `message` and remember them for later feedback.
    pub fn observe(&self, message: &Message) -> FeatureVector {
        let stats = self.sender_stats.get(&message.sender);
        let features = self.extractor.extract(message, stats.as_ref());
        self.remember(message, features.clone());
        features
    }

    /// Parallel extraction against a point-in-time snapshot of sender statistics.
    pub fn observe_batch(&self, messages: &[Message]) -> Vec<FeatureVector> {
        let snapshot = self.sender_stats.snapshot();
        let vectors = self.extractor.extract_batch(messages, &snapshot);
        for (message, features) in messages.iter().zip(&vectors) {
            self.remember(message, features.clone());
        }
        vectors
    }

    fn remember(&self, message: &Message, features: FeatureVector) {
        lock(&self.observed).insert(
            &message.id,
            Observed {
                sender: message.sender.clone(),
                features,
            },
        );
    }

    /// Label `message` with the bootstrap rules when a rule is confident enough.
    pub fn offer_bootstrap(&self, message: &Message) -> Option<WeakLabel> {
        let weak = bootstrap_label(message, self.learning.bootstrap_min_confidence)?;
        let known = lock(&self.observed)
            .get(&message.id)
            .map(|observed| observed.features.clone());
        let features = match known {
            Some(features) => features,
            None => self.observe(message),
        };
        let admission = lock(&self.samples).offer(
            TrainingSample::bootstrap(message.id.as_str(), features, weak.label)
                .with_sender(message.sender.as_str()),
        );
        if admission == Admission::KeptValidated {
            return None;
        }
        Some(weak)
    }

    /// Store a human correction for an observed or already labelled message.
    ///
    /// The sample replaces any earlier one for the message, the sender's average
    /// priority moves toward the label, and any pending review item is resolved. The
    /// observation is released once the sample holds its features.
    pub fn record_feedback(&self, message_id: &str, label: Priority) -> Result<(), LearningError> {
        let taken = lock(&self.observed).take(message_id);
        let mut samples = lock(&self.samples);
        let (features, sender) = match taken {
            Some(observed) => (observed.features, Some(observed.sender)),
            None => {
                let sample = samples
                    .get(message_id)
                    .ok_or_else(|| LearningError::UnknownMessage(message_id.to_string()))?;
                (sample.features.clone(), sample.sender.clone())
            }
        };
        let mut sample = TrainingSample::feedback(message_id, features, label);
        if let Some(sender) = &sender {
            sample = sample.with_sender(sender.as_str());
        }
        samples.offer(sample);
        drop(samples);
        if let Some(sender) = &sender {
            self.sender_stats.record_priority(sender, label.score());
        }
        lock(&self.review).resolve(message_id);
        info!("Recorded feedback {label} for {message_id}");
        Ok(())
    }

    /// Enough new validated labels have arrived since the last training run.
    pub fn should_retrain(&self) -> bool {
        let samples = lock(&self.samples);
        samples.len() >= self.learning.min_training_samples
            && samples.validated_since_training() >= self.learning.retrain_threshold
    }

    pub fn samples(&self) -> Vec<TrainingSample> {
        lock(&self.samples).iter().cloned().collect()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.samples).len()
    }

    /// Train a candidate and promote it if it matches or beats the active version.
    ///
    /// Rejects concurrent calls with `TrainingInProgress`. On any error the active
    /// version keeps serving.
    pub fn retrain(&self, cancel: &CancelToken) -> Result<RetrainOutcome, LearningError> {
        if self
            .training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LearningError::TrainingInProgress);
        }
        let _guard = TrainingGuard {
            flag: &self.training,
            state: &self.state,
        };
        self.set_state(CycleState::Training);

        let result = self.run_cycle(cancel);
        if let Err(err) = &result {
            warn!("Retraining failed, keeping active model: {err}");
            self.set_state(CycleState::Collecting);
        }
        result
    }

    fn run_cycle(&self, cancel: &CancelToken) -> Result<RetrainOutcome, LearningError> {
        let (training_set, validated) = {
            let samples = lock(&self.samples);
            (
                samples.training_set(self.learning.validated_only),
                samples.validated_count(),
            )
        };
        if training_set.len() < self.learning.min_training_samples {
            return Err(ClassifierError::InsufficientData(format!(
                "{} samples, need {}",
                training_set.len(),
                self.learning.min_training_samples
            ))
            .into());
        }
        let cancel = match self.learning.training_timeout_secs {
            Some(secs) => cancel.child_with_timeout(Duration::from_secs(secs)),
            None => cancel.clone(),
        };

        let mut candidate = EnsembleClassifier::from_settings(&self.ensemble, &self.model)?;
        let report = candidate.train(&training_set, self.ensemble.validation_fraction, &cancel)?;
        self.set_state(CycleState::Evaluating);

        let metric = self.learning.primary_metric;
        let candidate_score = report.score(metric);
        let active_score = self
            .registry
            .active_version()
            .map(|version| version.score(metric));
        let margin = self.learning.promotion_margin.max(0.0);
        let accept = active_score.is_none_or(|active| candidate_score >= active + margin);

        let outcome = if accept {
            let version = ModelVersion::from_report(
                self.registry.next_sequence(),
                &report,
                validated,
                metric,
            );
            self.registry.promote(VersionEntry {
                version: version.clone(),
                ensemble: candidate,
            })?;
            RetrainOutcome::Promoted { version, report }
        } else {
            let active_score = active_score.unwrap_or_default();
            warn!(
                "Rejected candidate model: score {candidate_score:.3} < active {active_score:.3} + margin {margin:.3}"
            );
            RetrainOutcome::Rejected {
                candidate_score,
                active_score,
                report,
            }
        };

        let state = if accept {
            CycleState::Promoted
        } else {
            CycleState::Rejected
        };
        lock(&self.audit).push(AuditRecord {
            at: OffsetDateTime::now_utc(),
            outcome: state,
            metric,
            candidate_score,
            active_score,
            training_samples: training_set.len(),
            version_id: match &outcome {
                RetrainOutcome::Promoted { version, .. } => Some(version.id),
                RetrainOutcome::Rejected { .. } => None,
            },
        });
        lock(&self.samples).mark_trained();
        self.set_state(state);
        Ok(outcome)
    }

    /// Predict with the active version.
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, LearningError> {
        let entry = self.registry.active().ok_or(ClassifierError::NotTrained)?;
        let mut prediction = entry.ensemble.predict(features)?;
        prediction.version_id = Some(entry.version.id);
        Ok(prediction)
    }

    /// Observe, predict and route uncertain predictions to review.
    pub fn classify(&self, message: &Message) -> Result<Prediction, LearningError> {
        let features = self.observe(message);
        self.classify_features(&message.id, &features)
    }

    /// Predict for already observed features and route uncertain results to review.
    pub fn classify_features(
        &self,
        message_id: &str,
        features: &FeatureVector,
    ) -> Result<Prediction, LearningError> {
        let prediction = self.predict(features)?;
        lock(&self.review).register(message_id, &prediction);
        Ok(prediction)
    }

    pub fn review_candidates(&self, limit: usize) -> Vec<ReviewItem> {
        lock(&self.review).candidates(limit)
    }

    pub fn pending_reviews(&self) -> usize {
        lock(&self.review).len()
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        lock(&self.audit).clone()
    }

    pub fn rollback(&self, id: Uuid) -> Result<ModelVersion, LearningError> {
        self.registry.rollback(id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AccountId;

    fn config() -> TriageConfig {
        let mut config = TriageConfig::default();
        config.learning.min_training_samples = 10;
        config.learning.retrain_threshold = 4;
        config
    }

    fn message(idx: usize, urgent: bool) -> Message {
        let (sender, subject) = if urgent {
            (format!("boss{}@corp.example", idx % 3), format!("Urgent: outage {idx}"))
        } else {
            (format!("news{}@shop.example", idx % 3), format!("Weekly deals {idx}"))
        };
        let mut msg = Message::new(format!("m{idx}"), AccountId::new("work"), sender)
            .with_subject(subject);
        if !urgent {
            msg = msg.with_header("List-Unsubscribe", "<mailto:x@shop.example>");
        }
        msg
    }

    fn learner() -> ActiveLearner {
        ActiveLearner::new(&config(), Arc::new(SenderStatsStore::new()))
    }

    #[test]
    fn feedback_for_unknown_message_fails() {
        let result = learner().record_feedback("missing", Priority::Low);
        assert!(matches!(result, Err(LearningError::UnknownMessage(_))));
    }

    #[test]
    fn feedback_updates_sender_priority_and_trigger() {
        let stats = Arc::new(SenderStatsStore::new());
        let learner = ActiveLearner::new(&config(), Arc::clone(&stats));
        for idx in 0..10 {
            learner.observe(&message(idx, idx % 2 == 0));
        }
        for idx in 0..4 {
            learner.record_feedback(&format!("m{idx}"), Priority::Critical).unwrap();
        }
        assert!(!learner.should_retrain());
        for idx in 4..10 {
            learner.record_feedback(&format!("m{idx}"), Priority::Normal).unwrap();
        }
        assert!(learner.should_retrain());
        let boss = stats.get("boss0@corp.example").unwrap();
        assert!(boss.priority_or_neutral() > 0.5);
    }

    #[test]
    fn too_few_samples_keeps_collecting() {
        let learner = learner();
        learner.observe(&message(0, true));
        learner.record_feedback("m0", Priority::Critical).unwrap();
        let result = learner.retrain(&CancelToken::new());
        assert!(matches!(
            result,
            Err(LearningError::Classifier(ClassifierError::InsufficientData(_)))
        ));
        assert_eq!(learner.state(), CycleState::Collecting);
        assert!(learner.registry().active().is_none());
    }

    #[test]
    fn first_candidate_is_promoted_and_serves_predictions() {
        let learner = learner();
        for idx in 0..30 {
            let msg = message(idx, idx % 2 == 0);
            learner.observe(&msg);
            assert!(learner.offer_bootstrap(&msg).is_some());
        }
        let outcome = learner.retrain(&CancelToken::new()).unwrap();
        assert!(outcome.is_promoted());
        assert_eq!(learner.state(), CycleState::Promoted);

        let prediction = learner.classify(&message(100, true)).unwrap();
        assert_eq!(prediction.label, "critical");
        assert_eq!(
            prediction.version_id,
            learner.registry().active_version().map(|version| version.id)
        );
        assert_eq!(learner.audit_log().len(), 1);
    }

    #[test]
    fn cancelled_retrain_keeps_previous_version() {
        let learner = learner();
        for idx in 0..30 {
            let msg = message(idx, idx % 2 == 0);
            learner.offer_bootstrap(&msg);
        }
        learner.retrain(&CancelToken::new()).unwrap();
        let active = learner.registry().active_version().unwrap().id;

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = learner.retrain(&cancel);
        assert!(matches!(
            result,
            Err(LearningError::Classifier(ClassifierError::Cancelled))
        ));
        assert_eq!(learner.registry().active_version().unwrap().id, active);
        assert_eq!(learner.registry().len(), 1);
    }

    #[test]
    fn positive_margin_rejects_equal_candidate() {
        let mut config = config();
        config.learning.promotion_margin = 0.5;
        let learner = ActiveLearner::new(&config, Arc::new(SenderStatsStore::new()));
        for idx in 0..30 {
            learner.offer_bootstrap(&message(idx, idx % 2 == 0));
        }
        assert!(learner.retrain(&CancelToken::new()).unwrap().is_promoted());
        let outcome = learner.retrain(&CancelToken::new()).unwrap();
        assert!(!outcome.is_promoted());
        assert_eq!(learner.state(), CycleState::Rejected);
        assert_eq!(learner.registry().len(), 1);
        let audit = learner.audit_log();
        assert_eq!(audit[1].outcome, CycleState::Rejected);
        assert!(audit[1].version_id.is_none());
    }

    #[test]
    fn relabelling_one_message_does_not_trigger_retrain() {
        let mut config = config();
        config.learning.min_training_samples = 1;
        config.learning.retrain_threshold = 5;
        let learner = ActiveLearner::new(&config, Arc::new(SenderStatsStore::new()));
        learner.observe(&message(0, true));
        for _ in 0..5 {
            learner.record_feedback("m0", Priority::Low).unwrap();
        }
        assert_eq!(learner.sample_count(), 1);
        assert!(!learner.should_retrain());
    }

    #[test]
    fn feedback_releases_the_observation() {
        let stats = Arc::new(SenderStatsStore::new());
        let learner = ActiveLearner::new(&config(), Arc::clone(&stats));
        learner.observe(&message(0, true));
        learner.observe(&message(1, false));
        assert_eq!(lock(&learner.observed).len(), 2);

        learner.record_feedback("m0", Priority::Critical).unwrap();
        assert_eq!(lock(&learner.observed).len(), 1);

        // A later correction reuses the stored sample and still reaches the sender.
        learner.record_feedback("m0", Priority::Archive).unwrap();
        let sample = learner.samples().into_iter().find(|s| s.message_id == "m0").unwrap();
        assert_eq!(sample.label, Priority::Archive);
        assert_eq!(sample.sender.as_deref(), Some("boss0@corp.example"));
        assert_eq!(stats.get("boss0@corp.example").unwrap().priority_samples, 2);
    }

    #[test]
    fn observations_are_capped() {
        let mut config = config();
        config.learning.observed_capacity = 3;
        let learner = ActiveLearner::new(&config, Arc::new(SenderStatsStore::new()));
        for idx in 0..10 {
            learner.observe(&message(idx, true));
        }
        assert_eq!(lock(&learner.observed).len(), 3);
        assert!(matches!(
            learner.record_feedback("m0", Priority::Low),
            Err(LearningError::UnknownMessage(_))
        ));
        learner.record_feedback("m9", Priority::Low).unwrap();
    }

    #[test]
    fn interrupted_cycle_returns_to_collecting() {
        let learner = learner();
        learner.training.store(true, Ordering::Release);
        learner.set_state(CycleState::Evaluating);
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = TrainingGuard {
                flag: &learner.training,
                state: &learner.state,
            };
            panic!("training aborted");
        }));
        assert!(unwound.is_err());
        assert_eq!(learner.state(), CycleState::Collecting);
        assert!(!learner.training.load(Ordering::Acquire));
    }
}
