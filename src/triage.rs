//! End-to-end pipeline: fetch and merge accounts, classify, collect feedback, retrain.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, TriageConfig};
use crate::features::{SenderStatsStore, UserAction};
use crate::ingest::{Fingerprint, MessageSource, ingest_unified};
use crate::learning::{
    ActiveLearner, DirectoryVersionStore, LearningError, ModelRegistry, Priority, RetrainOutcome,
    StoreError,
};
use crate::message::{AccountId, Message};
use crate::ml::{CancelToken, Prediction};

#[derive(Debug, Error)]
pub enum TriageError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Unified view of one ingestion pass.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub messages: Vec<Message>,
    pub fetched: usize,
    pub duplicates_removed: usize,
    pub duplicates_by_account: BTreeMap<AccountId, usize>,
    /// Accounts whose fetch failed, with the reason.
    pub failures: BTreeMap<AccountId, String>,
}

#[derive(Debug)]
pub struct Triaged {
    pub message_id: String,
    pub result: Result<Prediction, LearningError>,
}

#[derive(Debug)]
pub struct TriageEngine {
    config: TriageConfig,
    sender_stats: Arc<SenderStatsStore>,
    learner: ActiveLearner,
    /// Fingerprints already counted as seen by an earlier ingestion pass.
    counted: DashSet<Fingerprint>,
}

impl TriageEngine {
    /// Engine with an in-memory model registry.
    pub fn new(config: TriageConfig) -> Result<Self, TriageError> {
        Self::with_registry(config, ModelRegistry::new())
    }

    /// Engine whose promoted versions persist under the application's models directory.
    pub fn open_persistent(config: TriageConfig) -> Result<Self, TriageError> {
        let store = DirectoryVersionStore::at_default_location()?;
        info!("Model versions stored in {}", store.root().display());
        let registry = ModelRegistry::open(Box::new(store))?;
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: TriageConfig, registry: ModelRegistry) -> Result<Self, TriageError> {
        config.validate()?;
        let sender_stats = Arc::new(SenderStatsStore::new());
        let learner = ActiveLearner::with_registry(&config, Arc::clone(&sender_stats), registry);
        Ok(Self {
            config,
            sender_stats,
            learner,
            counted: DashSet::new(),
        })
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn learner(&self) -> &ActiveLearner {
        &self.learner
    }

    pub fn sender_stats(&self) -> &SenderStatsStore {
        &self.sender_stats
    }

    /// Fetch every account, deduplicate, and count each unique message as seen.
    ///
    /// A message already counted by an earlier pass is not counted again.
    pub fn ingest(&self, sources: &[&dyn MessageSource]) -> IngestReport {
        let (outcome, report) = ingest_unified(sources, &self.config.accounts);
        let mut recounted = 0usize;
        for message in &outcome.messages {
            if self.counted.insert(Fingerprint::of(message)) {
                self.sender_stats.record_action(&message.sender, UserAction::Seen);
            } else {
                recounted += 1;
            }
        }
        if recounted > 0 {
            debug!("{recounted} messages were already counted by an earlier pass");
        }
        let fetched = outcome.messages.len() + outcome.duplicates_removed;
        info!(
            "Ingested {} unique messages from {} accounts ({} duplicates, {} failed)",
            outcome.messages.len(),
            sources.len(),
            outcome.duplicates_removed,
            report.failures.len()
        );
        IngestReport {
            messages: outcome.messages,
            fetched,
            duplicates_removed: outcome.duplicates_removed,
            duplicates_by_account: outcome.duplicates_by_account,
            failures: report.failures,
        }
    }

    /// Label messages with the bootstrap rules; returns how many were accepted.
    pub fn bootstrap(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .filter(|message| self.learner.offer_bootstrap(message).is_some())
            .count()
    }

    pub fn classify(&self, message: &Message) -> Result<Prediction, LearningError> {
        self.learner.classify(message)
    }

    /// Extract in parallel, then predict each message with the active version.
    pub fn classify_all(&self, messages: &[Message]) -> Vec<Triaged> {
        let vectors = self.learner.observe_batch(messages);
        messages
            .iter()
            .zip(&vectors)
            .map(|(message, features)| Triaged {
                message_id: message.id.clone(),
                result: self.learner.classify_features(&message.id, features),
            })
            .collect()
    }

    pub fn record_feedback(&self, message_id: &str, label: Priority) -> Result<(), LearningError> {
        self.learner.record_feedback(message_id, label)
    }

    pub fn record_action(&self, sender: &str, action: UserAction) {
        self.sender_stats.record_action(sender, action);
    }

    pub fn retrain(&self, cancel: &CancelToken) -> Result<RetrainOutcome, LearningError> {
        self.learner.retrain(cancel)
    }

    /// Retrain only when enough new validated labels have accumulated.
    pub fn retrain_if_due(
        &self,
        cancel: &CancelToken,
    ) -> Option<Result<RetrainOutcome, LearningError>> {
        self.learner
            .should_retrain()
            .then(|| self.learner.retrain(cancel))
    }
}
