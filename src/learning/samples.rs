use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::features::FeatureVector;
use crate::ml::LabeledExample;

/// Priority classes a message can be triaged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Important,
    Normal,
    Low,
    Archive,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::Important,
        Priority::Normal,
        Priority::Low,
        Priority::Archive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Important => "important",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Archive => "archive",
        }
    }

    /// Ordinal score in [0, 1], used for a sender's running average priority.
    pub fn score(self) -> f32 {
        match self {
            Priority::Critical => 1.0,
            Priority::Important => 0.75,
            Priority::Normal => 0.5,
            Priority::Low => 0.25,
            Priority::Archive => 0.0,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPriority(pub String);

impl fmt::Display for UnknownPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown priority '{}'", self.0)
    }
}

impl std::error::Error for UnknownPriority {}

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Priority::ALL
            .into_iter()
            .find(|priority| priority.as_str() == needle)
            .ok_or_else(|| UnknownPriority(s.to_string()))
    }
}

/// Where a sample's label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrigin {
    /// A human correction; always validated.
    Feedback,
    /// Heuristic label from the bootstrap rules.
    Bootstrap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub message_id: String,
    pub features: FeatureVector,
    pub label: Priority,
    pub validated: bool,
    pub origin: SampleOrigin,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    /// Raw `From` value, when known.
    #[serde(default)]
    pub sender: Option<String>,
}

impl TrainingSample {
    pub fn feedback(message_id: impl Into<String>, features: FeatureVector, label: Priority) -> Self {
        Self {
            message_id: message_id.into(),
            features,
            label,
            validated: true,
            origin: SampleOrigin::Feedback,
            recorded_at: OffsetDateTime::now_utc(),
            sender: None,
        }
    }

    pub fn bootstrap(message_id: impl Into<String>, features: FeatureVector, label: Priority) -> Self {
        Self {
            message_id: message_id.into(),
            features,
            label,
            validated: false,
            origin: SampleOrigin::Bootstrap,
            recorded_at: OffsetDateTime::now_utc(),
            sender: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

impl LabeledExample for TrainingSample {
    fn key(&self) -> &str {
        &self.message_id
    }

    fn features(&self) -> &FeatureVector {
        &self.features
    }

    fn label(&self) -> &str {
        self.label.as_str()
    }
}

/// Outcome of offering a sample to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Inserted,
    Replaced,
    /// A bootstrap label was offered for a message that already has a validated one.
    KeptValidated,
}

/// One sample per message id; validated labels win over bootstrap labels.
#[derive(Debug, Default, Clone)]
pub struct SampleBuffer {
    samples: BTreeMap<String, TrainingSample>,
    /// Message ids given a validated label since the last training run.
    validated_since_training: BTreeSet<String>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, sample: TrainingSample) -> Admission {
        let existing = self.samples.get(&sample.message_id);
        if existing.is_some_and(|current| current.validated) && !sample.validated {
            return Admission::KeptValidated;
        }
        if sample.validated {
            self.validated_since_training.insert(sample.message_id.clone());
        }
        match self.samples.insert(sample.message_id.clone(), sample) {
            Some(_) => Admission::Replaced,
            None => Admission::Inserted,
        }
    }

    pub fn get(&self, message_id: &str) -> Option<&TrainingSample> {
        self.samples.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn validated_count(&self) -> usize {
        self.samples.values().filter(|sample| sample.validated).count()
    }

    /// Distinct messages validated since the last training run. Relabelling one
    /// message counts once.
    pub fn validated_since_training(&self) -> usize {
        self.validated_since_training.len()
    }

    pub fn mark_trained(&mut self) {
        self.validated_since_training.clear();
    }

    /// Samples in message-id order, optionally restricted to validated ones.
    pub fn training_set(&self, validated_only: bool) -> Vec<TrainingSample> {
        self.samples
            .values()
            .filter(|sample| !validated_only || sample.validated)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrainingSample> {
        self.samples.values()
    }
}
