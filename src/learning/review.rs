use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ml::{Prediction, UncertaintyReason};

/// An uncertain prediction waiting for a human label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub message_id: String,
    pub predicted: String,
    pub confidence: f32,
    pub margin: f32,
    pub reason: Option<UncertaintyReason>,
    #[serde(with = "time::serde::rfc3339")]
    pub queued_at: OffsetDateTime,
}

impl ReviewItem {
    pub fn from_prediction(message_id: impl Into<String>, prediction: &Prediction) -> Self {
        Self {
            message_id: message_id.into(),
            predicted: prediction.label.clone(),
            confidence: prediction.confidence,
            margin: prediction.margin,
            reason: prediction.uncertainty,
            queued_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Pending uncertain predictions keyed by message id.
#[derive(Debug, Default, Clone)]
pub struct ReviewQueue {
    items: HashMap<String, ReviewItem>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `prediction` if uncertain; a confident re-prediction clears any pending item.
    pub fn register(&mut self, message_id: &str, prediction: &Prediction) -> bool {
        if prediction.uncertain {
            self.items.insert(
                message_id.to_string(),
                ReviewItem::from_prediction(message_id, prediction),
            );
            true
        } else {
            self.items.remove(message_id);
            false
        }
    }

    pub fn resolve(&mut self, message_id: &str) -> Option<ReviewItem> {
        self.items.remove(message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.items.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Up to `limit` items, least confident first.
    pub fn candidates(&self, limit: usize) -> Vec<ReviewItem> {
        let mut items: Vec<&ReviewItem> = self.items.values().collect();
        items.sort_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then_with(|| a.margin.total_cmp(&b.margin))
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        items.into_iter().take(limit).cloned().collect()
    }
}
