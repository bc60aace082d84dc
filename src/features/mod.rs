//! Fixed-schema numeric features for one message.
//!
//! The schema is the ordered [`FEATURE_NAMES`] list. Its identity is a blake3 hash of
//! the version tag and every name in order, so any reordering, rename or addition
//! yields a new [`schema_id`] and invalidates models trained against the old one.

mod extract;
mod keywords;
mod sender_stats;

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub use extract::FeatureExtractor;
pub use sender_stats::{
    SenderStats, SenderStatsLookup, SenderStatsStore, UserAction, sender_address,
};

/// Bump whenever [`FEATURE_NAMES`] or the meaning of any feature changes.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Ordered feature names. Grouped by source: header metadata, content, sender,
/// timing, structure, then per-sender behaviour.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // metadata
    "has_list_unsubscribe",
    "has_bulk_precedence",
    "has_marketing_headers",
    "has_auto_submitted",
    "has_autoreply",
    "sent_via_api",
    "mailer_is_automated",
    "spf_pass",
    "has_dkim",
    "header_count",
    // content
    "subject_length",
    "subject_has_re",
    "subject_has_fwd",
    "subject_all_caps_ratio",
    "subject_exclamation_count",
    "body_length",
    "body_word_count",
    "avg_sentence_length",
    "url_count",
    "unique_domain_count",
    "shortened_url_count",
    "url_to_text_ratio",
    "unsubscribe_link_count",
    "has_view_in_browser",
    "tracking_pixel_count",
    "exclamation_count",
    "all_caps_word_count",
    "currency_mention_count",
    "percentage_mention_count",
    "urgency_word_count",
    "bot_keyword_count",
    "question_count",
    "has_personalization_tokens",
    "html_to_text_ratio",
    "table_count",
    "image_count",
    "has_inline_css",
    // sender
    "sender_is_noreply",
    "sender_is_automated",
    "sender_has_subdomain",
    "sender_domain_length",
    "sender_local_has_numbers",
    "sender_local_length",
    "sender_email_count",
    "sender_read_rate",
    "sender_reply_rate",
    "sender_archive_rate",
    "sender_delete_rate",
    "avg_user_priority_from_sender",
    // temporal
    "has_received_time",
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "is_business_hours",
    "is_night_send",
    "time_bucket",
    // structural
    "recipient_count",
    "is_to_multiple",
    "cc_count",
    "is_reply",
    "is_forward",
    "thread_reply_indicator",
    "thread_depth",
    "has_inbox_label",
    "has_important_label",
    "label_count",
    "has_attachment",
    // behavioral
    "user_typically_reads",
    "user_typically_replies",
    "user_typically_archives",
    "user_typically_deletes",
];

pub const FEATURE_COUNT: usize = 71;

static SCHEMA_ID: LazyLock<String> = LazyLock::new(|| {
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("features_v{FEATURE_SCHEMA_VERSION}").as_bytes());
    for name in FEATURE_NAMES {
        hasher.update(b"|");
        hasher.update(name.as_bytes());
    }
    format!("features_v{FEATURE_SCHEMA_VERSION}_{}", hasher.finalize().to_hex())
});

/// Identifier of the current feature schema.
pub fn schema_id() -> &'static str {
    &SCHEMA_ID
}

/// Position of a feature in the schema.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|candidate| *candidate == name)
}

/// Feature values for one message, tagged with the schema they were produced under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    schema_id: String,
    values: Vec<f32>,
}

impl FeatureVector {
    /// Wrap raw values produced under `schema_id`.
    ///
    /// Used when restoring persisted samples; the extractor is the normal source.
    pub fn from_parts(schema_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            schema_id: schema_id.into(),
            values,
        }
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named feature, when the vector follows the current schema.
    pub fn get(&self, name: &str) -> Option<f32> {
        if self.schema_id != schema_id() {
            return None;
        }
        feature_index(name).and_then(|idx| self.values.get(idx).copied())
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}
