//! Per-sender interaction history used as extraction context.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Neutral priority reported for senders without any priority feedback.
pub const NEUTRAL_PRIORITY: f32 = 0.5;

/// Something the user did with a message from a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Seen,
    Read,
    Replied,
    Archived,
    Deleted,
}

/// Aggregated counts for one sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenderStats {
    pub seen: u64,
    pub read: u64,
    pub replied: u64,
    pub archived: u64,
    pub deleted: u64,
    /// Running mean of user-assigned priority scores in [0, 1].
    pub avg_priority: Option<f32>,
    pub priority_samples: u64,
}

impl SenderStats {
    pub fn record(&mut self, action: UserAction) {
        match action {
            UserAction::Seen => self.seen += 1,
            UserAction::Read => self.read += 1,
            UserAction::Replied => self.replied += 1,
            UserAction::Archived => self.archived += 1,
            UserAction::Deleted => self.deleted += 1,
        }
    }

    /// Fold a priority score into the running mean.
    pub fn record_priority(&mut self, score: f32) {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            NEUTRAL_PRIORITY
        };
        self.priority_samples += 1;
        let prev = self.avg_priority.unwrap_or(0.0);
        self.avg_priority = Some(prev + (score - prev) / self.priority_samples as f32);
    }

    /// Messages observed from this sender, never less than any single action count.
    pub fn total(&self) -> u64 {
        self.seen
            .max(self.read)
            .max(self.replied)
            .max(self.archived)
            .max(self.deleted)
    }

    pub fn read_rate(&self) -> f32 {
        self.rate(self.read)
    }

    pub fn reply_rate(&self) -> f32 {
        self.rate(self.replied)
    }

    pub fn archive_rate(&self) -> f32 {
        self.rate(self.archived)
    }

    pub fn delete_rate(&self) -> f32 {
        self.rate(self.deleted)
    }

    pub fn priority_or_neutral(&self) -> f32 {
        self.avg_priority.unwrap_or(NEUTRAL_PRIORITY)
    }

    fn rate(&self, count: u64) -> f32 {
        match self.total() {
            0 => 0.0,
            total => count as f32 / total as f32,
        }
    }
}

/// Read access to sender statistics during extraction.
pub trait SenderStatsLookup: Sync {
    fn lookup(&self, sender: &str) -> Option<SenderStats>;
}

impl SenderStatsLookup for HashMap<String, SenderStats> {
    fn lookup(&self, sender: &str) -> Option<SenderStats> {
        self.get(&sender_address(sender)).cloned()
    }
}

/// Concurrent keyed store. Updates to one sender are serialized by the map's shard
/// lock, so concurrent recorders never lose increments.
#[derive(Debug, Default)]
pub struct SenderStatsStore {
    entries: DashMap<String, SenderStats>,
}

impl SenderStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_action(&self, sender: &str, action: UserAction) {
        let key = sender_address(sender);
        if key.is_empty() {
            return;
        }
        self.entries.entry(key).or_default().record(action);
    }

    pub fn record_priority(&self, sender: &str, score: f32) {
        let key = sender_address(sender);
        if key.is_empty() {
            return;
        }
        let mut entry = self.entries.entry(key).or_default();
        entry.record_priority(score);
        debug!(
            "Sender {} average priority now {:.3}",
            entry.key(),
            entry.priority_or_neutral()
        );
    }

    pub fn get(&self, sender: &str) -> Option<SenderStats> {
        self.entries
            .get(&sender_address(sender))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy for batch extraction.
    pub fn snapshot(&self) -> HashMap<String, SenderStats> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl SenderStatsLookup for SenderStatsStore {
    fn lookup(&self, sender: &str) -> Option<SenderStats> {
        self.get(sender)
    }
}

/// Normalize a sender address into a store key.
/// Lowercased bare address from either `addr` or `Name <addr>`.
///
/// Statistics are keyed by this value, so display-name variants of one address share
/// a single history.
pub fn sender_address(sender: &str) -> String {
    let trimmed = sender.trim();
    let inner = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    };
    inner.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rates_use_observed_total() {
        let mut stats = SenderStats::default();
        assert_eq!(stats.read_rate(), 0.0);
        for _ in 0..4 {
            stats.record(UserAction::Seen);
        }
        stats.record(UserAction::Read);
        stats.record(UserAction::Read);
        stats.record(UserAction::Deleted);
        assert!((stats.read_rate() - 0.5).abs() < 1e-6);
        assert!((stats.delete_rate() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn rates_never_exceed_one_without_seen_events() {
        let mut stats = SenderStats::default();
        stats.record(UserAction::Replied);
        stats.record(UserAction::Replied);
        assert_eq!(stats.reply_rate(), 1.0);
    }

    #[test]
    fn priority_running_mean() {
        let mut stats = SenderStats::default();
        assert_eq!(stats.priority_or_neutral(), NEUTRAL_PRIORITY);
        stats.record_priority(1.0);
        stats.record_priority(0.0);
        stats.record_priority(0.5);
        assert!((stats.priority_or_neutral() - 0.5).abs() < 1e-6);
        assert_eq!(stats.priority_samples, 3);
    }

    #[test]
    fn store_keys_are_case_insensitive() {
        let store = SenderStatsStore::new();
        store.record_action("Alice@Example.com ", UserAction::Read);
        store.record_action("alice@example.com", UserAction::Read);
        assert_eq!(store.get("ALICE@example.com").unwrap().read, 2);
        assert_eq!(store.snapshot().lookup("alice@example.com").unwrap().read, 2);
    }

    #[test]
    fn display_name_variants_share_one_history() {
        let store = SenderStatsStore::new();
        for _ in 0..5 {
            store.record_action("Alice Smith <alice@example.com>", UserAction::Read);
        }
        store.record_action("\"Smith, Alice\" <Alice@Example.com>", UserAction::Replied);
        let stats = store.get("alice@example.com").unwrap();
        assert_eq!(stats.read, 5);
        assert_eq!(stats.replied, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot().lookup("A. Smith <alice@example.com>").unwrap().read, 5);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(SenderStatsStore::new());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..250 {
                        store.record_action("busy@example.com", UserAction::Seen);
                    }
                });
            }
        });
        assert_eq!(store.get("busy@example.com").unwrap().seen, 2000);
    }
}
