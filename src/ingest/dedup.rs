use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use super::fingerprint::Fingerprint;
use crate::message::{AccountId, Message};

/// Result of merging per-account batches into one unified sequence.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Unique messages in account-priority order, provider order within an account.
    pub messages: Vec<Message>,
    /// Total number of dropped copies.
    pub duplicates_removed: usize,
    /// Dropped copies attributed to the account that lost the tie-break.
    pub duplicates_by_account: BTreeMap<AccountId, usize>,
}

/// Cross-account deduplicator with a documented, stable tie-break.
///
/// Accounts named in the priority list are visited first, in list order. Any other
/// account follows in ascending id order. The first copy of a fingerprint wins, so
/// higher-priority accounts keep their copy.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    priority: Vec<AccountId>,
    enabled: bool,
}

impl Deduplicator {
    pub fn new(priority: Vec<AccountId>) -> Self {
        Self {
            priority,
            enabled: true,
        }
    }

    /// Pass-through mode: concatenate batches in the same order without dropping anything.
    pub fn disabled(priority: Vec<AccountId>) -> Self {
        Self {
            priority,
            enabled: false,
        }
    }

    /// Iteration order applied to the given accounts.
    pub fn account_order<'a, I>(&self, accounts: I) -> Vec<AccountId>
    where
        I: IntoIterator<Item = &'a AccountId>,
    {
        let mut remaining: Vec<AccountId> = accounts.into_iter().cloned().collect();
        remaining.sort();
        remaining.dedup();
        let mut ordered = Vec::with_capacity(remaining.len());
        for account in &self.priority {
            if let Some(pos) = remaining.iter().position(|candidate| candidate == account) {
                ordered.push(remaining.remove(pos));
            }
        }
        ordered.extend(remaining);
        ordered
    }

    pub fn dedup(&self, mut batches: HashMap<AccountId, Vec<Message>>) -> DedupOutcome {
        let order = self.account_order(batches.keys());
        let total: usize = batches.values().map(Vec::len).sum();
        let mut seen: HashSet<Fingerprint> = HashSet::with_capacity(total);
        let mut outcome = DedupOutcome {
            messages: Vec::with_capacity(total),
            ..DedupOutcome::default()
        };

        for account in order {
            let Some(messages) = batches.remove(&account) else {
                continue;
            };
            for message in messages {
                if !self.enabled || seen.insert(Fingerprint::of(&message)) {
                    outcome.messages.push(message);
                    continue;
                }
                debug!(account = %account, message_id = %message.id, "dropping duplicate message");
                outcome.duplicates_removed += 1;
                *outcome
                    .duplicates_by_account
                    .entry(account.clone())
                    .or_default() += 1;
            }
        }

        info!(
            total,
            unique = outcome.messages.len(),
            duplicates = outcome.duplicates_removed,
            "deduplicated account batches"
        );
        outcome
    }

    /// Deduplicate an already unified sequence, keeping its order.
    pub fn dedup_sequence(&self, messages: Vec<Message>) -> DedupOutcome {
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut outcome = DedupOutcome::default();
        if !self.enabled {
            outcome.messages = messages;
            return outcome;
        }
        for message in messages {
            if seen.insert(Fingerprint::of(&message)) {
                outcome.messages.push(message);
            } else {
                outcome.duplicates_removed += 1;
                *outcome
                    .duplicates_by_account
                    .entry(message.account.clone())
                    .or_default() += 1;
            }
        }
        outcome
    }
}
