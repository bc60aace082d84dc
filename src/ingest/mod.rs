//! Multi-account ingestion: parallel fetch, content fingerprints and deduplication.

mod dedup;
mod fetch;
mod fingerprint;

pub use dedup::{DedupOutcome, Deduplicator};
pub use fetch::{FetchError, FetchReport, MessageSource, fetch_all};
pub use fingerprint::{CANONICAL_ID_HEADER, Fingerprint, fingerprint};

use crate::config::AccountSettings;
use crate::message::AccountId;

impl Deduplicator {
    /// Build the deduplicator described by the account settings.
    pub fn from_settings(settings: &AccountSettings) -> Self {
        let priority: Vec<AccountId> = settings
            .priority_order
            .iter()
            .map(|id| AccountId::new(id.as_str()))
            .collect();
        if settings.cross_account_deduplication {
            Deduplicator::new(priority)
        } else {
            Deduplicator::disabled(priority)
        }
    }
}

/// Fetch every account, wait for all of them, then merge through the deduplicator.
pub fn ingest_unified(
    sources: &[&dyn MessageSource],
    settings: &AccountSettings,
) -> (DedupOutcome, FetchReport) {
    let mut report = fetch_all(
        sources,
        settings.max_messages_per_account,
        settings.parallel_fetch,
    );
    let batches = std::mem::take(&mut report.batches);
    let outcome = Deduplicator::from_settings(settings).dedup(batches);
    (outcome, report)
}
