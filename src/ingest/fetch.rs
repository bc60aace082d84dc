use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{info, warn};

use crate::message::{AccountId, Message};

/// Errors reported by a per-account fetch collaborator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("account {account} is not authenticated")]
    NotAuthenticated { account: AccountId },
    #[error("fetch from {account} failed: {reason}")]
    Transport { account: AccountId, reason: String },
}

/// Supplies raw messages for one account. Transport and credentials stay outside the core.
pub trait MessageSource: Send + Sync {
    fn account(&self) -> &AccountId;

    /// Fetch at most `limit` messages in provider order.
    fn fetch(&self, limit: usize) -> Result<Vec<Message>, FetchError>;
}

/// Per-account batches gathered after every fetch has finished.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub batches: HashMap<AccountId, Vec<Message>>,
    /// Accounts whose fetch failed; they contribute an empty batch.
    pub failures: BTreeMap<AccountId, String>,
}

impl FetchReport {
    pub fn total_messages(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }
}

/// Fetch every source and wait for all of them before returning.
///
/// With `parallel` set each source runs on its own scoped thread. Failures are isolated
/// per account.
pub fn fetch_all(sources: &[&dyn MessageSource], limit: usize, parallel: bool) -> FetchReport {
    let results: Vec<(AccountId, Result<Vec<Message>, FetchError>)> = if parallel {
        std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .iter()
                .map(|source| {
                    let source = *source;
                    scope.spawn(move || (source.account().clone(), fetch_one(source, limit)))
                })
                .collect();
            handles
                .into_iter()
                .zip(sources.iter())
                .map(|(handle, source)| {
                    handle.join().unwrap_or_else(|_| {
                        let account = source.account().clone();
                        let error = FetchError::Transport {
                            account: account.clone(),
                            reason: "fetch worker panicked".to_string(),
                        };
                        (account, Err(error))
                    })
                })
                .collect()
        })
    } else {
        sources
            .iter()
            .map(|source| (source.account().clone(), fetch_one(*source, limit)))
            .collect()
    };

    let mut report = FetchReport::default();
    for (account, result) in results {
        match result {
            Ok(messages) => {
                info!(account = %account, count = messages.len(), "fetched account batch");
                report.batches.entry(account).or_default().extend(messages);
            }
            Err(err) => {
                warn!(account = %account, "account fetch failed: {err}");
                report.failures.insert(account.clone(), err.to_string());
                report.batches.entry(account).or_default();
            }
        }
    }
    report
}

fn fetch_one(source: &dyn MessageSource, limit: usize) -> Result<Vec<Message>, FetchError> {
    let mut messages = source.fetch(limit)?;
    messages.truncate(limit);
    Ok(messages)
}
