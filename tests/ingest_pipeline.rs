mod support;

use std::collections::HashMap;

use mailtriage::config::AccountSettings;
use mailtriage::features::UserAction;
use mailtriage::ingest::{Deduplicator, MessageSource, ingest_unified};
use mailtriage::message::AccountId;
use mailtriage::{TriageConfig, TriageEngine};
use support::messages::{FailingSource, StaticSource, mixed_inbox, with_message_id};

fn settings(priority: &[&str]) -> AccountSettings {
    AccountSettings {
        priority_order: priority.iter().map(|id| id.to_string()).collect(),
        ..AccountSettings::default()
    }
}

#[test]
fn shared_message_id_keeps_priority_account_copy() {
    let a = StaticSource::new("A", vec![with_message_id("a-1", "A", "X123")]);
    let b = StaticSource::new("B", vec![with_message_id("b-1", "B", "X123")]);
    let sources: Vec<&dyn MessageSource> = vec![&b, &a];

    let (outcome, report) = ingest_unified(&sources, &settings(&["A", "B"]));

    assert!(report.failures.is_empty());
    assert_eq!(outcome.messages.len(), 1);
    assert_eq!(outcome.messages[0].account, AccountId::new("A"));
    assert_eq!(outcome.duplicates_removed, 1);
    assert_eq!(outcome.duplicates_by_account.get(&AccountId::new("B")), Some(&1));
}

#[test]
fn every_copy_of_a_shared_id_collapses() {
    let accounts = ["work", "home", "archive", "side"];
    let sources: Vec<StaticSource> = accounts
        .iter()
        .map(|account| {
            StaticSource::new(
                account,
                vec![
                    with_message_id(&format!("{account}-1"), account, "<shared@example.com>"),
                    with_message_id(&format!("{account}-2"), account, &format!("<own-{account}>")),
                ],
            )
        })
        .collect();
    let refs: Vec<&dyn MessageSource> = sources.iter().map(|s| s as &dyn MessageSource).collect();

    let (outcome, _) = ingest_unified(&refs, &settings(&[]));

    assert_eq!(outcome.messages.len(), 5);
    assert_eq!(outcome.duplicates_removed, 3);
    // Without a priority list the lexicographically first account wins.
    assert_eq!(outcome.messages[0].account, AccountId::new("archive"));
}

#[test]
fn dedup_is_idempotent() {
    let mut batches = HashMap::new();
    batches.insert(AccountId::new("A"), mixed_inbox(6, "A"));
    batches.insert(AccountId::new("B"), mixed_inbox(6, "B"));
    let dedup = Deduplicator::new(vec![AccountId::new("B")]);
    let first = dedup.dedup(batches);
    let second = dedup.dedup_sequence(first.messages.clone());
    assert_eq!(second.messages, first.messages);
    assert_eq!(second.duplicates_removed, 0);
}

#[test]
fn disabled_dedup_concatenates_in_account_order() {
    let a = StaticSource::new("A", vec![with_message_id("a-1", "A", "X123")]);
    let b = StaticSource::new("B", vec![with_message_id("b-1", "B", "X123")]);
    let sources: Vec<&dyn MessageSource> = vec![&a, &b];
    let settings = AccountSettings {
        cross_account_deduplication: false,
        ..settings(&["B"])
    };

    let (outcome, _) = ingest_unified(&sources, &settings);

    let ids: Vec<&str> = outcome.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["b-1", "a-1"]);
    assert_eq!(outcome.duplicates_removed, 0);
}

#[test]
fn failing_account_is_isolated() {
    let good = StaticSource::new("good", mixed_inbox(4, "good"));
    let bad = FailingSource {
        account: AccountId::new("bad"),
    };
    let sources: Vec<&dyn MessageSource> = vec![&good, &bad];

    let (outcome, report) = ingest_unified(&sources, &settings(&[]));

    assert_eq!(outcome.messages.len(), 4);
    assert!(report.failures.contains_key(&AccountId::new("bad")));
}

#[test]
fn per_account_limit_applies_before_merge() {
    let source = StaticSource::new("A", mixed_inbox(10, "A"));
    let sources: Vec<&dyn MessageSource> = vec![&source];
    let settings = AccountSettings {
        max_messages_per_account: 3,
        ..settings(&[])
    };
    let (outcome, _) = ingest_unified(&sources, &settings);
    assert_eq!(outcome.messages.len(), 3);
}

#[test]
fn engine_ingest_marks_unique_messages_seen() {
    let engine = TriageEngine::new(TriageConfig::default()).unwrap();
    let a = StaticSource::new("A", vec![with_message_id("a-1", "A", "X123")]);
    let b = StaticSource::new("B", vec![with_message_id("b-1", "B", "X123")]);
    let sources: Vec<&dyn MessageSource> = vec![&a, &b];

    let report = engine.ingest(&sources);

    assert_eq!(report.fetched, 2);
    assert_eq!(report.messages.len(), 1);
    let stats = engine.sender_stats().get("Alice@Example.com").unwrap();
    assert_eq!(stats.seen, 1);

    engine.record_action("alice@example.com", UserAction::Read);
    assert!(engine.sender_stats().get("alice@example.com").unwrap().read_rate() > 0.99);
}

#[test]
fn repeated_ingestion_counts_each_message_once() {
    let engine = TriageEngine::new(TriageConfig::default()).unwrap();
    let a = StaticSource::new("A", vec![with_message_id("a-1", "A", "X123")]);
    let sources: Vec<&dyn MessageSource> = vec![&a];

    engine.ingest(&sources);
    let report = engine.ingest(&sources);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(engine.sender_stats().get("alice@example.com").unwrap().seen, 1);

    let b = StaticSource::new("B", vec![with_message_id("b-2", "B", "Y456")]);
    let sources: Vec<&dyn MessageSource> = vec![&a, &b];
    engine.ingest(&sources);
    assert_eq!(engine.sender_stats().get("alice@example.com").unwrap().seen, 2);
}
