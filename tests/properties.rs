use std::collections::HashMap;

use mailtriage::features::{FEATURE_COUNT, FeatureExtractor, SenderStats, schema_id};
use mailtriage::ingest::{Deduplicator, Fingerprint, fingerprint};
use mailtriage::message::{AccountId, Headers, Message, MessageBody};
use mailtriage::ml::UncertaintyThresholds;
use proptest::prelude::*;
use time::OffsetDateTime;

fn arb_message() -> impl Strategy<Value = Message> {
    (
        "[a-z0-9]{1,8}",
        prop::sample::select(vec!["A", "B", "C"]),
        ".{0,40}",
        ".{0,80}",
        proptest::option::of(".{0,200}"),
        proptest::option::of(".{0,200}"),
        proptest::option::of("[ -~]{0,30}"),
        proptest::option::of(0i64..2_000_000_000),
        prop::collection::vec("[a-z]{1,6}@[a-z]{1,6}\\.com", 0..5),
    )
        .prop_map(
            |(id, account, sender, subject, text, html, message_id, ts, recipients)| {
                let mut message = Message::new(id, AccountId::new(account), sender)
                    .with_subject(subject)
                    .with_body(MessageBody { text, html })
                    .with_recipients(recipients);
                if let Some(value) = message_id {
                    message = message.with_header("Message-ID", value);
                }
                if let Some(secs) = ts.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()) {
                    message = message.with_received_at(secs);
                }
                message
            },
        )
}

fn arb_stats() -> impl Strategy<Value = Option<SenderStats>> {
    proptest::option::of(
        (0u64..50, 0u64..50, 0u64..50, 0u64..50, 0u64..50, proptest::option::of(0.0f32..=1.0)).prop_map(
            |(seen, read, replied, archived, deleted, avg_priority)| SenderStats {
                seen,
                read,
                replied,
                archived,
                deleted,
                avg_priority,
                priority_samples: u64::from(avg_priority.is_some()),
            },
        ),
    )
}

proptest! {
    #[test]
    fn fingerprint_is_deterministic(subject in ".{0,60}", sender in ".{0,40}", id in proptest::option::of(".{0,40}")) {
        let mut headers = Headers::new();
        if let Some(id) = &id {
            headers.insert("Message-ID", id.clone());
        }
        let first = fingerprint(&headers, &subject, &sender);
        let second = fingerprint(&headers.clone(), &subject.clone(), &sender.clone());
        prop_assert_eq!(first.as_str().len(), 64);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing(subject in "[a-zA-Z ]{1,40}", sender in "[a-zA-Z@.]{1,30}") {
        let headers = Headers::new();
        let noisy = format!("  {}  ", subject.to_uppercase().replace(' ', "   "));
        prop_assert_eq!(
            fingerprint(&headers, &subject, &sender),
            fingerprint(&headers, &noisy, &sender.to_lowercase())
        );
    }

    #[test]
    fn dedup_is_idempotent(messages in prop::collection::vec(arb_message(), 0..40)) {
        let mut batches: HashMap<AccountId, Vec<Message>> = HashMap::new();
        for message in messages {
            batches.entry(message.account.clone()).or_default().push(message);
        }
        let dedup = Deduplicator::new(vec![AccountId::new("B")]);
        let once = dedup.dedup(batches);
        let twice = dedup.dedup_sequence(once.messages.clone());
        prop_assert_eq!(twice.duplicates_removed, 0);
        prop_assert_eq!(&twice.messages, &once.messages);

        let mut fingerprints: Vec<Fingerprint> = once.messages.iter().map(Fingerprint::of).collect();
        let unique = fingerprints.len();
        fingerprints.sort();
        fingerprints.dedup();
        prop_assert_eq!(fingerprints.len(), unique);
    }

    #[test]
    fn extraction_is_total(message in arb_message(), stats in arb_stats()) {
        let vector = FeatureExtractor::new().extract(&message, stats.as_ref());
        prop_assert_eq!(vector.len(), FEATURE_COUNT);
        prop_assert_eq!(vector.schema_id(), schema_id());
        prop_assert!(vector.values().iter().all(|value| value.is_finite()));
    }

    #[test]
    fn assessment_flags_match_thresholds(raw in prop::collection::vec(0.0f32..1.0, 2..6)) {
        let sum: f32 = raw.iter().sum();
        prop_assume!(sum > 0.0);
        let dist: Vec<f32> = raw.iter().map(|p| p / sum).collect();
        let thresholds = UncertaintyThresholds { low_confidence: 0.3, margin: 0.1 };
        let assessment = thresholds.assess(&dist);
        let mut sorted = dist.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        prop_assert!((assessment.confidence - sorted[0]).abs() < 1e-6);
        prop_assert!((assessment.margin - (sorted[0] - sorted[1])).abs() < 1e-6);
        let expected = sorted[0] < 0.3 || sorted[0] - sorted[1] < 0.1;
        prop_assert_eq!(assessment.reason.is_some(), expected);
    }
}

#[test]
fn empty_message_extracts_neutral_vector() {
    let message = Message::new("", AccountId::new(""), "");
    let vector = FeatureExtractor::new().extract(&message, None);
    assert_eq!(vector.len(), FEATURE_COUNT);
    assert_eq!(vector.get("hour_of_day"), Some(11.5));
    assert_eq!(vector.get("day_of_week"), Some(3.0));
    assert_eq!(vector.get("time_bucket"), Some(1.5));
    assert_eq!(vector.get("avg_user_priority_from_sender"), Some(0.5));
    assert_eq!(vector.get("url_count"), Some(0.0));
}
