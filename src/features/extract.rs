use std::collections::BTreeSet;

use rayon::prelude::*;
use time::OffsetDateTime;
use tracing::debug;

use super::keywords::{
    AUTOMATED_MAILERS, BOT_KEYWORDS, NOREPLY_MARKERS, SHORTENER_DOMAINS, URGENCY_WORDS,
    automated_sender_regex, count_phrases, personalization_regex, reference_id_regex, url_host_regex,
    url_regex, tracking_pixel_regex,
};
use super::sender_stats::{NEUTRAL_PRIORITY, SenderStats, SenderStatsLookup, sender_address};
use super::{FEATURE_COUNT, FeatureVector, schema_id};
use crate::message::{Headers, Message};

/// Hour reported when the receive time is unknown (midpoint of the day).
const NEUTRAL_HOUR: f32 = 11.5;
/// Weekday reported when the receive time is unknown (midpoint of Monday..Sunday).
const NEUTRAL_WEEKDAY: f32 = 3.0;
/// Time bucket reported when the receive time is unknown (midpoint of 0..=3).
const NEUTRAL_TIME_BUCKET: f32 = 1.5;

/// Converts messages into [`FeatureVector`]s under the current schema.
///
/// Extraction is total: malformed or missing fields fall back to defaults and the
/// output never contains NaN or infinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, message: &Message, stats: Option<&SenderStats>) -> FeatureVector {
        let mut row = Row::default();
        metadata_features(&mut row, &message.headers);
        content_features(&mut row, message);
        sender_features(&mut row, &message.sender, stats);
        temporal_features(&mut row, message.received_at);
        structural_features(&mut row, message);
        behavioral_features(&mut row, stats);
        row.finish()
    }

    /// Extract many messages in parallel against a read-only stats lookup.
    pub fn extract_batch(
        &self,
        messages: &[Message],
        stats: &dyn SenderStatsLookup,
    ) -> Vec<FeatureVector> {
        debug!("Extracting features for {} messages", messages.len());
        messages
            .par_iter()
            .map(|message| {
                let sender_stats = stats.lookup(&message.sender);
                self.extract(message, sender_stats.as_ref())
            })
            .collect()
    }
}

#[derive(Default)]
struct Row {
    values: Vec<f32>,
}

impl Row {
    fn num(&mut self, value: impl Into<f64>) {
        self.values.push(value.into() as f32);
    }

    fn count(&mut self, value: usize) {
        self.values.push(value as f32);
    }

    fn flag(&mut self, value: bool) {
        self.values.push(if value { 1.0 } else { 0.0 });
    }

    fn finish(mut self) -> FeatureVector {
        debug_assert_eq!(self.values.len(), FEATURE_COUNT);
        self.values.resize(FEATURE_COUNT, 0.0);
        for value in &mut self.values {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
        FeatureVector::from_parts(schema_id(), self.values)
    }
}

fn metadata_features(row: &mut Row, headers: &Headers) {
    row.flag(headers.contains("list-unsubscribe"));
    row.flag(
        headers
            .get_or_empty("precedence")
            .to_lowercase()
            .contains("bulk"),
    );
    row.flag(
        headers
            .names()
            .any(|name| name.contains("marketing") || name.contains("campaign")),
    );
    row.flag(headers.contains("auto-submitted"));
    row.flag(headers.contains("x-autoreply"));

    let mailer = headers.get_or_empty("x-mailer").to_lowercase();
    let user_agent = headers.get_or_empty("user-agent");
    row.flag(!mailer.is_empty() && user_agent.is_empty());
    row.flag(AUTOMATED_MAILERS.iter().any(|word| mailer.contains(word)));

    row.flag(
        headers
            .get_or_empty("received-spf")
            .to_lowercase()
            .contains("pass"),
    );
    row.flag(!headers.get_or_empty("dkim-signature").is_empty());
    row.count(headers.len());
}

fn content_features(row: &mut Row, message: &Message) {
    let subject = message.subject.as_str();
    let subject_lower = subject.trim_start().to_lowercase();
    let subject_chars = subject.chars().count();
    row.count(subject_chars);
    row.flag(subject_lower.starts_with("re:"));
    row.flag(subject_lower.starts_with("fwd:") || subject_lower.starts_with("fw:"));
    row.num(ratio(
        subject.chars().filter(|c| c.is_uppercase()).count(),
        subject_chars,
    ));
    row.count(subject.matches('!').count());

    let body = message.body.text_or_empty();
    let body_lower = body.to_lowercase();
    let body_chars = body.chars().count();
    let words = body.split_whitespace().count();
    row.count(body_chars);
    row.count(words);
    let sentence_marks = body.matches(['.', '!', '?']).count();
    row.num(if body.is_empty() {
        0.0
    } else {
        words as f64 / sentence_marks.max(1) as f64
    });

    let url_count = url_regex().find_iter(body).count();
    let hosts: BTreeSet<String> = url_host_regex()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|host| host.as_str().to_lowercase())
        .collect();
    row.count(url_count);
    row.count(hosts.len());
    row.count(
        hosts
            .iter()
            .filter(|host| SHORTENER_DOMAINS.iter().any(|short| host.contains(short)))
            .count(),
    );
    row.num(ratio(url_count, words));

    row.count(body_lower.matches("unsubscribe").count());
    row.flag(body_lower.contains("view in browser") || body_lower.contains("view online"));
    let html = message.body.html.as_deref().unwrap_or("");
    row.count(tracking_pixel_regex().find_iter(html).count());

    row.count(body.matches('!').count());
    row.count(body.split_whitespace().filter(|w| is_shouted(w)).count());
    row.count(
        body.matches(['$', '€', '£']).count()
            + body_lower.matches("price").count()
            + body_lower.matches("cost").count(),
    );
    row.count(body.matches('%').count());
    row.count(count_phrases(&body_lower, URGENCY_WORDS));
    row.count(count_phrases(&body_lower, BOT_KEYWORDS));
    row.count(body.matches('?').count());
    row.flag(personalization_regex().is_match(body));

    let html_lower = html.to_lowercase();
    row.num(if html.is_empty() || body.is_empty() {
        0.0
    } else {
        html.chars().count() as f64 / body_chars as f64
    });
    row.count(html_lower.matches("<table").count());
    row.count(html_lower.matches("<img").count());
    row.flag(html_lower.contains("style="));
}

fn sender_features(row: &mut Row, sender: &str, stats: Option<&SenderStats>) {
    let address = sender_address(sender);
    let (local, domain) = address.split_once('@').unwrap_or((address.as_str(), ""));

    row.flag(NOREPLY_MARKERS.iter().any(|marker| address.contains(marker)));
    row.flag(automated_sender_regex().is_match(&address));
    row.flag(domain.split('.').count() > 2);
    row.count(domain.chars().count());
    row.flag(local.chars().any(|c| c.is_ascii_digit()));
    row.count(local.chars().count());

    match stats {
        Some(stats) => {
            row.num(stats.total() as f64);
            row.num(stats.read_rate());
            row.num(stats.reply_rate());
            row.num(stats.archive_rate());
            row.num(stats.delete_rate());
            row.num(stats.priority_or_neutral());
        }
        None => {
            row.values.extend([0.0, 0.0, 0.0, 0.0, 0.0, NEUTRAL_PRIORITY]);
        }
    }
}

fn temporal_features(row: &mut Row, received_at: Option<OffsetDateTime>) {
    let Some(ts) = received_at else {
        row.flag(false);
        row.num(NEUTRAL_HOUR);
        row.num(NEUTRAL_WEEKDAY);
        row.values.extend([0.0, 0.0, 0.0]);
        row.num(NEUTRAL_TIME_BUCKET);
        return;
    };
    let hour = ts.hour();
    let weekday = ts.weekday().number_days_from_monday();
    row.flag(true);
    row.num(hour);
    row.num(weekday);
    row.flag(weekday >= 5);
    row.flag((9..=17).contains(&hour));
    row.flag(hour < 6 || hour >= 22);
    row.num(match hour {
        0..=5 => 0u8,
        6..=11 => 1,
        12..=17 => 2,
        _ => 3,
    });
}

fn structural_features(row: &mut Row, message: &Message) {
    let headers = &message.headers;
    let recipients = message
        .recipients
        .iter()
        .filter(|r| !r.trim().is_empty())
        .count();
    row.count(recipients);
    row.flag(recipients > 1);
    row.count(
        headers
            .get_or_empty("cc")
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .count(),
    );

    let subject_lower = message.subject.to_lowercase();
    let is_reply = headers.contains("in-reply-to");
    row.flag(is_reply);
    row.flag(subject_lower.contains("fwd:"));
    row.flag(subject_lower.trim_start().starts_with("re:") || is_reply);
    let references = reference_id_regex()
        .find_iter(headers.get_or_empty("references"))
        .count();
    row.count(references.max(reply_prefix_depth(&subject_lower)));

    if message.labels.is_empty() {
        row.flag(true);
        row.flag(false);
        row.count(0);
    } else {
        let has = |wanted: &str| message.labels.iter().any(|l| l.eq_ignore_ascii_case(wanted));
        row.flag(has("INBOX"));
        row.flag(has("IMPORTANT"));
        row.count(message.labels.len());
    }

    let content_type = headers.get_or_empty("content-type").to_lowercase();
    row.flag(
        content_type.contains("attachment")
            || content_type.contains("multipart/mixed")
            || message.body.text_or_empty().to_lowercase().contains("attached"),
    );
}

fn behavioral_features(row: &mut Row, stats: Option<&SenderStats>) {
    match stats {
        Some(stats) => {
            row.flag(stats.read_rate() > 0.5);
            row.flag(stats.reply_rate() > 0.3);
            row.flag(stats.archive_rate() > 0.5);
            row.flag(stats.delete_rate() > 0.3);
        }
        None => row.values.extend([0.0; 4]),
    }
}

/// Number of leading `re:` / `fwd:` / `fw:` prefixes.
fn reply_prefix_depth(subject_lower: &str) -> usize {
    let mut rest = subject_lower.trim_start();
    let mut depth = 0;
    loop {
        let next = ["re:", "fwd:", "fw:"]
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix));
        match next {
            Some(stripped) => {
                depth += 1;
                rest = stripped.trim_start();
            }
            None => return depth,
        }
    }
}

fn is_shouted(word: &str) -> bool {
    word.chars().count() > 2
        && word.chars().any(char::is_uppercase)
        && !word.chars().any(char::is_lowercase)
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FEATURE_NAMES, SenderStatsStore, UserAction};
    use crate::message::{AccountId, MessageBody};
    use time::macros::datetime;

    fn feature(vector: &FeatureVector, name: &str) -> f32 {
        vector.get(name).unwrap_or_else(|| panic!("missing {name}"))
    }

    #[test]
    fn empty_message_uses_neutral_defaults() {
        let message = Message::new("", AccountId::new(""), "");
        let vector = FeatureExtractor::new().extract(&message, None);
        assert_eq!(vector.len(), FEATURE_NAMES.len());
        assert!(vector.values().iter().all(|v| v.is_finite()));
        assert_eq!(feature(&vector, "hour_of_day"), 11.5);
        assert_eq!(feature(&vector, "day_of_week"), 3.0);
        assert_eq!(feature(&vector, "time_bucket"), 1.5);
        assert_eq!(feature(&vector, "is_business_hours"), 0.0);
        assert_eq!(feature(&vector, "avg_user_priority_from_sender"), 0.5);
        assert_eq!(feature(&vector, "has_inbox_label"), 1.0);
    }

    #[test]
    fn reply_during_business_hours() {
        let message = Message::new("m1", AccountId::new("work"), "Dana <dana@corp.example>")
            .with_subject("RE: budget approval")
            .with_recipients(["a@corp.example", "b@corp.example", "c@corp.example"])
            .with_received_at(datetime!(2024-03-12 10:15 UTC))
            .with_body(MessageBody::text("Looks good to me. Please go ahead."));
        let vector = FeatureExtractor::new().extract(&message, None);
        assert_eq!(feature(&vector, "is_business_hours"), 1.0);
        assert_eq!(feature(&vector, "url_count"), 0.0);
        assert_eq!(feature(&vector, "bot_keyword_count"), 0.0);
        assert_eq!(feature(&vector, "thread_reply_indicator"), 1.0);
        assert_eq!(feature(&vector, "day_of_week"), 1.0);
        assert_eq!(feature(&vector, "recipient_count"), 3.0);
        assert_eq!(feature(&vector, "has_list_unsubscribe"), 0.0);
        assert_eq!(feature(&vector, "thread_depth"), 1.0);
    }

    #[test]
    fn marketing_message_lights_up_bulk_signals() {
        let html = r#"<table><tr><td><img src="x" width="1" height="1"></td></tr></table>"#;
        let message = Message::new("m2", AccountId::new("home"), "news@mail.shop.example")
            .with_subject("HUGE SALE!!!")
            .with_header("List-Unsubscribe", "<mailto:u@shop.example>")
            .with_header("Precedence", "bulk")
            .with_header("X-Mailer", "SendGrid")
            .with_body(MessageBody {
                text: Some(
                    "Special offer! Visit https://bit.ly/abc and https://shop.example/deal to unsubscribe"
                        .to_string(),
                ),
                html: Some(html.to_string()),
            });
        let vector = FeatureExtractor::new().extract(&message, None);
        assert_eq!(feature(&vector, "has_list_unsubscribe"), 1.0);
        assert_eq!(feature(&vector, "has_bulk_precedence"), 1.0);
        assert_eq!(feature(&vector, "mailer_is_automated"), 1.0);
        assert_eq!(feature(&vector, "sent_via_api"), 1.0);
        assert_eq!(feature(&vector, "url_count"), 2.0);
        assert_eq!(feature(&vector, "unique_domain_count"), 2.0);
        assert_eq!(feature(&vector, "shortened_url_count"), 1.0);
        assert_eq!(feature(&vector, "tracking_pixel_count"), 1.0);
        assert_eq!(feature(&vector, "table_count"), 1.0);
        assert_eq!(feature(&vector, "subject_exclamation_count"), 3.0);
        assert_eq!(feature(&vector, "sender_has_subdomain"), 1.0);
        assert!(feature(&vector, "bot_keyword_count") >= 2.0);
    }

    #[test]
    fn sender_stats_feed_behavioral_features() {
        let store = SenderStatsStore::new();
        for _ in 0..4 {
            store.record_action("boss@corp.example", UserAction::Seen);
            store.record_action("boss@corp.example", UserAction::Read);
        }
        store.record_action("boss@corp.example", UserAction::Replied);
        store.record_action("boss@corp.example", UserAction::Replied);
        store.record_priority("boss@corp.example", 1.0);

        let message = Message::new("m3", AccountId::new("work"), "Boss@Corp.example");
        let stats = store.get(&message.sender);
        let vector = FeatureExtractor::new().extract(&message, stats.as_ref());
        assert_eq!(feature(&vector, "sender_email_count"), 4.0);
        assert_eq!(feature(&vector, "user_typically_reads"), 1.0);
        assert_eq!(feature(&vector, "user_typically_replies"), 1.0);
        assert_eq!(feature(&vector, "user_typically_deletes"), 0.0);
        assert_eq!(feature(&vector, "avg_user_priority_from_sender"), 1.0);
    }

    #[test]
    fn stats_follow_the_address_not_the_display_name() {
        let store = SenderStatsStore::new();
        for _ in 0..5 {
            store.record_action("Alice Smith <alice@example.com>", UserAction::Seen);
        }
        let message = Message::new("m4", AccountId::new("work"), "alice@example.com");
        let snapshot = store.snapshot();
        let batch = FeatureExtractor::new().extract_batch(std::slice::from_ref(&message), &snapshot);
        assert_eq!(feature(&batch[0], "sender_email_count"), 5.0);
    }

    #[test]
    fn batch_matches_single_extraction() {
        let store = SenderStatsStore::new();
        store.record_action("a@x.example", UserAction::Archived);
        let messages: Vec<Message> = (0..16)
            .map(|idx| {
                Message::new(format!("m{idx}"), AccountId::new("acct"), "a@x.example")
                    .with_subject(format!("subject {idx}"))
            })
            .collect();
        let extractor = FeatureExtractor::new();
        let snapshot = store.snapshot();
        let batch = extractor.extract_batch(&messages, &snapshot);
        for (message, vector) in messages.iter().zip(&batch) {
            let single = extractor.extract(message, store.get(&message.sender).as_ref());
            assert_eq!(&single, vector);
        }
    }

    #[test]
    fn reply_prefix_depth_counts_chains() {
        assert_eq!(reply_prefix_depth("re: fwd: re: hello"), 3);
        assert_eq!(reply_prefix_depth("hello re:"), 0);
    }
}
