//! Heuristic priority labels used to seed training before enough feedback exists.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::Priority;
use crate::message::Message;

pub const BOOTSTRAP_RULESET_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct WeakLabel {
    pub label: Priority,
    pub confidence: f32,
    pub rule_id: &'static str,
}

#[derive(Clone, Copy, Debug)]
enum MatchTarget {
    /// `name: value` lines of every header.
    Headers,
    Sender,
    Subject,
}

#[derive(Debug)]
struct Rule {
    id: &'static str,
    label: Priority,
    confidence: f32,
    target: MatchTarget,
    regex: Regex,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = Vec::new();

        let mut push = |id: &'static str,
                        label: Priority,
                        confidence: f32,
                        target: MatchTarget,
                        pattern: &'static str| {
            rules.push(Rule {
                id,
                label,
                confidence,
                target,
                regex: Regex::new(pattern).expect("bootstrap regex must compile"),
            });
        };

        // Bulk and automated mail.
        push(
            "headers.list_unsubscribe",
            Priority::Low,
            0.7,
            MatchTarget::Headers,
            r"(?im)^list-unsubscribe:",
        );
        push(
            "headers.precedence_bulk",
            Priority::Low,
            0.7,
            MatchTarget::Headers,
            r"(?im)^precedence:\s*(bulk|list|junk)\b",
        );
        push(
            "headers.auto_submitted",
            Priority::Archive,
            0.75,
            MatchTarget::Headers,
            r"(?im)^auto-submitted:\s*auto-",
        );
        push(
            "sender.noreply",
            Priority::Archive,
            0.65,
            MatchTarget::Sender,
            r"(?i)\b(no[\s._-]?reply|do[\s._-]?not[\s._-]?reply|mailer-daemon)\b",
        );
        push(
            "subject.marketing",
            Priority::Low,
            0.6,
            MatchTarget::Subject,
            r"(?i)\b(newsletter|unsubscribe|offer|deals?|discount|sale|promo(tion)?|% off)\b",
        );

        // Human attention.
        push(
            "subject.urgent",
            Priority::Critical,
            0.7,
            MatchTarget::Subject,
            r"(?i)\b(urgent|asap|immediately|action required|critical|emergency)\b",
        );
        push(
            "subject.important",
            Priority::Important,
            0.6,
            MatchTarget::Subject,
            r"(?i)\b(important|meeting|approval|approve|deadline|invoice|contract)\b",
        );
        push(
            "subject.reply_chain",
            Priority::Normal,
            0.55,
            MatchTarget::Subject,
            r"(?i)^\s*(re|aw|sv)\s*:",
        );

        rules
    })
}

/// Every matching label, best confidence per class, highest first.
pub fn weak_labels_for_message(message: &Message) -> Vec<WeakLabel> {
    let header_lines = message
        .headers
        .names()
        .map(|name| format!("{name}: {}", message.headers.get_or_empty(name)))
        .collect::<Vec<_>>()
        .join("\n");

    let mut best_by_class: HashMap<Priority, WeakLabel> = HashMap::new();
    for rule in rules() {
        let haystack = match rule.target {
            MatchTarget::Headers => header_lines.as_str(),
            MatchTarget::Sender => message.sender.as_str(),
            MatchTarget::Subject => message.subject.as_str(),
        };
        if !rule.regex.is_match(haystack) {
            continue;
        }
        let candidate = WeakLabel {
            label: rule.label,
            confidence: rule.confidence,
            rule_id: rule.id,
        };
        match best_by_class.get(&rule.label) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                best_by_class.insert(rule.label, candidate);
            }
        }
    }
    let mut labels: Vec<WeakLabel> = best_by_class.into_values().collect();
    labels.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.label.cmp(&b.label))
    });
    labels
}

/// Strongest label at or above `min_confidence`, if any.
pub fn bootstrap_label(message: &Message, min_confidence: f32) -> Option<WeakLabel> {
    weak_labels_for_message(message)
        .into_iter()
        .next()
        .filter(|label| label.confidence >= min_confidence)
}
