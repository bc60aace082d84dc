//! Keyword lists and compiled patterns shared by the extractor.

use regex::Regex;
use std::sync::OnceLock;

/// Marketing and bulk-mail phrases counted in the body.
pub(super) const BOT_KEYWORDS: &[&str] = &[
    "unsubscribe",
    "newsletter",
    "marketing",
    "subscription",
    "promotional",
    "advertisement",
    "click here",
    "special offer",
    "limited time",
    "act now",
    "don't miss",
    "exclusive deal",
    "sale",
    "discount",
    "coupon",
    "free shipping",
];

pub(super) const URGENCY_WORDS: &[&str] = &[
    "urgent",
    "immediately",
    "asap",
    "critical",
    "important",
    "action required",
    "time-sensitive",
    "expiring",
    "deadline",
    "final notice",
    "last chance",
    "ending soon",
];

pub(super) const NOREPLY_MARKERS: &[&str] = &["noreply", "no-reply", "donotreply"];

pub(super) const AUTOMATED_MAILERS: &[&str] =
    &["mailchimp", "sendgrid", "constant contact", "bulk"];

pub(super) const SHORTENER_DOMAINS: &[&str] = &["bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly"];

/// Count how many distinct phrases from `list` occur in already-lowercased text.
pub(super) fn count_phrases(lower: &str, list: &[&str]) -> usize {
    list.iter().filter(|phrase| lower.contains(*phrase)).count()
}

pub(super) fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("url regex must compile")
    })
}

pub(super) fn url_host_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://([^/\s]+)").expect("url host regex must compile"))
}

pub(super) fn tracking_pixel_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]*(?:width|height)\s*=\s*["']?1["']?[^>]*>"#)
            .expect("tracking pixel regex must compile")
    })
}

pub(super) fn personalization_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\{\{[^}]+\}\}|\[(?:NAME|FIRSTNAME|EMAIL)\]|%[A-Z_]+%")
            .expect("personalization regex must compile")
    })
}

pub(super) fn automated_sender_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"noreply|no-reply|donotreply|do-not-reply|auto@|automated@|robot@|bot@|notification|alert|system",
        )
        .expect("automated sender regex must compile")
    })
}

/// Message ids listed in a `References` header.
pub(super) fn reference_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^<>\s]+>").expect("reference id regex must compile"))
}
