use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::message::{Headers, Message};

/// Header carrying the provider-independent message identity.
pub const CANONICAL_ID_HEADER: &str = "message-id";

const HEADER_DOMAIN: &str = "message-id:";
const FALLBACK_DOMAIN: &str = "subject-sender:";
const FIELD_SEPARATOR: char = '\u{1f}';

/// Content identity of a message across accounts (lowercase SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(message: &Message) -> Self {
        fingerprint(&message.headers, &message.subject, &message.sender)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint from the canonical id header, falling back to subject + sender.
pub fn fingerprint(headers: &Headers, subject: &str, sender: &str) -> Fingerprint {
    let canonical = headers
        .get(CANONICAL_ID_HEADER)
        .map(normalize)
        .filter(|value| !value.is_empty());
    let payload = match canonical {
        Some(id) => format!("{HEADER_DOMAIN}{id}"),
        None => format!(
            "{FALLBACK_DOMAIN}{}{FIELD_SEPARATOR}{}",
            normalize(subject),
            normalize(sender)
        ),
    };
    let digest = Sha256::digest(payload.as_bytes());
    Fingerprint(format!("{digest:x}"))
}

/// Trim, collapse whitespace runs and lowercase.
fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
