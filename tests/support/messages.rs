use mailtriage::ingest::{FetchError, MessageSource};
use mailtriage::message::{AccountId, Message, MessageBody};
use time::macros::datetime;

/// Serves a fixed batch for one account.
pub struct StaticSource {
    pub account: AccountId,
    pub messages: Vec<Message>,
}

impl StaticSource {
    pub fn new(account: &str, messages: Vec<Message>) -> Self {
        Self {
            account: AccountId::new(account),
            messages,
        }
    }
}

impl MessageSource for StaticSource {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn fetch(&self, limit: usize) -> Result<Vec<Message>, FetchError> {
        Ok(self.messages.iter().take(limit).cloned().collect())
    }
}

/// Always fails, to exercise per-account isolation.
pub struct FailingSource {
    pub account: AccountId,
}

impl MessageSource for FailingSource {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn fetch(&self, _limit: usize) -> Result<Vec<Message>, FetchError> {
        Err(FetchError::Transport {
            account: self.account.clone(),
            reason: "connection reset".to_string(),
        })
    }
}

pub fn with_message_id(id: &str, account: &str, message_id: &str) -> Message {
    Message::new(id, AccountId::new(account), "alice@example.com")
        .with_subject("Quarterly numbers")
        .with_header("Message-ID", message_id)
}

/// Human mail that should land in `critical`.
pub fn urgent(idx: usize, account: &str) -> Message {
    Message::new(
        format!("{account}-urgent-{idx}"),
        AccountId::new(account),
        format!("lead{}@corp.example", idx % 4),
    )
    .with_subject(format!("URGENT: production incident #{idx}"))
    .with_recipients(["me@corp.example"])
    .with_body(MessageBody::text(
        "Hi, the service is down and we need you on the call right now. Thanks",
    ))
    .with_received_at(datetime!(2024-03-12 10:15 UTC))
    .with_header("Message-ID", format!("<urgent-{idx}@corp.example>"))
}

/// Bulk mail that should land in `low`.
pub fn newsletter(idx: usize, account: &str) -> Message {
    Message::new(
        format!("{account}-news-{idx}"),
        AccountId::new(account),
        format!("deals{}@shop.example", idx % 4),
    )
    .with_subject(format!("Weekly newsletter: {idx}0% off everything"))
    .with_recipients(["me@corp.example"])
    .with_body(MessageBody {
        text: Some("Shop now! Limited time offer. Click here to unsubscribe.".to_string()),
        html: Some(
            "<html><body><a href=\"https://shop.example/deal\">Shop</a>\
             <img src=\"https://t.shop.example/open.gif\" width=\"1\" height=\"1\"></body></html>"
                .to_string(),
        ),
    })
    .with_received_at(datetime!(2024-03-16 23:40 UTC))
    .with_header("List-Unsubscribe", "<mailto:unsubscribe@shop.example>")
    .with_header("Precedence", "bulk")
    .with_header("Message-ID", format!("<news-{idx}@shop.example>"))
}

/// Alternating urgent and newsletter messages.
pub fn mixed_inbox(count: usize, account: &str) -> Vec<Message> {
    (0..count)
        .map(|idx| {
            if idx % 2 == 0 {
                urgent(idx, account)
            } else {
                newsletter(idx, account)
            }
        })
        .collect()
}
