//! Outbox email transport.
//!
//! Renders each message in RFC 5322 shape and records it instead of handing
//! it to a relay. Used in development and as the observable transport in
//! tests. Production: put an SMTP or HTTP relay behind `DeliverySender`.
//!
//! At most `capacity` messages are retained; the oldest are evicted first.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sequence_core::delivery::{DeliverySender, TransportError};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 10_000;

/// A rendered message as it would leave the process.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub raw: String,
    pub queued_at: DateTime<Utc>,
}

pub struct OutboxSender {
    sender_email: String,
    capacity: usize,
    retained: Mutex<Retained>,
}

#[derive(Default)]
struct Retained {
    messages: VecDeque<OutboxMessage>,
    /// Retained messages per recipient address.
    per_recipient: HashMap<String, u64>,
}

impl Retained {
    fn push(&mut self, message: OutboxMessage, capacity: usize) -> usize {
        *self.per_recipient.entry(message.to.clone()).or_insert(0) += 1;
        self.messages.push_back(message);

        let mut evicted = 0;
        while self.messages.len() > capacity {
            let Some(oldest) = self.messages.pop_front() else {
                break;
            };
            if let Some(count) = self.per_recipient.get_mut(&oldest.to) {
                *count -= 1;
                if *count == 0 {
                    self.per_recipient.remove(&oldest.to);
                }
            }
            evicted += 1;
        }
        evicted
    }
}

impl OutboxSender {
    pub fn new(sender_email: impl Into<String>) -> Self {
        Self::with_capacity(sender_email, DEFAULT_OUTBOX_CAPACITY)
    }

    pub fn with_capacity(sender_email: impl Into<String>, capacity: usize) -> Self {
        let sender_email = sender_email.into();
        let capacity = capacity.max(1);
        info!(from = %sender_email, capacity, "Outbox sender initialized");
        Self {
            sender_email,
            capacity,
            retained: Mutex::new(Retained::default()),
        }
    }

    fn render(&self, to: &str, subject: &str, body: &str) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            self.sender_email, to, subject, body
        )
    }

    /// Retained messages for one recipient, oldest first.
    pub fn messages_for(&self, recipient: &str) -> Vec<OutboxMessage> {
        self.retained
            .lock()
            .messages
            .iter()
            .filter(|m| m.to == recipient)
            .cloned()
            .collect()
    }

    pub fn sent_to(&self, recipient: &str) -> u64 {
        self.retained
            .lock()
            .per_recipient
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.retained.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.lock().messages.is_empty()
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains('\r') || value.contains('\n')
}

#[async_trait]
impl DeliverySender for OutboxSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        if recipient.is_empty() || !recipient.contains('@') || has_line_break(recipient) {
            return Err(TransportError::permanent(format!(
                "invalid recipient address '{recipient}'"
            )));
        }
        if subject.is_empty() || body.is_empty() {
            return Err(TransportError::permanent("missing subject or content"));
        }
        if has_line_break(subject) {
            return Err(TransportError::permanent("subject must be a single line"));
        }

        let message = OutboxMessage {
            id: Uuid::new_v4(),
            from: self.sender_email.clone(),
            to: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            raw: self.render(recipient, subject, body),
            queued_at: Utc::now(),
        };

        debug!(to = %recipient, subject = %subject, message_id = %message.id, "Queued message in outbox");
        metrics::counter!("outbox.messages").increment(1);

        let evicted = self.retained.lock().push(message, self.capacity);
        if evicted > 0 {
            metrics::counter!("outbox.evicted").increment(evicted as u64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_records_rendered_message() {
        let outbox = OutboxSender::new("drip@example.com");
        outbox.send("a@x", "Hi", "Welcome aboard").await.unwrap();

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.sent_to("a@x"), 1);
        let messages = outbox.messages_for("a@x");
        assert_eq!(
            messages[0].raw,
            "From: drip@example.com\r\nTo: a@x\r\nSubject: Hi\r\n\r\nWelcome aboard"
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let outbox = OutboxSender::new("drip@example.com");
        assert!(outbox.send("not-an-address", "Hi", "x").await.is_err());
        assert!(outbox.send("a@x", "", "x").await.is_err());
        assert!(outbox.send("a@x", "Hi", "").await.is_err());

        let err = outbox.send("a@x", "Hi\r\nBcc: all@x", "x").await.unwrap_err();
        assert!(!err.retryable);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_oldest_messages_are_evicted_at_capacity() {
        let outbox = OutboxSender::with_capacity("drip@example.com", 2);
        outbox.send("a@x", "First", "...").await.unwrap();
        outbox.send("b@x", "Second", "...").await.unwrap();
        outbox.send("b@x", "Third", "...").await.unwrap();

        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.sent_to("a@x"), 0);
        assert!(outbox.messages_for("a@x").is_empty());
        let subjects: Vec<String> = outbox
            .messages_for("b@x")
            .into_iter()
            .map(|m| m.subject)
            .collect();
        assert_eq!(subjects, vec!["Second", "Third"]);
        assert_eq!(outbox.sent_to("b@x"), 2);
    }
}
