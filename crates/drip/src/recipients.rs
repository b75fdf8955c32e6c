//! Recipient resolution. The engine asks a `RecipientSource` for the
//! addresses of each step and never decides them itself.

use async_trait::async_trait;
use sequence_core::models::Step;
use sequence_core::SequenceResult;

#[async_trait]
pub trait RecipientSource: Send + Sync {
    /// Addresses that should receive `step` of `sequence_id`.
    async fn recipients_for(&self, sequence_id: i64, step: &Step) -> SequenceResult<Vec<String>>;
}

/// The same fixed list for every step of every sequence.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipients {
    recipients: Vec<String>,
}

impl StaticRecipients {
    pub fn new<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: recipients.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

#[async_trait]
impl RecipientSource for StaticRecipients {
    async fn recipients_for(&self, _sequence_id: i64, _step: &Step) -> SequenceResult<Vec<String>> {
        Ok(self.recipients.clone())
    }
}
