//! Delivery channel contract. The drip engine only ever talks to a transport
//! through [`DeliverySender`].

use async_trait::async_trait;
use thiserror::Error;

/// The single failure a transport may report for one recipient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
    /// Whether another attempt may succeed (timeouts, throttling, 4xx/5xx
    /// from a relay). Rejected content is never retryable.
    pub retryable: bool,
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Sends one rendered message to one destination.
#[async_trait]
pub trait DeliverySender: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: DeliverySender + ?Sized> DeliverySender for std::sync::Arc<T> {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        (**self).send(recipient, subject, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let e = TransportError::retryable("relay timeout");
        assert!(e.retryable);
        assert_eq!(e.to_string(), "transport error: relay timeout");
        assert!(!TransportError::permanent("mailbox unavailable").retryable);
    }
}
