//! Bounded retry with exponential backoff at the delivery boundary.
//!
//! Only retryable transport errors are retried, and the loop stops at the
//! first success, so one call never produces two successful sends.

use std::time::Duration;

use async_trait::async_trait;
use sequence_core::config::RetryConfig;
use sequence_core::delivery::{DeliverySender, TransportError};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

pub struct RetryingSender<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: DeliverySender> RetryingSender<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: DeliverySender> DeliverySender for RetryingSender<S> {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            match self.inner.send(recipient, subject, body).await {
                Ok(()) => return Ok(()),
                Err(e) if e.retryable && attempt < self.policy.max_retries => {
                    let backoff = self.policy.backoff_for_attempt(attempt);
                    warn!(
                        to = %recipient,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Send failed, retrying"
                    );
                    metrics::counter!("delivery.retries").increment(1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
