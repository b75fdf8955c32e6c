//! Delivery channel implementations behind the `DeliverySender` contract.
//!
//! Outbox: renders and records every message (development transport).
//! Retry: bounded exponential backoff around any other sender.

pub mod outbox;
pub mod retry;

pub use outbox::{OutboxMessage, OutboxSender};
pub use retry::{RetryPolicy, RetryingSender};
