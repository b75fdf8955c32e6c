//! Drip event bus: trait for emitting run lifecycle and delivery events.
//!
//! The engine, the durable scheduler and the run registry accept an
//! `Arc<dyn EventSink>`; the binary wires a logging sink, tests capture.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DripEventType {
    RunStarted,
    StepDispatched,
    SendSucceeded,
    SendFailed,
    RunWaiting,
    RunCompleted,
    RunCancelled,
    RunFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripEvent {
    pub event_id: Uuid,
    pub event_type: DripEventType,
    pub sequence_id: i64,
    pub step_id: Option<i64>,
    pub recipient: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Receives drip events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DripEvent);
}

/// No-op sink for callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: DripEvent) {}
}

/// Forwards every event to `tracing` at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DripEvent) {
        tracing::debug!(
            event_type = ?event.event_type,
            sequence_id = event.sequence_id,
            step_id = ?event.step_id,
            recipient = ?event.recipient,
            detail = ?event.detail,
            "drip event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DripEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DripEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: DripEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DripEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating a `DripEvent` with minimal boilerplate.
pub fn make_event(
    event_type: DripEventType,
    sequence_id: i64,
    step_id: Option<i64>,
    recipient: Option<String>,
) -> DripEvent {
    DripEvent {
        event_id: Uuid::new_v4(),
        event_type,
        sequence_id,
        step_id,
        recipient,
        detail: None,
        timestamp: Utc::now(),
    }
}

impl DripEvent {
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(make_event(DripEventType::RunStarted, 7, None, None));
        sink.emit(
            make_event(
                DripEventType::SendFailed,
                7,
                Some(3),
                Some("b@x".into()),
            )
            .with_detail("relay down"),
        );

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(DripEventType::RunStarted), 1);
        assert_eq!(sink.count_type(DripEventType::SendFailed), 1);

        let events = sink.events();
        assert_eq!(events[1].recipient.as_deref(), Some("b@x"));
        assert_eq!(events[1].detail.as_deref(), Some("relay down"));

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(DripEventType::RunCompleted, 1, None, None));
    }
}
