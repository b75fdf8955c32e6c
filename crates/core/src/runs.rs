//! Outcome records of drip runs, shared by the engine, the checkpoint store
//! and the REST layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Externally visible lifecycle of one drip run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendFailure {
    pub recipient: String,
    pub error: String,
}

/// Per-step delivery accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step_id: i64,
    pub step_order: i32,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<SendFailure>,
    /// Set when the recipient set for this step could not be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_error: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}

impl StepReport {
    pub fn new(step_id: i64, step_order: i32) -> Self {
        Self {
            step_id,
            step_order,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            recipient_error: None,
            dispatched_at: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, recipient: impl Into<String>, error: impl Into<String>) {
        self.attempted += 1;
        self.failed += 1;
        self.failures.push(SendFailure {
            recipient: recipient.into(),
            error: error.into(),
        });
    }
}

/// Snapshot of a run as reported to whoever triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub sequence_id: i64,
    pub status: RunStatus,
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn total_sent(&self) -> usize {
        self.steps.iter().map(|s| s.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.steps.iter().map(|s| s.failed).sum()
    }
}
