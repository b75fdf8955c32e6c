//! Durable drip-run progress: `(sequence, cursor, next fire time)` per run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sequence_core::runs::{RunStatus, RunSummary, StepReport};
use sequence_core::{SequenceError, SequenceResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Scheduled,
    Completed,
    Cancelled,
    Failed,
}

/// Persisted state of one durable drip run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: Uuid,
    pub sequence_id: i64,
    /// Number of steps dispatched so far.
    pub step_index: usize,
    /// `step_order` of the last dispatched step. The next step is the first
    /// live step with a greater order, so edits between ticks cannot replay
    /// or skip a step.
    pub last_step_order: Option<i32>,
    pub next_fire_at: DateTime<Utc>,
    pub status: CheckpointStatus,
    pub reports: Vec<StepReport>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn new(sequence_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sequence_id,
            step_index: 0,
            last_step_order: None,
            next_fire_at: now,
            status: CheckpointStatus::Scheduled,
            reports: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CheckpointStatus::Scheduled && self.next_fire_at <= now
    }

    pub fn summary(&self) -> RunSummary {
        let status = match self.status {
            CheckpointStatus::Scheduled if self.step_index == 0 => RunStatus::Running,
            CheckpointStatus::Scheduled => RunStatus::Waiting,
            CheckpointStatus::Completed => RunStatus::Completed,
            CheckpointStatus::Cancelled => RunStatus::Cancelled,
            CheckpointStatus::Failed => RunStatus::Failed,
        };
        let finished = status.is_terminal();
        RunSummary {
            run_id: self.run_id,
            sequence_id: self.sequence_id,
            status,
            steps: self.reports.clone(),
            error: self.error.clone(),
            started_at: self.created_at,
            finished_at: finished.then_some(self.updated_at),
            next_fire_at: (!finished).then_some(self.next_fire_at),
        }
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts or replaces the checkpoint keyed by `run_id`.
    async fn save(&self, checkpoint: &RunCheckpoint) -> SequenceResult<()>;

    /// Replaces the stored checkpoint only while it is still `Scheduled`.
    /// Returns `false`, writing nothing, once the run has left that state.
    async fn save_if_scheduled(&self, checkpoint: &RunCheckpoint) -> SequenceResult<bool>;

    /// Moves a `Scheduled` run to `Cancelled` in one step. Returns the stored
    /// checkpoint and whether this call cancelled it.
    async fn cancel_if_scheduled(
        &self,
        run_id: Uuid,
        at: DateTime<Utc>,
    ) -> SequenceResult<(RunCheckpoint, bool)>;

    async fn get(&self, run_id: Uuid) -> SequenceResult<RunCheckpoint>;

    /// Scheduled checkpoints whose fire time has passed, oldest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> SequenceResult<Vec<RunCheckpoint>>;

    async fn list_for_sequence(&self, sequence_id: i64) -> SequenceResult<Vec<RunCheckpoint>>;
}

#[derive(Default)]
pub struct MemoryRunStore {
    checkpoints: DashMap<Uuid, RunCheckpoint>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, checkpoint: &RunCheckpoint) -> SequenceResult<()> {
        self.checkpoints
            .insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn save_if_scheduled(&self, checkpoint: &RunCheckpoint) -> SequenceResult<bool> {
        let mut stored = self
            .checkpoints
            .get_mut(&checkpoint.run_id)
            .ok_or_else(|| SequenceError::not_found("run", checkpoint.run_id))?;
        if stored.status != CheckpointStatus::Scheduled {
            return Ok(false);
        }
        *stored = checkpoint.clone();
        Ok(true)
    }

    async fn cancel_if_scheduled(
        &self,
        run_id: Uuid,
        at: DateTime<Utc>,
    ) -> SequenceResult<(RunCheckpoint, bool)> {
        let mut stored = self
            .checkpoints
            .get_mut(&run_id)
            .ok_or_else(|| SequenceError::not_found("run", run_id))?;
        if stored.status != CheckpointStatus::Scheduled {
            return Ok((stored.clone(), false));
        }
        stored.status = CheckpointStatus::Cancelled;
        stored.updated_at = at;
        Ok((stored.clone(), true))
    }

    async fn get(&self, run_id: Uuid) -> SequenceResult<RunCheckpoint> {
        self.checkpoints
            .get(&run_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| SequenceError::not_found("run", run_id))
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> SequenceResult<Vec<RunCheckpoint>> {
        let mut due: Vec<RunCheckpoint> = self
            .checkpoints
            .iter()
            .filter(|r| r.value().is_due(now))
            .map(|r| r.value().clone())
            .collect();
        due.sort_by(|a, b| a.next_fire_at.cmp(&b.next_fire_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn list_for_sequence(&self, sequence_id: i64) -> SequenceResult<Vec<RunCheckpoint>> {
        let mut runs: Vec<RunCheckpoint> = self
            .checkpoints
            .iter()
            .filter(|r| r.value().sequence_id == sequence_id)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}
