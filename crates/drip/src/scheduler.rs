//! Durable drip scheduling.
//!
//! Each run is a `RunCheckpoint` in a `RunStore`. A poll loop picks up
//! checkpoints whose `next_fire_at` has passed, dispatches the next step and
//! writes the new cursor back, so a restart resumes where the last tick left
//! off. Nothing sleeps for the length of a wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sequence_core::event_bus::{make_event, DripEventType};
use sequence_core::runs::RunSummary;
use sequence_store::{CheckpointStatus, RunCheckpoint, RunStore};

use crate::engine::DripEngine;
use crate::error::DripResult;

const DEFAULT_MAX_CONCURRENT_RUNS: usize = 16;

#[derive(Clone)]
pub struct DripScheduler {
    engine: DripEngine,
    runs: Arc<dyn RunStore>,
    max_concurrent_runs: usize,
}

impl DripScheduler {
    pub fn new(engine: DripEngine, runs: Arc<dyn RunStore>) -> Self {
        Self {
            engine,
            runs,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
        }
    }

    /// Upper bound on runs advanced concurrently within one tick.
    pub fn with_max_concurrent_runs(mut self, limit: usize) -> Self {
        self.max_concurrent_runs = limit.max(1);
        self
    }

    pub async fn schedule(&self, sequence_id: i64) -> DripResult<RunCheckpoint> {
        self.schedule_at(sequence_id, Utc::now()).await
    }

    /// Persists a new run whose first step fires at `at`.
    pub async fn schedule_at(
        &self,
        sequence_id: i64,
        at: DateTime<Utc>,
    ) -> DripResult<RunCheckpoint> {
        let checkpoint = RunCheckpoint::new(sequence_id, at);
        self.runs.save(&checkpoint).await?;

        info!(run_id = %checkpoint.run_id, sequence_id, fire_at = %at, "Scheduled drip run");
        metrics::counter!("drip.runs.started").increment(1);
        self.engine
            .event_sink()
            .emit(make_event(DripEventType::RunStarted, sequence_id, None, None));
        Ok(checkpoint)
    }

    pub async fn status(&self, run_id: Uuid) -> DripResult<RunSummary> {
        Ok(self.runs.get(run_id).await?.summary())
    }

    /// Marks a scheduled run cancelled. Finished runs are left as they are.
    pub async fn cancel(&self, run_id: Uuid) -> DripResult<RunSummary> {
        let (checkpoint, cancelled) = self.runs.cancel_if_scheduled(run_id, Utc::now()).await?;
        if !cancelled {
            return Ok(checkpoint.summary());
        }

        info!(run_id = %run_id, sequence_id = checkpoint.sequence_id, "Drip run cancelled");
        metrics::counter!("drip.runs.cancelled").increment(1);
        self.engine.event_sink().emit(make_event(
            DripEventType::RunCancelled,
            checkpoint.sequence_id,
            None,
            None,
        ));
        Ok(checkpoint.summary())
    }

    /// Advances every run due at `now`. Returns how many runs were picked up.
    pub async fn tick(&self, now: DateTime<Utc>) -> DripResult<usize> {
        let due = self.runs.due(now, self.max_concurrent_runs * 4).await?;
        let picked = due.len();
        if picked > 0 {
            debug!(due = picked, "Advancing due drip runs");
        }

        let results: Vec<DripResult<()>> = stream::iter(due)
            .map(|checkpoint| self.advance(checkpoint, now))
            .buffer_unordered(self.max_concurrent_runs)
            .collect()
            .await;

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Failed to advance drip run");
            }
        }
        Ok(picked)
    }

    /// Dispatches the steps of one run that are due at `now`, then persists
    /// the new cursor. Consecutive steps separated by a zero wait go out in
    /// the same tick.
    async fn advance(&self, mut checkpoint: RunCheckpoint, now: DateTime<Utc>) -> DripResult<()> {
        let sequence_id = checkpoint.sequence_id;
        let steps = match self.engine.load_steps(sequence_id).await {
            Ok(steps) => steps,
            Err(e) if checkpoint.step_index == 0 => {
                error!(run_id = %checkpoint.run_id, sequence_id, error = %e, "Drip run failed to load steps");
                metrics::counter!("drip.runs.failed").increment(1);
                self.engine.event_sink().emit(
                    make_event(DripEventType::RunFailed, sequence_id, None, None)
                        .with_detail(e.to_string()),
                );
                checkpoint.status = CheckpointStatus::Failed;
                checkpoint.error = Some(e.to_string());
                return self.persist(checkpoint).await;
            }
            Err(e) => {
                warn!(run_id = %checkpoint.run_id, sequence_id, error = %e, "Could not load steps, retrying next poll");
                return Ok(());
            }
        };

        loop {
            if self.is_cancelled(checkpoint.run_id).await? {
                return Ok(());
            }

            let next = steps
                .iter()
                .position(|s| checkpoint.last_step_order.map_or(true, |last| s.step_order > last));
            let Some(index) = next else {
                return self.complete(checkpoint).await;
            };

            let step = &steps[index];
            let report = self.engine.dispatch_step(sequence_id, step).await;
            checkpoint.reports.push(report);
            checkpoint.step_index += 1;
            checkpoint.last_step_order = Some(step.step_order);

            let wait = step.wait_duration(self.engine.day_length());
            if wait.is_zero() {
                continue;
            }

            checkpoint.next_fire_at = fire_time(now, wait);
            info!(
                run_id = %checkpoint.run_id,
                sequence_id,
                step_order = step.step_order,
                next_fire_at = %checkpoint.next_fire_at,
                "Drip run waiting"
            );
            self.engine.event_sink().emit(
                make_event(DripEventType::RunWaiting, sequence_id, Some(step.id), None)
                    .with_detail(format!("{} days", step.wait_days)),
            );
            return self.persist(checkpoint).await;
        }
    }

    async fn complete(&self, mut checkpoint: RunCheckpoint) -> DripResult<()> {
        checkpoint.status = CheckpointStatus::Completed;
        info!(run_id = %checkpoint.run_id, sequence_id = checkpoint.sequence_id, "Drip run completed");
        metrics::counter!("drip.runs.completed").increment(1);
        self.engine.event_sink().emit(make_event(
            DripEventType::RunCompleted,
            checkpoint.sequence_id,
            None,
            None,
        ));
        self.persist(checkpoint).await
    }

    /// Writes the checkpoint unless the run was cancelled while it was
    /// being advanced; the store only accepts the write while the run is
    /// still scheduled.
    async fn persist(&self, mut checkpoint: RunCheckpoint) -> DripResult<()> {
        checkpoint.updated_at = Utc::now();
        if !self.runs.save_if_scheduled(&checkpoint).await? {
            debug!(run_id = %checkpoint.run_id, "Drip run cancelled while advancing, update dropped");
        }
        Ok(())
    }

    async fn is_cancelled(&self, run_id: Uuid) -> DripResult<bool> {
        Ok(self.runs.get(run_id).await?.status == CheckpointStatus::Cancelled)
    }

    /// Polls for due runs every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "Drip scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Drip scheduler tick failed");
                    }
                }
            }
        }
        info!("Drip scheduler stopped");
    }
}

fn fire_time(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(wait)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::recipients::StaticRecipients;
    use sequence_core::models::NewStep;
    use sequence_core::runs::RunStatus;
    use sequence_core::SequenceResult;
    use sequence_store::{MemoryRunStore, MemoryStore, StepStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        runs: Arc<MemoryRunStore>,
        sender: Arc<RecordingSender>,
        scheduler: DripScheduler,
    }

    fn fixture_with(steps: Arc<dyn StepStore>, store: Arc<MemoryStore>) -> Fixture {
        let runs = Arc::new(MemoryRunStore::new());
        let sender = Arc::new(RecordingSender::new());
        let engine = DripEngine::new(
            steps,
            sender.clone(),
            Arc::new(StaticRecipients::new(["a@x", "b@x"])),
        );
        Fixture {
            scheduler: DripScheduler::new(engine, runs.clone()),
            store,
            runs,
            sender,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        fixture_with(store.clone(), store)
    }

    fn days(n: i64) -> chrono::Duration {
        chrono::Duration::days(n)
    }

    #[tokio::test]
    async fn test_ticks_follow_wait_days() {
        let f = fixture();
        let id = seed(
            &f.store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 2),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;
        let t0 = Utc::now();
        let run = f.scheduler.schedule_at(id, t0).await.unwrap();

        assert_eq!(f.scheduler.tick(t0).await.unwrap(), 1);
        assert_eq!(f.sender.subjects(), vec!["Hi", "Hi"]);
        let summary = f.scheduler.status(run.run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Waiting);
        assert_eq!(summary.next_fire_at, Some(t0 + days(2)));

        assert_eq!(f.scheduler.tick(t0 + days(1)).await.unwrap(), 0);
        assert_eq!(f.sender.sent().len(), 2);

        f.scheduler.tick(t0 + days(2)).await.unwrap();
        assert_eq!(f.sender.subjects(), vec!["Hi", "Hi", "Follow-up", "Follow-up"]);
        let summary = f.scheduler.status(run.run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_sent(), 4);
    }

    #[tokio::test]
    async fn test_welcome_run_holds_last_wait_before_completing() {
        let f = fixture();
        let id = seed(&f.store, "Welcome", welcome_steps()).await;
        let t0 = Utc::now();
        let run = f.scheduler.schedule_at(id, t0).await.unwrap();

        // Step 0 waits 0 days, so both steps go out in the first tick.
        f.scheduler.tick(t0).await.unwrap();
        assert_eq!(f.sender.sent().len(), 4);
        let checkpoint = f.runs.get(run.run_id).await.unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Scheduled);
        assert_eq!(checkpoint.step_index, 2);
        assert_eq!(checkpoint.last_step_order, Some(1));
        let summary = checkpoint.summary();
        assert_eq!(summary.status, RunStatus::Waiting);
        assert_eq!(summary.next_fire_at, Some(t0 + days(2)));

        assert_eq!(f.scheduler.tick(t0 + days(1)).await.unwrap(), 0);

        assert_eq!(f.scheduler.tick(t0 + days(2)).await.unwrap(), 1);
        assert_eq!(f.sender.sent().len(), 4);
        let summary = f.scheduler.status(run.run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert!(summary.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cursor_survives_step_edits() {
        let f = fixture();
        let id = seed(
            &f.store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 10, 1),
                NewStep::new("Follow-up", "...", 20, 0),
            ],
        )
        .await;
        let t0 = Utc::now();
        f.scheduler.schedule_at(id, t0).await.unwrap();
        f.scheduler.tick(t0).await.unwrap();

        // Added while the run waits: order 5 is behind the cursor, 15 is ahead.
        f.store
            .create_step(&NewStep::new("Too late", "...", 5, 0).for_sequence(id))
            .await
            .unwrap();
        f.store
            .create_step(&NewStep::new("Inserted", "...", 15, 0).for_sequence(id))
            .await
            .unwrap();

        f.scheduler.tick(t0 + days(1)).await.unwrap();
        assert_eq!(
            f.sender.subjects(),
            vec!["Hi", "Hi", "Inserted", "Inserted", "Follow-up", "Follow-up"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_advanced() {
        let f = fixture();
        let id = seed(
            &f.store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 1),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;
        let t0 = Utc::now();
        let run = f.scheduler.schedule_at(id, t0).await.unwrap();
        f.scheduler.tick(t0).await.unwrap();

        let summary = f.scheduler.cancel(run.run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Cancelled);

        assert_eq!(f.scheduler.tick(t0 + days(2)).await.unwrap(), 0);
        assert_eq!(f.sender.sent().len(), 2);
    }

    /// Lands a cancel between a tick reading a run and writing it back.
    struct CancelBeforeWrite {
        inner: Arc<MemoryRunStore>,
    }

    #[async_trait::async_trait]
    impl RunStore for CancelBeforeWrite {
        async fn save(&self, checkpoint: &RunCheckpoint) -> SequenceResult<()> {
            self.inner.save(checkpoint).await
        }

        async fn save_if_scheduled(&self, checkpoint: &RunCheckpoint) -> SequenceResult<bool> {
            self.inner.cancel_if_scheduled(checkpoint.run_id, Utc::now()).await?;
            self.inner.save_if_scheduled(checkpoint).await
        }

        async fn cancel_if_scheduled(
            &self,
            run_id: Uuid,
            at: DateTime<Utc>,
        ) -> SequenceResult<(RunCheckpoint, bool)> {
            self.inner.cancel_if_scheduled(run_id, at).await
        }

        async fn get(&self, run_id: Uuid) -> SequenceResult<RunCheckpoint> {
            self.inner.get(run_id).await
        }

        async fn due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> SequenceResult<Vec<RunCheckpoint>> {
            self.inner.due(now, limit).await
        }

        async fn list_for_sequence(&self, sequence_id: i64) -> SequenceResult<Vec<RunCheckpoint>> {
            self.inner.list_for_sequence(sequence_id).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_advance_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let runs = Arc::new(MemoryRunStore::new());
        let sender = Arc::new(RecordingSender::new());
        let engine = DripEngine::new(
            store.clone(),
            sender.clone(),
            Arc::new(StaticRecipients::new(["a@x", "b@x"])),
        );
        let scheduler = DripScheduler::new(
            engine,
            Arc::new(CancelBeforeWrite {
                inner: runs.clone(),
            }),
        );
        let id = seed(
            &store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 2),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;
        let t0 = Utc::now();
        let run = scheduler.schedule_at(id, t0).await.unwrap();

        scheduler.tick(t0).await.unwrap();
        let checkpoint = runs.get(run.run_id).await.unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Cancelled);

        assert_eq!(scheduler.tick(t0 + days(3)).await.unwrap(), 0);
        assert_eq!(sender.subjects(), vec!["Hi", "Hi"]);
    }

    #[tokio::test]
    async fn test_load_failure_before_first_step_fails_run() {
        let f = fixture_with(Arc::new(BrokenSteps), Arc::new(MemoryStore::new()));
        let t0 = Utc::now();
        let run = f.scheduler.schedule_at(1, t0).await.unwrap();

        f.scheduler.tick(t0).await.unwrap();
        let summary = f.scheduler.status(run.run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(summary.error.unwrap().contains("connection refused"));
        assert!(f.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let f = fixture();
        let err = f.scheduler.status(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_stops_on_shutdown() {
        let f = fixture();
        let id = seed(&f.store, "Welcome", welcome_steps()).await;
        f.scheduler.schedule(id).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = f.scheduler.clone();
            let shutdown = shutdown.clone();
            async move { scheduler.run(Duration::from_millis(100), shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(f.sender.sent().len(), 4);
    }
}
