//! In-process drip runs: one tokio task per run, bounded by a semaphore.
//! Progress is lost on restart; use `DripScheduler` when runs must survive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sequence_core::runs::{RunStatus, RunSummary};
use sequence_core::SequenceError;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::DripEngine;
use crate::error::DripResult;

struct RunHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<RunSummary>,
}

#[derive(Clone)]
pub struct RunRegistry {
    engine: DripEngine,
    runs: Arc<DashMap<Uuid, RunHandle>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl RunRegistry {
    pub fn new(engine: DripEngine, max_concurrent_runs: usize) -> Self {
        Self {
            engine,
            runs: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawns a run for `sequence_id` and returns its id immediately.
    pub fn start(&self, sequence_id: i64) -> Uuid {
        let run_id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let (tx, rx) = watch::channel(RunSummary {
            run_id,
            sequence_id,
            status: RunStatus::Running,
            steps: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            next_fire_at: None,
        });
        self.runs.insert(
            run_id,
            RunHandle {
                cancel: cancel.clone(),
                progress: rx,
            },
        );

        let engine = self.engine.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // A run cancelled while queued still goes through the engine so
            // its final state is recorded.
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            if let Err(e) = engine.run_tracked(run_id, sequence_id, cancel, &tx).await {
                warn!(run_id = %run_id, sequence_id, error = %e, "Drip run ended with error");
            }
        });

        info!(run_id = %run_id, sequence_id, "Drip run spawned");
        run_id
    }

    pub fn status(&self, run_id: Uuid) -> DripResult<RunSummary> {
        self.runs
            .get(&run_id)
            .map(|handle| handle.progress.borrow().clone())
            .ok_or_else(|| SequenceError::not_found("run", run_id).into())
    }

    /// Requests cancellation; it takes effect at the run's next step
    /// boundary or wait.
    pub fn cancel(&self, run_id: Uuid) -> DripResult<RunSummary> {
        let handle = self
            .runs
            .get(&run_id)
            .ok_or_else(|| SequenceError::not_found("run", run_id))?;
        handle.cancel.cancel();
        let summary = handle.progress.borrow().clone();
        Ok(summary)
    }

    /// Runs ever started for one sequence, oldest first.
    pub fn list_for_sequence(&self, sequence_id: i64) -> Vec<RunSummary> {
        let mut runs: Vec<RunSummary> = self
            .runs
            .iter()
            .map(|r| r.value().progress.borrow().clone())
            .filter(|s| s.sequence_id == sequence_id)
            .collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    /// Drops the records of finished runs.
    pub fn prune_finished(&self) -> usize {
        self.prune_finished_before(DateTime::<Utc>::MAX_UTC)
    }

    /// Drops the records of runs that finished at or before `cutoff`.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.runs.len();
        self.runs.retain(|_, handle| {
            let progress = handle.progress.borrow();
            !(progress.status.is_terminal() && progress.finished_at.map_or(true, |at| at <= cutoff))
        });
        before - self.runs.len()
    }

    /// Prunes finished runs older than `retention` every `interval` until
    /// `shutdown` fires.
    pub async fn run_maintenance(
        &self,
        interval: Duration,
        retention: Duration,
        shutdown: CancellationToken,
    ) {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = Utc::now()
                        .checked_sub_signed(retention)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let pruned = self.prune_finished_before(cutoff);
                    if pruned > 0 {
                        debug!(pruned, remaining = self.runs.len(), "Pruned finished drip runs");
                    }
                }
            }
        }
    }

    pub fn active_runs(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| !r.value().progress.borrow().status.is_terminal())
            .count()
    }

    /// Cancels every run in flight.
    pub fn shutdown(&self) {
        info!(active = self.active_runs(), "Cancelling in-process drip runs");
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::recipients::StaticRecipients;
    use sequence_core::models::NewStep;
    use sequence_store::MemoryStore;

    async fn wait_until_finished(registry: &RunRegistry, run_id: Uuid) -> RunSummary {
        loop {
            let summary = registry.status(run_id).unwrap();
            if summary.status.is_terminal() {
                return summary;
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    fn registry(
        store: Arc<MemoryStore>,
        sender: Arc<RecordingSender>,
        limit: usize,
    ) -> RunRegistry {
        let recipients = Arc::new(StaticRecipients::new(["a@x", "b@x"]));
        let engine = DripEngine::new(store, sender, recipients);
        RunRegistry::new(engine, limit)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_in_background() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Welcome", welcome_steps()).await;
        let registry = registry(store, sender.clone(), 4);

        let run_id = registry.start(id);
        let summary = wait_until_finished(&registry, run_id).await;

        assert_eq!(summary.run_id, run_id);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(sender.sent().len(), 4);
        assert_eq!(registry.list_for_sequence(id).len(), 1);
        assert_eq!(registry.prune_finished(), 1);
        assert!(registry.status(run_id).unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waiting_run() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(
            &store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 5),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;
        let registry = registry(store, sender.clone(), 4);

        let run_id = registry.start(id);
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(registry.status(run_id).unwrap().status, RunStatus::Waiting);

        registry.cancel(run_id).unwrap();
        let summary = wait_until_finished(&registry, run_id).await;
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(sender.subjects(), vec!["Hi", "Hi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_visible_in_status() {
        let sender = Arc::new(RecordingSender::new());
        let engine = DripEngine::new(
            Arc::new(BrokenSteps),
            sender.clone(),
            Arc::new(StaticRecipients::new(["a@x"])),
        );
        let registry = RunRegistry::new(engine, 1);

        let run_id = registry.start(3);
        let summary = wait_until_finished(&registry, run_id).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(summary.error.is_some());
        assert!(sender.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_runs() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(
            &store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 1),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;
        let registry = registry(store, sender, 1);

        let first = registry.start(id);
        let second = registry.start(id);
        tokio::time::sleep(Duration::from_secs(60)).await;
        registry.shutdown();

        for run_id in [first, second] {
            let summary = wait_until_finished(&registry, run_id).await;
            assert_eq!(summary.status, RunStatus::Cancelled);
        }
        assert_eq!(registry.active_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_runs_are_pruned_after_retention() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Broadcast", vec![NewStep::new("Hi", "...", 0, 0)]).await;
        let registry = registry(store, sender, 4);

        let done = registry.start(id);
        let summary = wait_until_finished(&registry, done).await;
        let finished_at = summary.finished_at.unwrap();
        assert_eq!(registry.prune_finished_before(finished_at - chrono::Duration::seconds(1)), 0);

        let shutdown = CancellationToken::new();
        let maintenance = tokio::spawn({
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            async move {
                registry
                    .run_maintenance(Duration::from_secs(60), Duration::ZERO, shutdown)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(registry.status(done).unwrap_err().is_not_found());

        shutdown.cancel();
        maintenance.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruning_keeps_active_runs() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Welcome", welcome_steps()).await;
        let registry = registry(store, sender, 4);

        let run_id = registry.start(id);
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(registry.prune_finished(), 0);
        assert_eq!(registry.status(run_id).unwrap().status, RunStatus::Waiting);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let registry = registry(Arc::new(MemoryStore::new()), Arc::new(RecordingSender::new()), 1);
        assert!(registry.cancel(Uuid::new_v4()).unwrap_err().is_not_found());
    }
}
