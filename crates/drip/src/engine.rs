use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use sequence_core::delivery::DeliverySender;
use sequence_core::event_bus::{make_event, DripEventType, EventSink};
use sequence_core::models::Step;
use sequence_core::runs::{RunStatus, RunSummary, StepReport};
use sequence_store::StepStore;

use crate::error::{DripError, DripResult};
use crate::recipients::RecipientSource;
use crate::state_machine::{RunState, RunStateMachine};

const DEFAULT_MAX_CONCURRENT_SENDS: usize = 8;
const SECONDS_PER_DAY: u64 = 86_400;

/// Walks the steps of one sequence, fanning each step out to its
/// recipients and holding for the step's wait before advancing.
#[derive(Clone)]
pub struct DripEngine {
    steps: Arc<dyn StepStore>,
    sender: Arc<dyn DeliverySender>,
    recipients: Arc<dyn RecipientSource>,
    event_sink: Arc<dyn EventSink>,
    max_concurrent_sends: usize,
    day_length: Duration,
}

impl std::fmt::Debug for DripEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DripEngine")
            .field("max_concurrent_sends", &self.max_concurrent_sends)
            .field("day_length", &self.day_length)
            .finish()
    }
}

impl DripEngine {
    pub fn new(
        steps: Arc<dyn StepStore>,
        sender: Arc<dyn DeliverySender>,
        recipients: Arc<dyn RecipientSource>,
    ) -> Self {
        Self {
            steps,
            sender,
            recipients,
            event_sink: sequence_core::event_bus::noop_sink(),
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            day_length: Duration::from_secs(SECONDS_PER_DAY),
        }
    }

    /// Attach an event sink for run lifecycle and delivery events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Upper bound on in-flight sends for one step. Zero is treated as one.
    pub fn with_max_concurrent_sends(mut self, limit: usize) -> Self {
        self.max_concurrent_sends = limit.max(1);
        self
    }

    /// Real-time length of one `waitDays` unit.
    pub fn with_day_length(mut self, day: Duration) -> Self {
        self.day_length = day;
        self
    }

    pub fn day_length(&self) -> Duration {
        self.day_length
    }

    pub(crate) fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Fetches the live steps of a sequence in store order.
    pub async fn load_steps(&self, sequence_id: i64) -> DripResult<Vec<Step>> {
        let steps = self
            .steps
            .list_steps_by_sequence(sequence_id)
            .await
            .map_err(|source| DripError::Load {
                sequence_id,
                source,
            })?;
        Ok(steps.into_iter().filter(Step::is_live).collect())
    }

    /// Runs a sequence to completion in-process.
    pub async fn run(&self, sequence_id: i64, cancel: CancellationToken) -> DripResult<RunSummary> {
        let (progress, _) = watch::channel(RunSummary {
            run_id: Uuid::new_v4(),
            sequence_id,
            status: RunStatus::Running,
            steps: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            next_fire_at: None,
        });
        let run_id = progress.borrow().run_id;
        self.run_tracked(run_id, sequence_id, cancel, &progress).await
    }

    /// Runs a sequence, publishing a snapshot to `progress` after every
    /// state change. On a load failure the published snapshot is `Failed`
    /// and the error is returned.
    pub async fn run_tracked(
        &self,
        run_id: Uuid,
        sequence_id: i64,
        cancel: CancellationToken,
        progress: &watch::Sender<RunSummary>,
    ) -> DripResult<RunSummary> {
        let mut machine = RunStateMachine::new();
        let mut summary = RunSummary {
            run_id,
            sequence_id,
            status: RunStatus::Running,
            steps: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            next_fire_at: None,
        };
        progress.send_replace(summary.clone());

        info!(run_id = %run_id, sequence_id, "Drip run started");
        metrics::counter!("drip.runs.started").increment(1);
        self.event_sink
            .emit(make_event(DripEventType::RunStarted, sequence_id, None, None));

        let steps = match self.load_steps(sequence_id).await {
            Ok(steps) => steps,
            Err(e) => {
                machine.transition(RunState::Failed)?;
                error!(run_id = %run_id, sequence_id, error = %e, "Drip run failed to load steps");
                metrics::counter!("drip.runs.failed").increment(1);
                self.event_sink.emit(
                    make_event(DripEventType::RunFailed, sequence_id, None, None)
                        .with_detail(e.to_string()),
                );
                summary.error = Some(e.to_string());
                self.finish(&mut summary, RunStatus::Failed, progress);
                return Err(e);
            }
        };

        if steps.is_empty() {
            machine.transition(RunState::Completed)?;
            return Ok(self.complete(summary, progress));
        }
        if cancel.is_cancelled() {
            machine.transition(RunState::Cancelled)?;
            return Ok(self.cancelled(summary, progress));
        }

        for (index, step) in steps.iter().enumerate() {
            machine.transition(RunState::Dispatching { step_index: index })?;
            summary.status = RunStatus::Running;
            let report = self.dispatch_step(sequence_id, step).await;
            summary.steps.push(report);
            progress.send_replace(summary.clone());

            machine.transition(RunState::Waiting { step_index: index })?;
            let wait = step.wait_duration(self.day_length);
            if !wait.is_zero() {
                summary.status = RunStatus::Waiting;
                summary.next_fire_at = chrono::Duration::from_std(wait)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d));
                progress.send_replace(summary.clone());

                info!(
                    run_id = %run_id,
                    sequence_id,
                    step_order = step.step_order,
                    wait_days = step.wait_days,
                    "Waiting after step"
                );
                self.event_sink.emit(
                    make_event(DripEventType::RunWaiting, sequence_id, Some(step.id), None)
                        .with_detail(format!("{} days", step.wait_days)),
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
                summary.next_fire_at = None;
            }

            if cancel.is_cancelled() {
                machine.transition(RunState::Cancelled)?;
                return Ok(self.cancelled(summary, progress));
            }
        }

        machine.transition(RunState::Completed)?;
        Ok(self.complete(summary, progress))
    }

    /// Sends one step to every resolved recipient. Never fails: recipient
    /// resolution errors and per-recipient transport errors land in the
    /// returned report.
    pub async fn dispatch_step(&self, sequence_id: i64, step: &Step) -> StepReport {
        let started = Instant::now();
        let mut report = StepReport::new(step.id, step.step_order);
        self.event_sink.emit(make_event(
            DripEventType::StepDispatched,
            sequence_id,
            Some(step.id),
            None,
        ));

        let recipients = match self.recipients.recipients_for(sequence_id, step).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(sequence_id, step_id = step.id, error = %e, "Could not resolve recipients");
                report.recipient_error = Some(e.to_string());
                return report;
            }
        };

        if !step.is_deliverable() {
            for recipient in &recipients {
                self.record_failure(
                    &mut report,
                    sequence_id,
                    step,
                    recipient,
                    "missing subject or content",
                );
            }
            return report;
        }

        let outcomes: Vec<_> = stream::iter(recipients)
            .map(|recipient| async move {
                let result = self
                    .sender
                    .send(&recipient, &step.subject, &step.content)
                    .await;
                (recipient, result)
            })
            .buffered(self.max_concurrent_sends)
            .collect()
            .await;

        for (recipient, result) in outcomes {
            match result {
                Ok(()) => {
                    report.record_success();
                    metrics::counter!("drip.sends.succeeded").increment(1);
                    self.event_sink.emit(make_event(
                        DripEventType::SendSucceeded,
                        sequence_id,
                        Some(step.id),
                        Some(recipient),
                    ));
                }
                Err(e) => {
                    self.record_failure(&mut report, sequence_id, step, &recipient, &e.to_string());
                }
            }
        }

        metrics::histogram!("drip.step.dispatch_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            sequence_id,
            step_id = step.id,
            step_order = step.step_order,
            succeeded = report.succeeded,
            failed = report.failed,
            "Step dispatched"
        );
        report
    }

    fn record_failure(
        &self,
        report: &mut StepReport,
        sequence_id: i64,
        step: &Step,
        recipient: &str,
        error: &str,
    ) {
        warn!(sequence_id, step_id = step.id, to = %recipient, error = %error, "Send failed");
        metrics::counter!("drip.sends.failed").increment(1);
        report.record_failure(recipient, error);
        self.event_sink.emit(
            make_event(
                DripEventType::SendFailed,
                sequence_id,
                Some(step.id),
                Some(recipient.to_string()),
            )
            .with_detail(error),
        );
    }

    fn complete(
        &self,
        mut summary: RunSummary,
        progress: &watch::Sender<RunSummary>,
    ) -> RunSummary {
        info!(
            run_id = %summary.run_id,
            sequence_id = summary.sequence_id,
            sent = summary.total_sent(),
            failed = summary.total_failed(),
            "Drip run completed"
        );
        metrics::counter!("drip.runs.completed").increment(1);
        self.event_sink.emit(make_event(
            DripEventType::RunCompleted,
            summary.sequence_id,
            None,
            None,
        ));
        self.finish(&mut summary, RunStatus::Completed, progress);
        summary
    }

    fn cancelled(
        &self,
        mut summary: RunSummary,
        progress: &watch::Sender<RunSummary>,
    ) -> RunSummary {
        info!(run_id = %summary.run_id, sequence_id = summary.sequence_id, "Drip run cancelled");
        metrics::counter!("drip.runs.cancelled").increment(1);
        self.event_sink.emit(make_event(
            DripEventType::RunCancelled,
            summary.sequence_id,
            None,
            None,
        ));
        self.finish(&mut summary, RunStatus::Cancelled, progress);
        summary
    }

    fn finish(
        &self,
        summary: &mut RunSummary,
        status: RunStatus,
        progress: &watch::Sender<RunSummary>,
    ) {
        summary.status = status;
        summary.next_fire_at = None;
        summary.finished_at = Some(Utc::now());
        progress.send_replace(summary.clone());
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::recipients::StaticRecipients;
    use sequence_core::event_bus::capture_sink;
    use sequence_core::models::NewStep;
    use sequence_store::MemoryStore;

    fn engine(store: Arc<MemoryStore>, sender: Arc<RecordingSender>) -> DripEngine {
        DripEngine::new(store, sender, Arc::new(StaticRecipients::new(["a@x", "b@x"])))
    }

    #[tokio::test(start_paused = true)]
    async fn test_welcome_sequence_sends_each_step_to_every_recipient() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Welcome", welcome_steps()).await;

        let start = tokio::time::Instant::now();
        let summary = engine(store, sender.clone())
            .run(id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.total_sent(), 4);
        assert_eq!(sender.subjects(), vec!["Hi", "Hi", "Follow-up", "Follow-up"]);
        // Step 0 holds for 0 days, the follow-up for 2 before completion.
        assert!(start.elapsed() >= 2 * DAY);
        assert!(start.elapsed() < 2 * DAY + Duration::from_secs(1));
        assert!(summary.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_charged_between_steps() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(
            &store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 2),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;

        let summary = engine(store, sender.clone())
            .run(id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.status, RunStatus::Completed);

        let sent = sender.sent();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].at, sent[1].at);
        let gap = sent[2].at - sent[1].at;
        assert!(gap >= 2 * DAY, "gap was {gap:?}");
        assert!(gap < 2 * DAY + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recipient_does_not_stop_the_run() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::failing_for(&["b@x"]));
        let id = seed(&store, "Welcome", welcome_steps()).await;

        let summary = engine(store, sender.clone())
            .run(id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        let first = &summary.steps[0];
        assert_eq!((first.attempted, first.succeeded, first.failed), (2, 1, 1));
        assert_eq!(first.failures[0].recipient, "b@x");
        assert_eq!(summary.steps[1].succeeded, 1);
        assert_eq!(sender.subjects(), vec!["Hi", "Follow-up"]);
    }

    #[tokio::test]
    async fn test_load_failure_fails_run_without_sends() {
        let sender = Arc::new(RecordingSender::new());
        let sink = capture_sink();
        let engine = DripEngine::new(
            Arc::new(BrokenSteps),
            sender.clone(),
            Arc::new(StaticRecipients::new(["a@x"])),
        )
        .with_event_sink(sink.clone());

        let err = engine.run(1, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DripError::Load { sequence_id: 1, .. }));
        assert!(sender.sent().is_empty());
        assert_eq!(sink.count_type(DripEventType::RunFailed), 1);
        assert_eq!(sink.count_type(DripEventType::StepDispatched), 0);
    }

    #[tokio::test]
    async fn test_sequence_without_steps_completes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Empty", vec![]).await;

        let summary = engine(store, sender.clone())
            .run(id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert!(summary.steps.is_empty());
        assert!(sender.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(
            &store,
            "Nurture",
            vec![
                NewStep::new("Hi", "...", 0, 3),
                NewStep::new("Follow-up", "...", 1, 0),
            ],
        )
        .await;

        let cancel = CancellationToken::new();
        let engine = engine(store, sender.clone());
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { engine.run(id, cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.steps.len(), 1);
        assert_eq!(sender.subjects(), vec!["Hi", "Hi"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_sends_nothing() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Welcome", welcome_steps()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = engine(store, sender.clone()).run(id, cancel).await.unwrap();
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_undeliverable_step_fails_every_recipient() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let engine = engine(store, sender.clone());
        let now = Utc::now();
        let step = Step {
            id: 9,
            sequence_id: 1,
            subject: String::new(),
            content: "...".to_string(),
            step_order: 0,
            wait_days: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let report = engine.dispatch_step(1, &step).await;
        assert_eq!((report.attempted, report.failed), (2, 2));
        assert!(report.failures.iter().all(|f| f.error == "missing subject or content"));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_respects_concurrency_limit() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::with_delay(Duration::from_millis(50)));
        let id = seed(&store, "Broadcast", vec![NewStep::new("Hi", "...", 0, 0)]).await;
        let recipients: Vec<String> = (0..6).map(|i| format!("user{i}@x")).collect();

        let engine = DripEngine::new(
            store,
            sender.clone(),
            Arc::new(StaticRecipients::new(recipients)),
        )
        .with_max_concurrent_sends(2);
        let summary = engine.run(id, CancellationToken::new()).await.unwrap();

        assert_eq!(summary.total_sent(), 6);
        assert_eq!(
            sender.max_in_flight.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_published() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let id = seed(&store, "Welcome", welcome_steps()).await;
        let run_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(RunSummary {
            run_id,
            sequence_id: id,
            status: RunStatus::Running,
            steps: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            next_fire_at: None,
        });

        engine(store, sender)
            .run_tracked(run_id, id, CancellationToken::new(), &tx)
            .await
            .unwrap();
        let latest = rx.borrow().clone();
        assert_eq!(latest.run_id, run_id);
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.steps.len(), 2);
    }
}
