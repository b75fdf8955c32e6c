//! The seam the REST layer starts and inspects runs through, so it does not
//! care whether runs live in tasks or in checkpoints.

use async_trait::async_trait;
use sequence_core::runs::RunSummary;
use sequence_core::SequenceResult;
use uuid::Uuid;

use crate::registry::RunRegistry;
use crate::scheduler::DripScheduler;

#[async_trait]
pub trait RunTrigger: Send + Sync {
    /// Starts a drip run over `sequence_id` and returns its id.
    async fn start(&self, sequence_id: i64) -> SequenceResult<Uuid>;

    async fn status(&self, run_id: Uuid) -> SequenceResult<RunSummary>;

    async fn cancel(&self, run_id: Uuid) -> SequenceResult<RunSummary>;

    /// Short name of the run backend, reported by the info endpoint.
    fn mode(&self) -> &'static str;
}

#[async_trait]
impl RunTrigger for RunRegistry {
    async fn start(&self, sequence_id: i64) -> SequenceResult<Uuid> {
        Ok(RunRegistry::start(self, sequence_id))
    }

    async fn status(&self, run_id: Uuid) -> SequenceResult<RunSummary> {
        Ok(RunRegistry::status(self, run_id)?)
    }

    async fn cancel(&self, run_id: Uuid) -> SequenceResult<RunSummary> {
        Ok(RunRegistry::cancel(self, run_id)?)
    }

    fn mode(&self) -> &'static str {
        "in_process"
    }
}

#[async_trait]
impl RunTrigger for DripScheduler {
    async fn start(&self, sequence_id: i64) -> SequenceResult<Uuid> {
        Ok(self.schedule(sequence_id).await?.run_id)
    }

    async fn status(&self, run_id: Uuid) -> SequenceResult<RunSummary> {
        Ok(DripScheduler::status(self, run_id).await?)
    }

    async fn cancel(&self, run_id: Uuid) -> SequenceResult<RunSummary> {
        Ok(DripScheduler::cancel(self, run_id).await?)
    }

    fn mode(&self) -> &'static str {
        "durable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::engine::DripEngine;
    use crate::recipients::StaticRecipients;
    use sequence_core::runs::RunStatus;
    use sequence_store::{MemoryRunStore, MemoryStore};
    use std::sync::Arc;

    fn engine(store: Arc<MemoryStore>) -> DripEngine {
        DripEngine::new(
            store,
            Arc::new(RecordingSender::new()),
            Arc::new(StaticRecipients::new(["a@x"])),
        )
    }

    #[tokio::test]
    async fn test_durable_trigger_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, "Welcome", welcome_steps()).await;
        let trigger: Arc<dyn RunTrigger> =
            Arc::new(DripScheduler::new(engine(store), Arc::new(MemoryRunStore::new())));

        let run_id = trigger.start(id).await.unwrap();
        assert_eq!(trigger.status(run_id).await.unwrap().status, RunStatus::Running);
        assert_eq!(trigger.cancel(run_id).await.unwrap().status, RunStatus::Cancelled);
        assert_eq!(trigger.mode(), "durable");
        assert!(trigger.status(uuid::Uuid::new_v4()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_in_process_trigger_reports_not_found() {
        let trigger: Arc<dyn RunTrigger> =
            Arc::new(RunRegistry::new(engine(Arc::new(MemoryStore::new())), 2));
        assert_eq!(trigger.mode(), "in_process");
        assert!(trigger.cancel(Uuid::new_v4()).await.unwrap_err().is_not_found());
    }
}
