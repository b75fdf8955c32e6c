use async_trait::async_trait;
use sequence_core::models::{NewSequence, NewStep, Sequence, Step, StepUpdate};
use sequence_core::SequenceResult;

/// Persistence contract for sequences.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Inserts the sequence row and every nested step as one atomic unit and
    /// returns the new sequence id. On failure nothing is visible.
    async fn create_sequence(&self, sequence: &NewSequence) -> SequenceResult<i64>;

    /// Rewrites exactly the two tracking flags and `updated_at`.
    async fn update_tracking(
        &self,
        id: i64,
        open_tracking: bool,
        click_tracking: bool,
    ) -> SequenceResult<()>;

    /// The sequence with its live steps ascending by `step_order`.
    async fn get_sequence(&self, id: i64) -> SequenceResult<Sequence>;

    /// Removes the sequence and, by cascade, all of its steps.
    async fn delete_sequence(&self, id: i64) -> SequenceResult<()>;
}

/// Persistence contract for individual steps.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn create_step(&self, step: &NewStep) -> SequenceResult<i64>;

    async fn update_step(&self, id: i64, update: &StepUpdate) -> SequenceResult<()>;

    async fn delete_step(&self, id: i64) -> SequenceResult<()>;

    /// Live steps ascending by `step_order`; empty when the sequence has none.
    async fn list_steps_by_sequence(&self, sequence_id: i64) -> SequenceResult<Vec<Step>>;
}
