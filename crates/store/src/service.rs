//! Services own validation: every write is checked before the store sees it.

use std::sync::Arc;

use sequence_core::models::{NewSequence, NewStep, Sequence, Step, StepUpdate, Validate};
use sequence_core::SequenceResult;
use tracing::warn;

use crate::repository::{SequenceStore, StepStore};

#[derive(Clone)]
pub struct SequenceService {
    store: Arc<dyn SequenceStore>,
}

impl SequenceService {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    pub async fn create_sequence(&self, sequence: &NewSequence) -> SequenceResult<i64> {
        if let Err(e) = sequence.validate() {
            warn!(name = %sequence.name, error = %e, "Rejected sequence");
            return Err(e);
        }
        self.store.create_sequence(sequence).await
    }

    pub async fn update_tracking(
        &self,
        id: i64,
        open_tracking: bool,
        click_tracking: bool,
    ) -> SequenceResult<()> {
        self.store
            .update_tracking(id, open_tracking, click_tracking)
            .await
    }

    pub async fn get_sequence(&self, id: i64) -> SequenceResult<Sequence> {
        self.store.get_sequence(id).await
    }

    pub async fn delete_sequence(&self, id: i64) -> SequenceResult<()> {
        self.store.delete_sequence(id).await
    }
}

#[derive(Clone)]
pub struct StepService {
    store: Arc<dyn StepStore>,
}

impl StepService {
    pub fn new(store: Arc<dyn StepStore>) -> Self {
        Self { store }
    }

    pub async fn create_step(&self, step: &NewStep) -> SequenceResult<i64> {
        step.validate()?;
        self.store.create_step(step).await
    }

    pub async fn update_step(&self, id: i64, update: &StepUpdate) -> SequenceResult<()> {
        update.validate()?;
        self.store.update_step(id, update).await
    }

    pub async fn delete_step(&self, id: i64) -> SequenceResult<()> {
        self.store.delete_step(id).await
    }

    pub async fn list_steps(&self, sequence_id: i64) -> SequenceResult<Vec<Step>> {
        self.store.list_steps_by_sequence(sequence_id).await
    }
}
