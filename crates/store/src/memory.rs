//! In-memory sequence/step store.
//!
//! Both tables live behind one `RwLock` so that creating a sequence with its
//! steps is a single critical section: every row is staged and checked
//! against the schema constraints first, and nothing is written unless all of
//! them pass. Production: back the same traits with PostgreSQL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sequence_core::models::{
    NewSequence, NewStep, Sequence, Step, StepUpdate, NAME_MAX_LEN, SUBJECT_MAX_LEN,
};
use sequence_core::{SequenceError, SequenceResult};
use tracing::{debug, info};

use crate::repository::{SequenceStore, StepStore};

#[derive(Debug, Clone)]
struct SequenceRow {
    id: i64,
    name: String,
    open_tracking_enabled: bool,
    click_tracking_enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Tables {
    sequences: BTreeMap<i64, SequenceRow>,
    steps: BTreeMap<i64, Step>,
    next_sequence_id: i64,
    next_step_id: i64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            sequences: BTreeMap::new(),
            steps: BTreeMap::new(),
            next_sequence_id: 1,
            next_step_id: 1,
        }
    }
}

/// Column-level checks the relational schema enforces on `steps`.
fn check_step_columns(subject: &str, step_order: i32, wait_days: i32) -> SequenceResult<()> {
    if subject.chars().count() > SUBJECT_MAX_LEN {
        return Err(SequenceError::Persistence(
            "value too long for steps.subject".to_string(),
        ));
    }
    if step_order < 0 {
        return Err(SequenceError::Persistence(
            "check constraint violated: steps.step_order >= 0".to_string(),
        ));
    }
    if wait_days < 0 {
        return Err(SequenceError::Persistence(
            "check constraint violated: steps.wait_days >= 0".to_string(),
        ));
    }
    Ok(())
}

fn ordered(mut steps: Vec<Step>) -> Vec<Step> {
    steps.sort_by(|a, b| a.step_order.cmp(&b.step_order).then(a.id.cmp(&b.id)));
    steps
}

impl Tables {
    fn live_steps_of(&self, sequence_id: i64) -> impl Iterator<Item = &Step> {
        self.steps
            .values()
            .filter(move |s| s.sequence_id == sequence_id && s.is_live())
    }

    fn check_foreign_key(&self, sequence_id: i64) -> SequenceResult<()> {
        if self.sequences.contains_key(&sequence_id) {
            Ok(())
        } else {
            Err(SequenceError::Persistence(format!(
                "foreign key violation: sequence {sequence_id} does not exist"
            )))
        }
    }

    fn check_unique_order(
        &self,
        sequence_id: i64,
        step_order: i32,
        exclude: Option<i64>,
    ) -> SequenceResult<()> {
        let taken = self
            .live_steps_of(sequence_id)
            .any(|s| s.step_order == step_order && Some(s.id) != exclude);
        if taken {
            return Err(SequenceError::Persistence(format!(
                "unique violation: sequence {sequence_id} already has a step with order {step_order}"
            )));
        }
        Ok(())
    }
}

/// Thread-safe in-memory store implementing both [`SequenceStore`] and
/// [`StepStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Sequence store initialized (in-memory, development mode)");
        Self::default()
    }

    pub fn sequence_count(&self) -> usize {
        self.tables.read().sequences.len()
    }

    pub fn step_count(&self) -> usize {
        self.tables.read().steps.len()
    }
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn create_sequence(&self, sequence: &NewSequence) -> SequenceResult<i64> {
        let mut tables = self.tables.write();

        if sequence.name.chars().count() > NAME_MAX_LEN {
            return Err(SequenceError::Persistence(
                "value too long for sequences.name".to_string(),
            ));
        }

        let now = Utc::now();
        let id = tables.next_sequence_id;

        // Stage every step; the first failing row aborts before any write.
        let mut staged: Vec<Step> = Vec::with_capacity(sequence.steps.len());
        for (offset, draft) in sequence.steps.iter().enumerate() {
            check_step_columns(&draft.subject, draft.step_order, draft.wait_days)?;
            if staged.iter().any(|s| s.step_order == draft.step_order) {
                return Err(SequenceError::Persistence(format!(
                    "unique violation: sequence {id} already has a step with order {}",
                    draft.step_order
                )));
            }
            staged.push(Step {
                id: tables.next_step_id + offset as i64,
                sequence_id: id,
                subject: draft.subject.clone(),
                content: draft.content.clone(),
                step_order: draft.step_order,
                wait_days: draft.wait_days,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        }

        tables.next_sequence_id += 1;
        tables.next_step_id += staged.len() as i64;
        tables.sequences.insert(
            id,
            SequenceRow {
                id,
                name: sequence.name.clone(),
                open_tracking_enabled: sequence.open_tracking_enabled,
                click_tracking_enabled: sequence.click_tracking_enabled,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        let step_count = staged.len();
        for step in staged {
            tables.steps.insert(step.id, step);
        }

        info!(sequence_id = id, steps = step_count, "Created sequence");
        Ok(id)
    }

    async fn update_tracking(
        &self,
        id: i64,
        open_tracking: bool,
        click_tracking: bool,
    ) -> SequenceResult<()> {
        let mut tables = self.tables.write();
        let row = tables
            .sequences
            .get_mut(&id)
            .ok_or_else(|| SequenceError::not_found("sequence", id))?;
        row.open_tracking_enabled = open_tracking;
        row.click_tracking_enabled = click_tracking;
        row.updated_at = Utc::now();
        debug!(sequence_id = id, open_tracking, click_tracking, "Updated tracking flags");
        Ok(())
    }

    async fn get_sequence(&self, id: i64) -> SequenceResult<Sequence> {
        let tables = self.tables.read();
        let row = tables
            .sequences
            .get(&id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| SequenceError::not_found("sequence", id))?;
        let steps = ordered(tables.live_steps_of(id).cloned().collect());
        Ok(Sequence {
            id: row.id,
            name: row.name.clone(),
            open_tracking_enabled: row.open_tracking_enabled,
            click_tracking_enabled: row.click_tracking_enabled,
            steps,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }

    async fn delete_sequence(&self, id: i64) -> SequenceResult<()> {
        let mut tables = self.tables.write();
        if tables.sequences.remove(&id).is_none() {
            return Err(SequenceError::not_found("sequence", id));
        }
        let before = tables.steps.len();
        tables.steps.retain(|_, s| s.sequence_id != id);
        info!(
            sequence_id = id,
            cascaded_steps = before - tables.steps.len(),
            "Deleted sequence"
        );
        Ok(())
    }
}

#[async_trait]
impl StepStore for MemoryStore {
    async fn create_step(&self, step: &NewStep) -> SequenceResult<i64> {
        let mut tables = self.tables.write();
        tables.check_foreign_key(step.sequence_id)?;
        check_step_columns(&step.subject, step.step_order, step.wait_days)?;
        tables.check_unique_order(step.sequence_id, step.step_order, None)?;

        let now = Utc::now();
        let id = tables.next_step_id;
        tables.next_step_id += 1;
        tables.steps.insert(
            id,
            Step {
                id,
                sequence_id: step.sequence_id,
                subject: step.subject.clone(),
                content: step.content.clone(),
                step_order: step.step_order,
                wait_days: step.wait_days,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        debug!(step_id = id, sequence_id = step.sequence_id, "Created step");
        Ok(id)
    }

    async fn update_step(&self, id: i64, update: &StepUpdate) -> SequenceResult<()> {
        let mut tables = self.tables.write();
        let (sequence_id, step_order, wait_days) = tables
            .steps
            .get(&id)
            .filter(|s| s.is_live())
            .map(|s| {
                (
                    s.sequence_id,
                    update.step_order.unwrap_or(s.step_order),
                    update.wait_days.unwrap_or(s.wait_days),
                )
            })
            .ok_or_else(|| SequenceError::not_found("step", id))?;
        check_step_columns(&update.subject, step_order, wait_days)?;
        tables.check_unique_order(sequence_id, step_order, Some(id))?;

        let step = tables
            .steps
            .get_mut(&id)
            .ok_or_else(|| SequenceError::not_found("step", id))?;
        step.subject = update.subject.clone();
        step.content = update.content.clone();
        step.step_order = step_order;
        step.wait_days = wait_days;
        step.updated_at = Utc::now();
        debug!(step_id = id, sequence_id, "Updated step");
        Ok(())
    }

    async fn delete_step(&self, id: i64) -> SequenceResult<()> {
        let mut tables = self.tables.write();
        match tables.steps.remove(&id) {
            Some(step) => {
                debug!(step_id = id, sequence_id = step.sequence_id, "Deleted step");
                Ok(())
            }
            None => Err(SequenceError::not_found("step", id)),
        }
    }

    async fn list_steps_by_sequence(&self, sequence_id: i64) -> SequenceResult<Vec<Step>> {
        let tables = self.tables.read();
        Ok(ordered(tables.live_steps_of(sequence_id).cloned().collect()))
    }
}
