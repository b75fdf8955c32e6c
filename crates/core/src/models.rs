//! Sequence and step entities, the drafts used to create them, and the
//! validation rules every write path runs before touching a store.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{SequenceError, SequenceResult};

pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 255;
pub const SUBJECT_MAX_LEN: usize = 255;

/// Pure, I/O-free validation of a domain value.
pub trait Validate {
    fn validate(&self) -> SequenceResult<()>;
}

/// A named, ordered campaign of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: i64,
    pub name: String,
    pub open_tracking_enabled: bool,
    pub click_tracking_enabled: bool,
    /// Live steps, ascending by `step_order`.
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One message unit of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: i64,
    pub sequence_id: i64,
    pub subject: String,
    pub content: String,
    pub step_order: i32,
    /// Whole days to hold after this step's sends before the next step.
    pub wait_days: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// A step with an empty subject or body must never reach a transport.
    pub fn is_deliverable(&self) -> bool {
        !self.subject.is_empty() && !self.content.is_empty()
    }

    /// Real-time length of the post-send hold, given the length of one day.
    pub fn wait_duration(&self, day: Duration) -> Duration {
        day.saturating_mul(self.wait_days.max(0) as u32)
    }
}

/// Payload for creating a sequence together with its initial steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewSequence {
    pub name: String,
    #[serde(default)]
    pub open_tracking_enabled: bool,
    #[serde(default)]
    pub click_tracking_enabled: bool,
    #[serde(default)]
    pub steps: Vec<NewStep>,
}

/// Payload for creating a step. `sequence_id` is ignored for steps nested in
/// a [`NewSequence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewStep {
    #[serde(default)]
    pub sequence_id: i64,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub step_order: i32,
    #[serde(default)]
    pub wait_days: i32,
}

impl NewStep {
    pub fn new(
        subject: impl Into<String>,
        content: impl Into<String>,
        step_order: i32,
        wait_days: i32,
    ) -> Self {
        Self {
            sequence_id: 0,
            subject: subject.into(),
            content: content.into(),
            step_order,
            wait_days,
        }
    }

    pub fn for_sequence(mut self, sequence_id: i64) -> Self {
        self.sequence_id = sequence_id;
        self
    }
}

/// Replacement values for an existing step. An absent `stepOrder` or
/// `waitDays` keeps the step's current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepUpdate {
    pub subject: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_order: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_days: Option<i32>,
}

impl StepUpdate {
    /// Rewrites subject and content only.
    pub fn content(subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
            step_order: None,
            wait_days: None,
        }
    }

    pub fn with_order(mut self, step_order: i32) -> Self {
        self.step_order = Some(step_order);
        self
    }

    pub fn with_wait(mut self, wait_days: i32) -> Self {
        self.wait_days = Some(wait_days);
        self
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

fn validate_name(name: &str) -> SequenceResult<()> {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(SequenceError::Validation(format!(
            "name must be between {NAME_MIN_LEN} and {NAME_MAX_LEN} characters, got {len}"
        )));
    }
    Ok(())
}

fn validate_step_fields(
    subject: &str,
    content: &str,
    step_order: i32,
    wait_days: i32,
) -> SequenceResult<()> {
    if subject.is_empty() {
        return Err(SequenceError::Validation("subject is required".to_string()));
    }
    if subject.chars().count() > SUBJECT_MAX_LEN {
        return Err(SequenceError::Validation(format!(
            "subject must be at most {SUBJECT_MAX_LEN} characters"
        )));
    }
    if content.is_empty() {
        return Err(SequenceError::Validation("content is required".to_string()));
    }
    if step_order < 0 {
        return Err(SequenceError::Validation(format!(
            "stepOrder must be >= 0, got {step_order}"
        )));
    }
    if wait_days < 0 {
        return Err(SequenceError::Validation(format!(
            "waitDays must be >= 0, got {wait_days}"
        )));
    }
    Ok(())
}

/// Stops at the first repeated order; later conflicts are not reported.
fn ensure_unique_step_orders(orders: impl IntoIterator<Item = i32>) -> SequenceResult<()> {
    let mut seen = HashSet::new();
    for order in orders {
        if !seen.insert(order) {
            return Err(SequenceError::Validation(format!(
                "stepOrder values must be unique in steps (duplicate {order})"
            )));
        }
    }
    Ok(())
}

impl Validate for Step {
    fn validate(&self) -> SequenceResult<()> {
        validate_step_fields(&self.subject, &self.content, self.step_order, self.wait_days)
    }
}

impl Validate for Sequence {
    fn validate(&self) -> SequenceResult<()> {
        validate_name(&self.name)?;
        for step in &self.steps {
            step.validate()?;
        }
        ensure_unique_step_orders(self.steps.iter().map(|s| s.step_order))
    }
}

impl Validate for NewStep {
    fn validate(&self) -> SequenceResult<()> {
        validate_step_fields(&self.subject, &self.content, self.step_order, self.wait_days)
    }
}

impl Validate for NewSequence {
    fn validate(&self) -> SequenceResult<()> {
        validate_name(&self.name)?;
        for step in &self.steps {
            step.validate()?;
        }
        ensure_unique_step_orders(self.steps.iter().map(|s| s.step_order))
    }
}

impl Validate for StepUpdate {
    fn validate(&self) -> SequenceResult<()> {
        validate_step_fields(
            &self.subject,
            &self.content,
            self.step_order.unwrap_or(0),
            self.wait_days.unwrap_or(0),
        )
    }
}
