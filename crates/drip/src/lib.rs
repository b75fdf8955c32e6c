//! Drip scheduling: walks a sequence's steps in order, sends each step to
//! its recipients and holds for the step's wait before advancing.
//!
//! `DripEngine` runs a sequence in-process; `RunRegistry` hosts such runs as
//! tasks. `DripScheduler` persists a cursor per run and advances it from a
//! poll loop instead of sleeping.

pub mod engine;
pub mod error;
pub mod recipients;
pub mod registry;
pub mod scheduler;
pub mod state_machine;
pub mod trigger;

pub use engine::DripEngine;
pub use error::{DripError, DripResult};
pub use recipients::{RecipientSource, StaticRecipients};
pub use registry::RunRegistry;
pub use scheduler::DripScheduler;
pub use state_machine::{RunState, RunStateMachine};
pub use trigger::RunTrigger;
