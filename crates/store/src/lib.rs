//! Sequence and step persistence.
//!
//! Stores are defined as async traits so a relational backend can replace
//! the in-memory implementation without touching the services or the engine.

pub mod checkpoints;
pub mod memory;
pub mod repository;
pub mod service;

pub use checkpoints::{CheckpointStatus, MemoryRunStore, RunCheckpoint, RunStore};
pub use memory::MemoryStore;
pub use repository::{SequenceStore, StepStore};
pub use service::{SequenceService, StepService};
