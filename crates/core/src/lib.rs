//! Domain model, error taxonomy, configuration and collaborator contracts
//! shared by every Sequence Flow crate.

pub mod config;
pub mod delivery;
pub mod error;
pub mod event_bus;
pub mod models;
pub mod runs;

pub use config::AppConfig;
pub use delivery::{DeliverySender, TransportError};
pub use error::{SequenceError, SequenceResult};
pub use models::{NewSequence, NewStep, Sequence, Step, StepUpdate, Validate};
