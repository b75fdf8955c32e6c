use sequence_core::SequenceError;
use thiserror::Error;

use crate::state_machine::RunState;

pub type DripResult<T> = Result<T, DripError>;

#[derive(Error, Debug)]
pub enum DripError {
    /// The step list could not be fetched; no send was attempted.
    #[error("failed to load steps for sequence {sequence_id}: {source}")]
    Load {
        sequence_id: i64,
        #[source]
        source: SequenceError,
    },

    #[error("invalid run state transition from {from:?} to {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error(transparent)]
    Store(#[from] SequenceError),
}

impl DripError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DripError::Store(e) if e.is_not_found())
    }
}

impl From<DripError> for SequenceError {
    fn from(err: DripError) -> Self {
        match err {
            DripError::Load { source, .. } => source,
            DripError::Store(e) => e,
            other @ DripError::InvalidTransition { .. } => {
                SequenceError::Internal(anyhow::anyhow!(other))
            }
        }
    }
}
