use serde::{Deserialize, Serialize};

use crate::error::{DripError, DripResult};

/// Internal state of one drip run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    Loading,
    Dispatching { step_index: usize },
    Waiting { step_index: usize },
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

/// Guards a drip run by enforcing the valid state transitions:
///
/// `Loading → Dispatching(0) → Waiting(0) → … → Dispatching(n) → Waiting(n) → Completed`.
///
/// Every step's wait is held, the last one included, before the run
/// completes.
///
/// `Failed` is reachable from `Loading` only; once dispatching has begun,
/// send failures are recorded per recipient instead. `Cancelled` is
/// reachable at suspension boundaries.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    pub state: RunState,
    history: Vec<RunState>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Loading,
            history: vec![RunState::Loading],
        }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(from: &RunState, to: &RunState) -> bool {
        use RunState::*;
        match (from, to) {
            (Loading, Dispatching { step_index }) => *step_index == 0,
            (Loading, Completed | Cancelled | Failed) => true,
            (Dispatching { step_index: a }, Waiting { step_index: b }) => a == b,
            (Waiting { step_index: a }, Dispatching { step_index: b }) => *b == a + 1,
            (Waiting { .. }, Completed | Cancelled) => true,
            _ => false,
        }
    }

    /// Attempts to move the machine to `to`.
    pub fn transition(&mut self, to: RunState) -> DripResult<()> {
        if Self::can_transition(&self.state, &to) {
            self.state = to;
            self.history.push(to);
            Ok(())
        } else {
            Err(DripError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }

    /// Every state visited so far, starting with `Loading`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
