//! Transition declared by an action.

use crate::schema_change::domain::{OscState, ScheduleId, ScheduleTaskId};

/// Side output of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutput {
    /// Free-form note for operators.
    Note(String),
    /// A sibling task was started and must be polled from now on.
    Handoff {
        /// Schedule owning both tasks.
        schedule_id: ScheduleId,
        /// Task to poll next.
        task_id: ScheduleTaskId,
    },
}

/// Outcome of one successful action invocation.
///
/// The state machine never infers transitions; `next_state` is persisted
/// as declared once it passes the successor check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// State the action ran in.
    pub current_state: OscState,
    /// Optional side output.
    pub output: Option<ActionOutput>,
    /// State to run on the next poll.
    pub next_state: OscState,
}

impl ActionResult {
    /// Declares a move from `current_state` to `next_state`.
    #[must_use]
    pub const fn transition(current_state: OscState, next_state: OscState) -> Self {
        Self {
            current_state,
            output: None,
            next_state,
        }
    }

    /// Declares that the next poll runs the same state again.
    #[must_use]
    pub const fn stay(current_state: OscState) -> Self {
        Self::transition(current_state, current_state)
    }

    /// Attaches a side output.
    #[must_use]
    pub fn with_output(mut self, output: ActionOutput) -> Self {
        self.output = Some(output);
        self
    }

    /// Returns whether the result keeps the current state.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.current_state == self.next_state
    }
}
