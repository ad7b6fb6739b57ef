//! Orchestration states, their successor graph, and task statuses.

use super::{ParseOscStateError, ParseTaskStatusError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a schedule task inside the schema-change state machine.
///
/// Each state except [`OscState::Complete`] is bound to exactly one action.
/// The successors returned by [`OscState::successors`] are the only results
/// an action in that state may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OscState {
    /// Task is parked, or hands control to the next queued sibling.
    YieldContext,
    /// Ghost table is (re)created and validated against the origin table.
    CreateGhostTables,
    /// Replication into the ghost table is being set up.
    CreateDataTask,
    /// Replication progress is polled until the swap may run.
    MonitorDataTask,
    /// A changed rate limit is pushed to the replication backend.
    ModifyDataTask,
    /// Origin and ghost tables are exchanged by rename.
    SwapTable,
    /// External resources and leftover tables are released.
    CleanResource,
    /// Terminal state; no action is bound to it.
    Complete,
}

impl OscState {
    /// Every state, in pipeline order.
    pub const ALL: [Self; 8] = [
        Self::YieldContext,
        Self::CreateGhostTables,
        Self::CreateDataTask,
        Self::MonitorDataTask,
        Self::ModifyDataTask,
        Self::SwapTable,
        Self::CleanResource,
        Self::Complete,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YieldContext => "YIELD_CONTEXT",
            Self::CreateGhostTables => "CREATE_GHOST_TABLES",
            Self::CreateDataTask => "CREATE_DATA_TASK",
            Self::MonitorDataTask => "MONITOR_DATA_TASK",
            Self::ModifyDataTask => "MODIFY_DATA_TASK",
            Self::SwapTable => "SWAP_TABLE",
            Self::CleanResource => "CLEAN_RESOURCE",
            Self::Complete => "COMPLETE",
        }
    }

    /// Returns the states an action bound to `self` may hand over to.
    ///
    /// Self-loops are listed explicitly; every non-terminal state may jump
    /// straight to [`OscState::Complete`].
    #[must_use]
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::YieldContext => &[Self::CreateGhostTables, Self::Complete],
            Self::CreateGhostTables => {
                &[Self::CreateGhostTables, Self::CreateDataTask, Self::Complete]
            }
            Self::CreateDataTask => &[Self::CreateDataTask, Self::MonitorDataTask, Self::Complete],
            Self::MonitorDataTask => &[
                Self::MonitorDataTask,
                Self::ModifyDataTask,
                Self::SwapTable,
                Self::Complete,
            ],
            Self::ModifyDataTask => &[Self::MonitorDataTask, Self::ModifyDataTask, Self::Complete],
            Self::SwapTable => &[Self::SwapTable, Self::CleanResource, Self::Complete],
            Self::CleanResource => &[Self::YieldContext, Self::CleanResource, Self::Complete],
            Self::Complete => &[],
        }
    }

    /// Returns whether `next` is a registered successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    /// Returns whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for OscState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for OscState {
    type Error = ParseOscStateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| ParseOscStateError(value.to_owned()))
    }
}

/// Lifecycle status of a schedule task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task is queued behind a sibling.
    Preparing,
    /// Task is being driven by the poll loop.
    Running,
    /// Swap finished successfully.
    Done,
    /// A fatal error or expiry ended the task.
    Failed,
    /// An operator cancelled the task.
    Canceled,
    /// An action produced an unregistered successor; polling halts.
    Abnormal,
}

impl TaskStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "PREPARING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Abnormal => "ABNORMAL",
        }
    }

    /// Returns whether the status is terminal (`DONE`, `FAILED`, `CANCELED`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "PREPARING" => Ok(Self::Preparing),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            "ABNORMAL" => Ok(Self::Abnormal),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}
