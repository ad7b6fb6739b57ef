//! Errors that end an action with a failure.
//!
//! Transient conditions never surface here: an action that should retry
//! returns a result that keeps the current state.

use crate::schema_change::{
    domain::{OscDomainError, ScheduleTaskId},
    ports::{
        ControlPlaneError, DbError, MigrationServiceError, ResourceError, ScheduleRepositoryError,
    },
};
use thiserror::Error;

use super::ActionResult;

/// Fatal action failure; the state machine routes the task to cleanup.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] OscDomainError),

    /// Persisting task state failed.
    #[error(transparent)]
    Repository(#[from] ScheduleRepositoryError),

    /// A database statement or session failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Provisioning or releasing the worker failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A worker control-plane call failed.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// A migration-service call failed.
    #[error(transparent)]
    MigrationService(#[from] MigrationServiceError),

    /// The backend pre-flight checks failed.
    #[error("precheck failed: {0}")]
    PrecheckFailed(String),

    /// The replication job failed.
    #[error("data migration failed: {0}")]
    MigrationFailed(String),

    /// Verification found differing rows.
    #[error("full verification found inconsistent data: {0}")]
    DataInconsistent(String),

    /// The backend stayed silent for longer than the failure timeout.
    #[error("no migration status for task {task_id} within {seconds}s")]
    MonitorTimeout {
        /// Task being monitored.
        task_id: ScheduleTaskId,
        /// Configured failure timeout.
        seconds: u64,
    },

    /// The worker answered `start` with `success = false`.
    #[error("worker refused to start replication for task {0}")]
    StartRejected(ScheduleTaskId),

    /// Origin, ghost and archive tables are in no state a swap can resume.
    #[error(
        "tables of task {task_id} cannot be swapped: origin exists={origin}, ghost exists={ghost}, archive exists={archive}"
    )]
    SwapTablesInconsistent {
        /// Task being swapped.
        task_id: ScheduleTaskId,
        /// Whether the origin table exists.
        origin: bool,
        /// Whether the ghost table exists.
        ghost: bool,
        /// Whether the archive table exists.
        archive: bool,
    },

    /// A parameter an earlier state should have recorded is absent.
    #[error("task parameter {0} is not set")]
    MissingParameter(&'static str),
}

/// Result type returned by [`super::Action::execute`].
pub type ActionOutcome = Result<ActionResult, ActionError>;
