//! Error types for schema-change domain validation and parsing.

use super::{OscState, ScheduleTaskId};
use thiserror::Error;

/// Errors returned while validating schema-change domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OscDomainError {
    /// The requested state is not a registered successor of the current one.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        /// Task whose transition was rejected.
        task_id: ScheduleTaskId,
        /// Current state.
        from: OscState,
        /// Requested state.
        to: OscState,
    },

    /// A table name was empty after trimming.
    #[error("table name must not be empty")]
    EmptyTableName,

    /// The new table DDL was empty after trimming.
    #[error("new table ddl must not be empty")]
    EmptyNewTableDdl,

    /// A schedule was submitted without any table.
    #[error("schedule must contain at least one table")]
    EmptySchedule,

    /// The table name leaves no room for the derived table names.
    #[error("table name `{table}` is {length} characters long, at most {max} are supported")]
    TableNameTooLong {
        /// Offending table name.
        table: String,
        /// Length in characters.
        length: usize,
        /// Supported maximum.
        max: usize,
    },

    /// The table to change does not exist.
    #[error("table not found: {0}")]
    OriginTableNotFound(String),

    /// A ghost or archive table name is already taken.
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    /// The table declares foreign keys.
    #[error("unsupported: table `{0}` has foreign keys")]
    ForeignKeyTable(String),

    /// The table has neither a primary key nor a NOT NULL unique key.
    #[error("unsupported: table `{0}` has no primary key or not nullable unique key")]
    NoUniqueKey(String),

    /// An origin column is missing from the rebuilt table.
    #[error("unsupported: column not found in new table, column `{column}` is missing from `{table}`")]
    ColumnNotFound {
        /// Origin column name.
        column: String,
        /// New (ghost) table name.
        table: String,
    },

    /// A primary key column of the new table does not exist in the origin.
    #[error(
        "unsupported: primary key column `{column}` of the new table does not exist in the origin table"
    )]
    PrimaryKeyColumnNotInOrigin {
        /// Offending primary key column.
        column: String,
    },

    /// A manual swap was requested before the monitor enabled it.
    #[error("manual swap is not enabled for task {0}")]
    ManualSwapNotEnabled(ScheduleTaskId),

    /// A manual swap was requested for a schedule in automatic swap mode.
    #[error("task {0} swaps tables automatically")]
    ManualSwapNotApplicable(ScheduleTaskId),
}

/// Error returned while parsing orchestration states from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown osc state: {0}")]
pub struct ParseOscStateError(pub String);

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);
