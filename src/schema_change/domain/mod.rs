//! Domain model for online schema changes.
//!
//! A [`Schedule`] owns one [`ScheduleTask`] per table. Each task walks the
//! [`OscState`] graph, carrying its [`TaskParameters`] and the latest
//! observed [`TaskResult`]. Nothing in this module performs I/O.

mod error;
mod ids;
mod parameters;
mod result;
mod schedule;
mod state;
mod table;
mod versioning;

pub use error::{OscDomainError, ParseOscStateError, ParseTaskStatusError};
pub use ids::{ResourceId, ScheduleId, ScheduleTaskId};
pub use parameters::{
    Backend, ErrorStrategy, OriginTableCleanStrategy, RateLimitConfig, ScheduleParameters,
    SwapTableType, TASK_PARAMETERS_VERSION, TaskParameters,
};
pub use result::{
    FullVerificationResult, MigrationTaskStatus, PrecheckResult, StepName, StepResult, TaskResult,
    is_swap_table_ready, weighted_task_percentage,
};
pub use schedule::{PersistedScheduleData, PersistedScheduleTaskData, Schedule, ScheduleTask};
pub use state::{OscState, TaskStatus};
pub use table::{
    MAX_TABLE_NAME_LENGTH, TableDefinition, UniqueKey, archive_table_name,
    check_column_compatibility, check_table_eligible, check_table_name_length, ghost_table_name,
};
pub use versioning::{
    ParameterUpgradeError, TaskParametersUpgrader, UpgradeResult, decode_task_parameters,
    encode_task_parameters,
};
