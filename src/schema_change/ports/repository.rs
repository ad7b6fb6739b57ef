//! Repository port for schedules and schedule tasks.

use crate::schema_change::domain::{
    Schedule, ScheduleId, ScheduleTask, ScheduleTaskId, TaskParameters, TaskResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for schedule repository operations.
pub type ScheduleRepositoryResult<T> = Result<T, ScheduleRepositoryError>;

/// Schedule persistence contract.
///
/// Actions persist their parameter and result changes through the narrow
/// `update_task_*` methods; the state machine persists whole tasks with
/// [`ScheduleRepository::update_task`].
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Stores a new schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleRepositoryError::DuplicateSchedule`] when the
    /// identifier already exists.
    async fn store_schedule(&self, schedule: &Schedule) -> ScheduleRepositoryResult<()>;

    /// Persists changes to an existing schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleRepositoryError::ScheduleNotFound`] when the
    /// schedule does not exist.
    async fn update_schedule(&self, schedule: &Schedule) -> ScheduleRepositoryResult<()>;

    /// Finds a schedule by identifier.
    async fn find_schedule(&self, id: ScheduleId) -> ScheduleRepositoryResult<Option<Schedule>>;

    /// Stores a new task.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleRepositoryError::DuplicateTask`] when the identifier
    /// already exists.
    async fn store_task(&self, task: &ScheduleTask) -> ScheduleRepositoryResult<()>;

    /// Persists every field of an existing task.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleRepositoryError::TaskNotFound`] when the task does
    /// not exist.
    async fn update_task(&self, task: &ScheduleTask) -> ScheduleRepositoryResult<()>;

    /// Finds a task by identifier.
    async fn find_task(&self, id: ScheduleTaskId)
    -> ScheduleRepositoryResult<Option<ScheduleTask>>;

    /// Returns the tasks of a schedule ordered by sequence.
    async fn list_tasks(&self, schedule_id: ScheduleId)
    -> ScheduleRepositoryResult<Vec<ScheduleTask>>;

    /// Overwrites the parameters of a task; returns the number of rows
    /// affected.
    async fn update_task_parameters(
        &self,
        id: ScheduleTaskId,
        parameters: &TaskParameters,
    ) -> ScheduleRepositoryResult<usize>;

    /// Overwrites the result of a task; returns the number of rows affected.
    async fn update_task_result(
        &self,
        id: ScheduleTaskId,
        result: &TaskResult,
    ) -> ScheduleRepositoryResult<usize>;
}

/// Errors returned by schedule repository implementations.
#[derive(Debug, Clone, Error)]
pub enum ScheduleRepositoryError {
    /// A schedule with the same identifier already exists.
    #[error("duplicate schedule identifier: {0}")]
    DuplicateSchedule(ScheduleId),

    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(ScheduleTaskId),

    /// The schedule was not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    /// The task was not found.
    #[error("task not found: {0}")]
    TaskNotFound(ScheduleTaskId),

    /// A stored row could not be decoded.
    #[error("corrupt task row {task_id}: {message}")]
    Corrupt {
        /// Task whose row failed to decode.
        task_id: ScheduleTaskId,
        /// Decoder message.
        message: String,
    },

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl ScheduleRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
