//! Operator-facing entry points: submitting schedules and steering tasks.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::schema_change::{
    domain::{
        OscDomainError, RateLimitConfig, Schedule, ScheduleId, ScheduleParameters, ScheduleTask,
        ScheduleTaskId, TaskParameters, archive_table_name, check_table_eligible,
        check_table_name_length, ghost_table_name,
    },
    ports::{DbError, DbSession, ScheduleRepository, ScheduleRepositoryError},
};

use super::{ActionScheduler, OscStateMachine, StateMachineError};

/// Errors returned by [`OnlineSchemaChangeService`].
#[derive(Debug, Clone, Error)]
pub enum OscOperationError {
    /// The request failed validation.
    #[error(transparent)]
    Domain(#[from] OscDomainError),

    /// Persistence failed.
    #[error(transparent)]
    Repository(#[from] ScheduleRepositoryError),

    /// The tables could not be inspected.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The state machine rejected the request.
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// The schedule does not exist.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),
}

/// Result type for operator operations.
pub type OscOperationResult<T> = Result<T, OscOperationError>;

/// One table to change within a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChange {
    /// Table being changed.
    pub table_name: String,
    /// DDL creating the table in its new shape.
    pub new_table_ddl: String,
    /// Current DDL of the table, if the caller captured it.
    pub origin_table_ddl: Option<String>,
    /// Statements run right after the ghost table is created.
    pub auxiliary_sqls: Vec<String>,
}

impl TableChange {
    /// Creates a change of `table_name` to `new_table_ddl`.
    #[must_use]
    pub fn new(table_name: impl Into<String>, new_table_ddl: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            new_table_ddl: new_table_ddl.into(),
            origin_table_ddl: None,
            auxiliary_sqls: Vec::new(),
        }
    }

    /// Sets the statements run after the ghost table is created.
    #[must_use]
    pub fn with_auxiliary_sqls(mut self, sqls: impl IntoIterator<Item = String>) -> Self {
        self.auxiliary_sqls = sqls.into_iter().collect();
        self
    }

    fn validate(&self) -> Result<(), OscDomainError> {
        if self.table_name.trim().is_empty() {
            return Err(OscDomainError::EmptyTableName);
        }
        if self.new_table_ddl.trim().is_empty() {
            return Err(OscDomainError::EmptyNewTableDdl);
        }
        Ok(())
    }
}

async fn check_table(session: &dyn DbSession, table: &str) -> OscOperationResult<()> {
    check_table_name_length(table)?;
    let origin = session
        .describe_table(table)
        .await?
        .ok_or_else(|| OscDomainError::OriginTableNotFound(table.to_owned()))?;
    for derived in [ghost_table_name(table), archive_table_name(table)] {
        if session.table_exists(&derived).await? {
            return Err(OscDomainError::TableAlreadyExists(derived).into());
        }
    }
    check_table_eligible(&origin)?;
    Ok(())
}

/// A schedule submission: job parameters plus the tables, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitScheduleRequest {
    /// Parameters shared by every task.
    pub parameters: ScheduleParameters,
    /// Tables to change, processed one after another.
    pub tables: Vec<TableChange>,
}

/// A stored schedule with its tasks ordered by sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedSchedule {
    /// The stored schedule.
    pub schedule: Schedule,
    /// The stored tasks; the first one is already started.
    pub tasks: Vec<ScheduleTask>,
}

/// Schema-change service combining persistence, the state machine, and
/// the poll scheduler.
#[derive(Debug, Clone)]
pub struct OnlineSchemaChangeService {
    machine: Arc<OscStateMachine>,
    scheduler: Arc<ActionScheduler>,
}

impl OnlineSchemaChangeService {
    /// Creates a service over `machine`, polling through `scheduler`.
    #[must_use]
    pub const fn new(machine: Arc<OscStateMachine>, scheduler: Arc<ActionScheduler>) -> Self {
        Self { machine, scheduler }
    }

    fn repository(&self) -> &dyn ScheduleRepository {
        self.machine.collaborators().repository.as_ref()
    }

    /// Inspects every table of a request against the live schema.
    async fn check_tables(
        &self,
        parameters: &ScheduleParameters,
        tables: &[TableChange],
    ) -> OscOperationResult<()> {
        let session = self
            .machine
            .collaborators()
            .connections
            .create_session(&parameters.datasource, &parameters.database_name)
            .await?;
        for table in tables {
            check_table(&*session, table.table_name.trim()).await?;
        }
        Ok(())
    }

    /// Returns the poll scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &ActionScheduler {
        &self.scheduler
    }

    /// Stores a schedule with one task per table and starts the first task.
    ///
    /// Every task starts out with the schedule's rate limit.
    ///
    /// # Errors
    ///
    /// Returns [`OscDomainError::EmptySchedule`],
    /// [`OscDomainError::EmptyTableName`] or
    /// [`OscDomainError::EmptyNewTableDdl`] for malformed requests. A table
    /// that is missing, too long to derive names from, already shadowed by
    /// a ghost or archive table, or not eligible per
    /// [`check_table_eligible`] is rejected before anything is stored.
    /// Database and persistence failures are returned as they occur.
    pub async fn submit(
        &self,
        request: SubmitScheduleRequest,
    ) -> OscOperationResult<SubmittedSchedule> {
        if request.tables.is_empty() {
            return Err(OscDomainError::EmptySchedule.into());
        }
        for table in &request.tables {
            table.validate()?;
        }
        self.check_tables(&request.parameters, &request.tables)
            .await?;

        let clock = self.machine.collaborators().clock.as_ref();
        let schedule = Schedule::new(request.parameters, clock);
        self.repository().store_schedule(&schedule).await?;

        let parameters = schedule.parameters();
        let mut tasks = Vec::with_capacity(request.tables.len());
        for (sequence, table) in (0_u32..).zip(request.tables) {
            let mut task_parameters = TaskParameters::new(
                parameters.database_name.clone(),
                table.table_name,
                table.new_table_ddl,
            )
            .with_auxiliary_sqls(table.auxiliary_sqls)
            .with_rate_limit(parameters.rate_limit);
            if let Some(ddl) = table.origin_table_ddl {
                task_parameters = task_parameters.with_origin_table_ddl(ddl);
            }
            let task = ScheduleTask::new(schedule.id(), sequence, task_parameters, clock);
            self.repository().store_task(&task).await?;
            tasks.push(task);
        }
        info!(schedule_id = %schedule.id(), tasks = tasks.len(), "schedule submitted");

        if let Some(first) = tasks.first_mut() {
            *first = self.machine.start(first.id()).await?;
            self.scheduler.submit(first.id());
        }
        Ok(SubmittedSchedule { schedule, tasks })
    }

    /// Starts a queued task or resumes a halted one, and polls it.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError`] when the task is missing or complete.
    pub async fn start(&self, task_id: ScheduleTaskId) -> OscOperationResult<ScheduleTask> {
        let task = self.machine.start(task_id).await?;
        self.scheduler.submit(task_id);
        Ok(task)
    }

    /// Cancels a task; its cleanup runs on the following polls.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError`] when the task is missing or complete.
    pub async fn cancel(&self, task_id: ScheduleTaskId) -> OscOperationResult<ScheduleTask> {
        let task = self.machine.cancel(task_id).await?;
        self.scheduler.submit(task_id);
        Ok(task)
    }

    /// Lets a task waiting in manual swap mode swap its tables.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::Domain`] when the schedule swaps
    /// automatically or the monitor has not enabled the swap yet.
    pub async fn trigger_manual_swap(
        &self,
        task_id: ScheduleTaskId,
    ) -> OscOperationResult<ScheduleTask> {
        Ok(self.machine.trigger_manual_swap(task_id).await?)
    }

    /// Replaces the job-level rate limit; running tasks pick it up on their
    /// next monitor poll.
    ///
    /// # Errors
    ///
    /// Returns [`OscOperationError::ScheduleNotFound`] for unknown
    /// schedules, or a persistence failure.
    pub async fn update_rate_limit(
        &self,
        schedule_id: ScheduleId,
        rate_limit: RateLimitConfig,
    ) -> OscOperationResult<Schedule> {
        let mut schedule = self
            .repository()
            .find_schedule(schedule_id)
            .await?
            .ok_or(OscOperationError::ScheduleNotFound(schedule_id))?;
        schedule.set_rate_limit(rate_limit);
        self.repository().update_schedule(&schedule).await?;
        info!(%schedule_id, row_limit = ?rate_limit.row_limit, "rate limit updated");
        Ok(schedule)
    }

    /// Returns the tasks of a schedule ordered by sequence.
    ///
    /// # Errors
    ///
    /// Returns a persistence failure.
    pub async fn tasks(&self, schedule_id: ScheduleId) -> OscOperationResult<Vec<ScheduleTask>> {
        Ok(self.repository().list_tasks(schedule_id).await?)
    }
}
