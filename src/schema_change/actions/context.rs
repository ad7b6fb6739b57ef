//! Per-poll action context.

use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;

use crate::schema_change::{
    domain::{OscState, Schedule, ScheduleTask, TaskParameters},
    ports::{
        ConnectionConfig, ConnectionProvider, ResourceManager, ScheduleRepository,
        ScheduleRepositoryError, SessionGuard,
    },
};

use super::ActionError;

/// Long-lived collaborators shared by every poll.
#[derive(Clone)]
pub struct ActionCollaborators {
    /// Schedule and task persistence.
    pub repository: Arc<dyn ScheduleRepository>,
    /// Database sessions.
    pub connections: Arc<dyn ConnectionProvider>,
    /// Worker compute resources.
    pub resources: Arc<dyn ResourceManager>,
    /// Time source.
    pub clock: Arc<dyn Clock + Send + Sync>,
}

impl ActionCollaborators {
    /// Bundles collaborators.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ScheduleRepository>,
        connections: Arc<dyn ConnectionProvider>,
        resources: Arc<dyn ResourceManager>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            repository,
            connections,
            resources,
            clock,
        }
    }
}

impl std::fmt::Debug for ActionCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCollaborators").finish_non_exhaustive()
    }
}

/// Everything an action may read or change during one poll.
///
/// Built fresh from persisted records on every poll; the task copy is
/// handed back to the state machine afterwards.
#[derive(Debug)]
pub struct ActionContext {
    schedule: Schedule,
    task: ScheduleTask,
    collaborators: ActionCollaborators,
}

impl ActionContext {
    /// Creates a context for one poll of `task`.
    #[must_use]
    pub const fn new(
        schedule: Schedule,
        task: ScheduleTask,
        collaborators: ActionCollaborators,
    ) -> Self {
        Self {
            schedule,
            task,
            collaborators,
        }
    }

    /// Returns the owning schedule.
    #[must_use]
    pub const fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Returns the task being polled.
    #[must_use]
    pub const fn task(&self) -> &ScheduleTask {
        &self.task
    }

    /// Returns the task being polled for mutation.
    pub const fn task_mut(&mut self) -> &mut ScheduleTask {
        &mut self.task
    }

    /// Returns the task parameters.
    #[must_use]
    pub const fn parameters(&self) -> &TaskParameters {
        self.task.parameters()
    }

    /// Returns the state the task is in.
    #[must_use]
    pub const fn state(&self) -> OscState {
        self.task.state()
    }

    /// Returns the shared collaborators.
    #[must_use]
    pub const fn collaborators(&self) -> &ActionCollaborators {
        &self.collaborators
    }

    /// Returns the resource manager.
    #[must_use]
    pub fn resources(&self) -> &dyn ResourceManager {
        self.collaborators.resources.as_ref()
    }

    /// Returns the time source.
    #[must_use]
    pub fn clock(&self) -> &(dyn Clock + Send + Sync) {
        self.collaborators.clock.as_ref()
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.collaborators.clock.utc()
    }

    /// Opens a session on the schedule datasource scoped to the task
    /// database.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Database`] when the session cannot be opened.
    pub async fn open_session(&self) -> Result<SessionGuard, ActionError> {
        let session = self
            .collaborators
            .connections
            .create_session(
                &self.schedule.parameters().datasource,
                &self.task.parameters().database_name,
            )
            .await?;
        Ok(session)
    }

    /// Returns the connection settings of the schedule datasource.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Database`] when the datasource is unknown.
    pub async fn connection_config(&self) -> Result<ConnectionConfig, ActionError> {
        let config = self
            .collaborators
            .connections
            .connection_config(&self.schedule.parameters().datasource)
            .await?;
        Ok(config)
    }

    /// Persists the task parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Repository`] when the write fails or no row
    /// was updated.
    pub async fn persist_parameters(&self) -> Result<(), ActionError> {
        let rows = self
            .collaborators
            .repository
            .update_task_parameters(self.task.id(), self.task.parameters())
            .await?;
        self.ensure_written(rows)
    }

    /// Persists the task result, if one was observed.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Repository`] when the write fails or no row
    /// was updated.
    pub async fn persist_result(&self) -> Result<(), ActionError> {
        let Some(result) = self.task.result() else {
            return Ok(());
        };
        let rows = self
            .collaborators
            .repository
            .update_task_result(self.task.id(), result)
            .await?;
        self.ensure_written(rows)
    }

    /// Persists every field of the task.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Repository`] when the write fails.
    pub async fn persist_task(&self) -> Result<(), ActionError> {
        self.collaborators.repository.update_task(&self.task).await?;
        Ok(())
    }

    /// Consumes the context and returns the task.
    #[must_use]
    pub fn into_task(self) -> ScheduleTask {
        self.task
    }

    const fn ensure_written(&self, rows: usize) -> Result<(), ActionError> {
        if rows == 0 {
            return Err(ActionError::Repository(
                ScheduleRepositoryError::TaskNotFound(self.task.id()),
            ));
        }
        Ok(())
    }
}
