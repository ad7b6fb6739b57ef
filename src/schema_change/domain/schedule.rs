//! Schedule and schedule-task aggregates.

use super::{
    OscDomainError, OscState, RateLimitConfig, ScheduleId, ScheduleParameters, ScheduleTaskId,
    TaskParameters, TaskResult, TaskStatus,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// One submitted schema-change request covering one or more tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    id: ScheduleId,
    parameters: ScheduleParameters,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

/// Parameter object for reconstructing a persisted schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedScheduleData {
    /// Persisted schedule identifier.
    pub id: ScheduleId,
    /// Persisted job parameters.
    pub parameters: ScheduleParameters,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted completion timestamp, if the schedule finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Creates a new schedule.
    #[must_use]
    pub fn new(parameters: ScheduleParameters, clock: &(impl Clock + ?Sized)) -> Self {
        Self {
            id: ScheduleId::new(),
            parameters,
            created_at: clock.utc(),
            completed_at: None,
        }
    }

    /// Reconstructs a schedule from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedScheduleData) -> Self {
        Self {
            id: data.id,
            parameters: data.parameters,
            created_at: data.created_at,
            completed_at: data.completed_at,
        }
    }

    /// Returns the schedule identifier.
    #[must_use]
    pub const fn id(&self) -> ScheduleId {
        self.id
    }

    /// Returns the job parameters.
    #[must_use]
    pub const fn parameters(&self) -> &ScheduleParameters {
        &self.parameters
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the completion timestamp, if the schedule finished.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns whether every task of the schedule has finished.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Replaces the job-level rate limit.
    pub const fn set_rate_limit(&mut self, rate_limit: RateLimitConfig) {
        self.parameters.rate_limit = rate_limit;
    }

    /// Marks the schedule as finished.
    pub fn complete(&mut self, clock: &(impl Clock + ?Sized)) {
        if self.completed_at.is_none() {
            self.completed_at = Some(clock.utc());
        }
    }
}

/// One table's migration unit, driven through [`OscState`] by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTask {
    id: ScheduleTaskId,
    schedule_id: ScheduleId,
    sequence: u32,
    state: OscState,
    status: TaskStatus,
    parameters: TaskParameters,
    result: Option<TaskResult>,
    progress_percentage: f64,
    extra_info: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted schedule task.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedScheduleTaskData {
    /// Persisted task identifier.
    pub id: ScheduleTaskId,
    /// Owning schedule.
    pub schedule_id: ScheduleId,
    /// Position of the task within its schedule.
    pub sequence: u32,
    /// Persisted orchestration state.
    pub state: OscState,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted working parameters.
    pub parameters: TaskParameters,
    /// Persisted observed result, if any.
    pub result: Option<TaskResult>,
    /// Persisted progress in percent.
    pub progress_percentage: f64,
    /// Persisted note from the last action.
    pub extra_info: Option<String>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ScheduleTask {
    /// Creates a queued task parked in [`OscState::YieldContext`].
    #[must_use]
    pub fn new(
        schedule_id: ScheduleId,
        sequence: u32,
        parameters: TaskParameters,
        clock: &(impl Clock + ?Sized),
    ) -> Self {
        let timestamp = clock.utc();
        Self {
            id: ScheduleTaskId::new(),
            schedule_id,
            sequence,
            state: OscState::YieldContext,
            status: TaskStatus::Preparing,
            parameters,
            result: None,
            progress_percentage: 0.0,
            extra_info: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedScheduleTaskData) -> Self {
        Self {
            id: data.id,
            schedule_id: data.schedule_id,
            sequence: data.sequence,
            state: data.state,
            status: data.status,
            parameters: data.parameters,
            result: data.result,
            progress_percentage: data.progress_percentage,
            extra_info: data.extra_info,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> ScheduleTaskId {
        self.id
    }

    /// Returns the owning schedule identifier.
    #[must_use]
    pub const fn schedule_id(&self) -> ScheduleId {
        self.schedule_id
    }

    /// Returns the position of the task within its schedule.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Returns the current orchestration state.
    #[must_use]
    pub const fn state(&self) -> OscState {
        self.state
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the working parameters.
    #[must_use]
    pub const fn parameters(&self) -> &TaskParameters {
        &self.parameters
    }

    /// Returns the working parameters for mutation.
    pub const fn parameters_mut(&mut self) -> &mut TaskParameters {
        &mut self.parameters
    }

    /// Returns the last observed result, if any.
    #[must_use]
    pub const fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// Returns the progress in percent.
    #[must_use]
    pub const fn progress_percentage(&self) -> f64 {
        self.progress_percentage
    }

    /// Returns the note recorded by the last action, if any.
    #[must_use]
    pub fn extra_info(&self) -> Option<&str> {
        self.extra_info.as_deref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns whether the task has outlived `max_age` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.created_at) > max_age
    }

    /// Moves the task to `next`, enforcing the successor graph.
    ///
    /// # Errors
    ///
    /// Returns [`OscDomainError::InvalidStateTransition`] when `next` is not
    /// a registered successor of the current state.
    pub fn transition_state(
        &mut self,
        next: OscState,
        clock: &(impl Clock + ?Sized),
    ) -> Result<(), OscDomainError> {
        if !self.state.can_transition_to(next) {
            return Err(OscDomainError::InvalidStateTransition {
                task_id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.touch(clock);
        Ok(())
    }

    /// Starts or resumes the task.
    ///
    /// A task parked in [`OscState::YieldContext`] moves to
    /// [`OscState::CreateGhostTables`]; any other state resumes in place.
    pub fn start(&mut self, clock: &(impl Clock + ?Sized)) {
        if self.state == OscState::YieldContext {
            self.state = OscState::CreateGhostTables;
        }
        self.status = TaskStatus::Running;
        self.touch(clock);
    }

    /// Routes the task to [`OscState::CleanResource`] with `status`.
    ///
    /// A cancelled task stays cancelled even when a later failure routes it.
    pub fn route_to_cleanup(&mut self, status: TaskStatus, clock: &(impl Clock + ?Sized)) {
        self.state = OscState::CleanResource;
        if self.status != TaskStatus::Canceled {
            self.set_status(status, clock);
        }
        self.touch(clock);
    }

    /// Updates the lifecycle status; terminal statuses pin progress at 100%.
    pub fn set_status(&mut self, status: TaskStatus, clock: &(impl Clock + ?Sized)) {
        self.status = status;
        if status.is_terminal() {
            self.progress_percentage = 100.0;
        }
        self.touch(clock);
    }

    /// Replaces the working parameters.
    pub fn set_parameters(&mut self, parameters: TaskParameters) {
        self.parameters = parameters;
    }

    /// Replaces the observed result.
    pub fn set_result(&mut self, result: TaskResult) {
        self.result = Some(result);
    }

    /// Records progress in percent.
    pub const fn set_progress(&mut self, percentage: f64) {
        self.progress_percentage = percentage;
    }

    /// Records a note for operators.
    pub fn set_extra_info(&mut self, info: impl Into<String>) {
        self.extra_info = Some(info.into());
    }

    fn touch(&mut self, clock: &(impl Clock + ?Sized)) {
        self.updated_at = clock.utc();
    }
}
