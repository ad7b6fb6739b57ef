//! Drives one schedule task through its states, one poll at a time.
//!
//! Each poll loads the persisted task, runs the action bound to its state,
//! validates the declared successor, and persists the task before
//! returning. Polls of one task never overlap; polls of different tasks
//! run independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::OscSettings;
use crate::schema_change::{
    actions::{ActionCollaborators, ActionContext, ActionError, ActionOutput, ActionResult},
    domain::{
        OscDomainError, OscState, Schedule, ScheduleId, ScheduleTask, ScheduleTaskId,
        SwapTableType, TaskStatus,
    },
    ports::ScheduleRepositoryError,
};

use super::StateActions;

/// Errors raised by the state machine itself, as opposed to action
/// failures, which are recorded on the task.
#[derive(Debug, Clone, Error)]
pub enum StateMachineError {
    /// Persistence failed.
    #[error(transparent)]
    Repository(#[from] ScheduleRepositoryError),

    /// An operator request was invalid for the task.
    #[error(transparent)]
    Domain(#[from] OscDomainError),

    /// The task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(ScheduleTaskId),

    /// The schedule owning a task does not exist.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    /// The task already reached `Complete`.
    #[error("task {0} is already complete")]
    TaskCompleted(ScheduleTaskId),

    /// No action is registered for the state.
    #[error("no action bound to state {0}")]
    NoActionBound(OscState),
}

/// Result type for state machine operations.
pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll of the same task is in flight.
    Busy,
    /// The task is queued behind a sibling and has not been started.
    Idle,
    /// The task moved from `from` to `to`, which may be the same state.
    Stepped {
        /// State before the poll.
        from: OscState,
        /// State after the poll.
        to: OscState,
        /// Side output of the action, if any.
        output: Option<ActionOutput>,
    },
    /// The task is complete; polling should stop.
    Finished,
    /// The task is abnormal and waits for an operator to resume it.
    Halted,
}

impl PollOutcome {
    /// Returns whether the poller should stop polling the task.
    #[must_use]
    pub const fn stops_polling(&self) -> bool {
        matches!(self, Self::Idle | Self::Finished | Self::Halted)
    }
}

/// Single-flight guard per task.
#[derive(Debug, Default)]
struct TaskLocks {
    locks: Mutex<HashMap<ScheduleTaskId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskLocks {
    fn handle(&self, id: ScheduleTaskId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }
}

/// Orchestrates schedule tasks through the schema-change states.
#[derive(Debug)]
pub struct OscStateMachine {
    collaborators: ActionCollaborators,
    actions: StateActions,
    task_expiry: chrono::Duration,
    locks: TaskLocks,
}

impl OscStateMachine {
    /// Creates a state machine.
    #[must_use]
    pub fn new(
        collaborators: ActionCollaborators,
        actions: StateActions,
        settings: &OscSettings,
    ) -> Self {
        Self {
            collaborators,
            actions,
            task_expiry: settings.task_expiry(),
            locks: TaskLocks::default(),
        }
    }

    /// Returns the shared collaborators.
    #[must_use]
    pub const fn collaborators(&self) -> &ActionCollaborators {
        &self.collaborators
    }

    async fn load_task(&self, id: ScheduleTaskId) -> StateMachineResult<ScheduleTask> {
        self.collaborators
            .repository
            .find_task(id)
            .await?
            .ok_or(StateMachineError::TaskNotFound(id))
    }

    async fn load_schedule(&self, id: ScheduleId) -> StateMachineResult<Schedule> {
        self.collaborators
            .repository
            .find_schedule(id)
            .await?
            .ok_or(StateMachineError::ScheduleNotFound(id))
    }

    async fn save(&self, task: &ScheduleTask) -> StateMachineResult<()> {
        self.collaborators.repository.update_task(task).await?;
        Ok(())
    }

    /// Runs one step of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError`] when the task or its schedule cannot
    /// be loaded or saved. Action failures are not errors: they route the
    /// task to cleanup.
    pub async fn poll(&self, id: ScheduleTaskId) -> StateMachineResult<PollOutcome> {
        let Ok(_guard) = self.locks.handle(id).try_lock_owned() else {
            return Ok(PollOutcome::Busy);
        };

        let mut task = self.load_task(id).await?;
        let state = task.state();
        if state == OscState::Complete {
            return Ok(PollOutcome::Finished);
        }
        match task.status() {
            TaskStatus::Abnormal => return Ok(PollOutcome::Halted),
            TaskStatus::Preparing if state == OscState::YieldContext => {
                return Ok(PollOutcome::Idle);
            }
            _ => {}
        }

        if let Some(status) = self.forced_cleanup(&task) {
            task.route_to_cleanup(status, self.collaborators.clock.as_ref());
            self.save(&task).await?;
            warn!(task_id = %id, from = state.as_str(), status = status.as_str(), "routing task to cleanup");
            return Ok(PollOutcome::Stepped {
                from: state,
                to: OscState::CleanResource,
                output: None,
            });
        }

        let schedule = self.load_schedule(task.schedule_id()).await?;
        let action = self
            .actions
            .action_for(state)
            .ok_or(StateMachineError::NoActionBound(state))?;
        let mut context = ActionContext::new(schedule, task, self.collaborators.clone());
        let outcome = action.execute(&mut context).await;
        let executed = context.into_task();

        match outcome {
            Ok(result) => self.apply(executed, result).await,
            Err(err) => self.fail(executed, &err).await,
        }
    }

    /// Returns the status to route with when the task must go to cleanup
    /// without running its action.
    fn forced_cleanup(&self, task: &ScheduleTask) -> Option<TaskStatus> {
        if matches!(
            task.state(),
            OscState::CleanResource | OscState::YieldContext
        ) {
            return None;
        }
        match task.status() {
            TaskStatus::Failed | TaskStatus::Canceled => Some(task.status()),
            _ if task.is_expired(self.collaborators.clock.utc(), self.task_expiry) => {
                Some(TaskStatus::Canceled)
            }
            _ => None,
        }
    }

    async fn apply(
        &self,
        mut task: ScheduleTask,
        result: ActionResult,
    ) -> StateMachineResult<PollOutcome> {
        let clock = self.collaborators.clock.as_ref();
        let from = task.state();
        let to = result.next_state;

        if let Some(ActionOutput::Handoff { task_id: next, .. }) = &result.output {
            let next = *next;
            if !self.hand_over(next).await? {
                debug!(task_id = %task.id(), next_task_id = %next, "next table busy, retrying handoff");
                return Ok(PollOutcome::Stepped {
                    from,
                    to: from,
                    output: None,
                });
            }
        }

        if let Err(err) = task.transition_state(to, clock) {
            error!(task_id = %task.id(), from = from.as_str(), to = to.as_str(), "action declared an unregistered successor");
            task.set_status(TaskStatus::Abnormal, clock);
            task.set_extra_info(err.to_string());
            self.save(&task).await?;
            return Ok(PollOutcome::Halted);
        }

        if task.status() == TaskStatus::Preparing {
            task.set_status(TaskStatus::Running, clock);
        }
        if from == OscState::SwapTable
            && to == OscState::CleanResource
            && task.status() == TaskStatus::Running
        {
            task.set_status(TaskStatus::Done, clock);
        }
        if let Some(ActionOutput::Note(note)) = &result.output {
            task.set_extra_info(note.clone());
        }
        self.save(&task).await?;

        if from == to {
            debug!(task_id = %task.id(), state = from.as_str(), "staying in state");
        } else {
            info!(task_id = %task.id(), from = from.as_str(), to = to.as_str(), "state transition");
        }
        if to == OscState::Complete {
            self.complete_schedule_if_idle(task.schedule_id()).await?;
        }
        Ok(PollOutcome::Stepped {
            from,
            to,
            output: result.output,
        })
    }

    /// Starts the queued task `next` under its own poll lock.
    ///
    /// Returns `false` when another operation holds that lock. A task that
    /// is already running is left as it is.
    async fn hand_over(&self, next: ScheduleTaskId) -> StateMachineResult<bool> {
        let Ok(_guard) = self.locks.handle(next).try_lock_owned() else {
            return Ok(false);
        };
        let mut task = self.load_task(next).await?;
        if task.status() == TaskStatus::Preparing {
            task.start(self.collaborators.clock.as_ref());
            self.save(&task).await?;
            info!(task_id = %next, "next table started");
        }
        Ok(true)
    }

    async fn fail(
        &self,
        mut task: ScheduleTask,
        err: &ActionError,
    ) -> StateMachineResult<PollOutcome> {
        let clock = self.collaborators.clock.as_ref();
        let from = task.state();
        task.set_extra_info(err.to_string());

        if matches!(from, OscState::CleanResource | OscState::YieldContext) {
            warn!(task_id = %task.id(), state = from.as_str(), error = %err, "action failed, retrying in place");
            self.save(&task).await?;
            return Ok(PollOutcome::Stepped {
                from,
                to: from,
                output: None,
            });
        }

        error!(task_id = %task.id(), state = from.as_str(), error = %err, "action failed");
        task.route_to_cleanup(TaskStatus::Failed, clock);
        self.save(&task).await?;
        Ok(PollOutcome::Stepped {
            from,
            to: OscState::CleanResource,
            output: None,
        })
    }

    /// Marks the schedule complete once no task is active any more.
    ///
    /// Tasks that were never started do not keep a schedule open.
    async fn complete_schedule_if_idle(&self, schedule_id: ScheduleId) -> StateMachineResult<()> {
        let tasks = self.collaborators.repository.list_tasks(schedule_id).await?;
        let active = tasks.iter().any(|task| {
            task.state() != OscState::Complete && task.status() != TaskStatus::Preparing
        });
        if active {
            return Ok(());
        }
        let mut schedule = self.load_schedule(schedule_id).await?;
        if !schedule.is_completed() {
            schedule.complete(self.collaborators.clock.as_ref());
            self.collaborators
                .repository
                .update_schedule(&schedule)
                .await?;
            info!(%schedule_id, "schedule complete");
        }
        Ok(())
    }

    /// Starts a queued task or resumes a halted one.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::TaskCompleted`] for a complete task,
    /// or a load or save failure.
    pub async fn start(&self, id: ScheduleTaskId) -> StateMachineResult<ScheduleTask> {
        let _guard = self.locks.handle(id).lock_owned().await;
        let mut task = self.load_task(id).await?;
        if task.state() == OscState::Complete {
            return Err(StateMachineError::TaskCompleted(id));
        }
        task.start(self.collaborators.clock.as_ref());
        self.save(&task).await?;
        info!(task_id = %id, state = task.state().as_str(), "task started");
        Ok(task)
    }

    /// Cancels a task: runs the current action's rollback, then routes the
    /// task to cleanup as cancelled.
    ///
    /// A task whose tables were already swapped keeps its `Done` status and
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::TaskCompleted`] for a complete task,
    /// or a load or save failure.
    pub async fn cancel(&self, id: ScheduleTaskId) -> StateMachineResult<ScheduleTask> {
        let _guard = self.locks.handle(id).lock_owned().await;
        let task = self.load_task(id).await?;
        let state = task.state();
        if state == OscState::Complete {
            return Err(StateMachineError::TaskCompleted(id));
        }
        if task.status() == TaskStatus::Done {
            info!(task_id = %id, state = state.as_str(), "tables already swapped, cancel ignored");
            return Ok(task);
        }

        let schedule = self.load_schedule(task.schedule_id()).await?;
        let mut cancelled = match self.actions.action_for(state) {
            Some(action) if !matches!(state, OscState::CleanResource | OscState::YieldContext) => {
                let mut context = ActionContext::new(schedule, task, self.collaborators.clone());
                action.rollback(&mut context).await;
                context.into_task()
            }
            _ => task,
        };

        let clock = self.collaborators.clock.as_ref();
        cancelled.set_status(TaskStatus::Canceled, clock);
        cancelled.route_to_cleanup(TaskStatus::Canceled, clock);
        self.save(&cancelled).await?;
        info!(task_id = %id, from = state.as_str(), "task cancelled");
        Ok(cancelled)
    }

    /// Lets a task waiting for a manual swap proceed.
    ///
    /// # Errors
    ///
    /// Returns [`OscDomainError::ManualSwapNotApplicable`] for schedules
    /// swapping automatically, [`OscDomainError::ManualSwapNotEnabled`]
    /// before the monitor enabled the swap, or a load or save failure.
    pub async fn trigger_manual_swap(&self, id: ScheduleTaskId) -> StateMachineResult<ScheduleTask> {
        let _guard = self.locks.handle(id).lock_owned().await;
        let mut task = self.load_task(id).await?;
        let schedule = self.load_schedule(task.schedule_id()).await?;
        if schedule.parameters().swap_table_type != SwapTableType::Manual {
            return Err(OscDomainError::ManualSwapNotApplicable(id).into());
        }
        let Some(mut result) = task
            .result()
            .filter(|result| result.manual_swap_table_enabled)
            .cloned()
        else {
            return Err(OscDomainError::ManualSwapNotEnabled(id).into());
        };
        result.manual_swap_table_started = true;
        task.set_result(result);
        self.save(&task).await?;
        info!(task_id = %id, "manual swap triggered");
        Ok(task)
    }
}
