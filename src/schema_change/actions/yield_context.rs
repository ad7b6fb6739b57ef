//! Hands the schedule over to the next queued table.

use async_trait::async_trait;
use tracing::info;

use crate::schema_change::domain::{OscState, ScheduleTask, TaskStatus};

use super::{Action, ActionContext, ActionOutcome, ActionOutput, ActionResult};

/// Picks the next table of the schedule and completes the current task.
///
/// The handoff names a sibling already started by an interrupted earlier
/// run before any queued one. Starting the sibling is left to the state
/// machine, which holds that sibling's poll lock while doing so.
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldContextAction;

impl YieldContextAction {
    /// Creates the action.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn next_sibling(tasks: Vec<ScheduleTask>, current: &ScheduleTask) -> Option<ScheduleTask> {
    let mut siblings: Vec<ScheduleTask> = tasks
        .into_iter()
        .filter(|task| task.id() != current.id() && task.state() != OscState::Complete)
        .collect();
    siblings.sort_by_key(ScheduleTask::sequence);
    let resumed = siblings
        .iter()
        .position(|task| task.status() == TaskStatus::Running);
    let queued = siblings
        .iter()
        .position(|task| task.status() == TaskStatus::Preparing);
    resumed.or(queued).map(|index| siblings.swap_remove(index))
}

#[async_trait]
impl Action for YieldContextAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let schedule_id = context.task().schedule_id();
        let tasks = context
            .collaborators()
            .repository
            .list_tasks(schedule_id)
            .await?;
        let Some(next) = next_sibling(tasks, context.task()) else {
            info!(task_id = %context.task().id(), %schedule_id, "no queued table left");
            return Ok(ActionResult::transition(
                OscState::YieldContext,
                OscState::Complete,
            ));
        };

        info!(
            task_id = %context.task().id(),
            next_task_id = %next.id(),
            %schedule_id,
            "handing over to next table"
        );
        Ok(
            ActionResult::transition(OscState::YieldContext, OscState::Complete).with_output(
                ActionOutput::Handoff {
                    schedule_id,
                    task_id: next.id(),
                },
            ),
        )
    }
}
