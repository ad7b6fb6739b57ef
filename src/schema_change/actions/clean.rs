//! Idempotent teardown after a task finished, failed, or was cancelled.
//!
//! Cleanup never fails: anything that cannot be torn down yet keeps the
//! task in `CleanResource` so the next poll tries again.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema_change::{
    domain::{ErrorStrategy, OriginTableCleanStrategy, OscState, TaskStatus},
    ports::{ControlPlane, MigrationService, MigrationServiceError, ResourceError},
};

use super::{Action, ActionContext, ActionError, ActionOutcome, ActionResult};

/// State that follows a finished cleanup.
///
/// A cancelled task ends the schedule. A failed task ends it too unless
/// the schedule continues past errors.
fn completion_state(context: &ActionContext) -> OscState {
    match context.task().status() {
        TaskStatus::Canceled => OscState::Complete,
        TaskStatus::Failed | TaskStatus::Abnormal => {
            match context.schedule().parameters().error_strategy {
                ErrorStrategy::Continue => OscState::YieldContext,
                ErrorStrategy::Abort => OscState::Complete,
            }
        }
        TaskStatus::Preparing | TaskStatus::Running | TaskStatus::Done => OscState::YieldContext,
    }
}

/// Drops the ghost table and, when configured, the archived origin table.
async fn drop_leftover_tables(context: &ActionContext) -> Result<(), ActionError> {
    let parameters = context.parameters();
    let session = context.open_session().await?;
    session
        .drop_table_if_exists(&parameters.new_table_name)
        .await?;
    let drop_archive = context.schedule().parameters().origin_table_clean_strategy
        == OriginTableCleanStrategy::Drop
        && context.task().status() == TaskStatus::Done;
    if drop_archive {
        session
            .drop_table_if_exists(&parameters.renamed_table_name)
            .await?;
    }
    Ok(())
}

async fn retry_if_tables_remain(context: &ActionContext) -> Option<ActionResult> {
    if let Err(err) = drop_leftover_tables(context).await {
        warn!(task_id = %context.task().id(), error = %err, "failed to drop leftover tables, retrying");
        return Some(ActionResult::stay(OscState::CleanResource));
    }
    None
}

fn completed(context: &ActionContext) -> ActionResult {
    let next_state = completion_state(context);
    info!(
        task_id = %context.task().id(),
        status = context.task().status().as_str(),
        next_state = next_state.as_str(),
        "resources cleaned"
    );
    ActionResult::transition(OscState::CleanResource, next_state)
}

/// Stops and releases the migration-service project, then drops leftover
/// tables.
#[derive(Clone)]
pub struct MigrationServiceCleanResourcesAction {
    service: Arc<dyn MigrationService>,
}

impl MigrationServiceCleanResourcesAction {
    /// Creates the action.
    #[must_use]
    pub fn new(service: Arc<dyn MigrationService>) -> Self {
        Self { service }
    }

    async fn release_project(&self, context: &ActionContext, project_id: &str) {
        let task_id = context.task().id();
        let stopped = self.service.stop_project(project_id).await;
        let released = match stopped {
            Ok(()) => self.service.release_project(project_id).await,
            Err(err) => Err(err),
        };
        match released {
            Ok(()) => info!(%task_id, project_id, "migration project released"),
            Err(MigrationServiceError::ProjectNotFound(_)) => {
                info!(%task_id, project_id, "migration project already gone");
            }
            Err(err) => warn!(%task_id, project_id, error = %err, "failed to release migration project"),
        }
    }
}

impl std::fmt::Debug for MigrationServiceCleanResourcesAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationServiceCleanResourcesAction")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for MigrationServiceCleanResourcesAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        if let Some(project_id) = context.parameters().migration_project_id.clone() {
            self.release_project(context, &project_id).await;
        }
        if let Some(retry) = retry_if_tables_remain(context).await {
            return Ok(retry);
        }
        Ok(completed(context))
    }
}

/// Clears the worker, drops leftover tables, and destroys the worker
/// resource exactly once.
#[derive(Clone)]
pub struct WorkerCleanResourcesAction {
    control_plane: Arc<dyn ControlPlane>,
}

impl WorkerCleanResourcesAction {
    /// Creates the action.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Returns `false` when the resource could not be released yet.
    async fn release_resource(context: &mut ActionContext) -> bool {
        let task_id = context.task().id();
        let Some(resource_id) = context.parameters().resource_id else {
            return true;
        };
        if context.parameters().resource_released {
            return true;
        }
        match context.resources().destroy(resource_id).await {
            Ok(()) => info!(%task_id, %resource_id, "worker resource destroyed"),
            Err(ResourceError::NotFound(_)) => {
                info!(%task_id, %resource_id, "worker resource already gone");
            }
            Err(err) => {
                warn!(%task_id, %resource_id, error = %err, "failed to destroy worker resource, retrying");
                return false;
            }
        }
        context.task_mut().parameters_mut().resource_released = true;
        if let Err(err) = context.persist_parameters().await {
            warn!(%task_id, error = %err, "failed to record released resource, retrying");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for WorkerCleanResourcesAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCleanResourcesAction")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for WorkerCleanResourcesAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let parameters = context.parameters();
        let live_url = parameters
            .control_url
            .as_deref()
            .filter(|_| !parameters.resource_released);
        if let Some(url) = live_url {
            if let Err(err) = self.control_plane.clear(url).await {
                warn!(task_id = %context.task().id(), error = %err, "failed to clear worker");
            }
        }
        if let Some(retry) = retry_if_tables_remain(context).await {
            return Ok(retry);
        }
        if !Self::release_resource(context).await {
            return Ok(ActionResult::stay(OscState::CleanResource));
        }
        Ok(completed(context))
    }
}
