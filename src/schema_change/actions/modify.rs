//! Pushes a changed job rate limit to the replication backend.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema_change::{
    domain::{OscState, RateLimitConfig},
    ports::{ControlPlane, MigrationService},
};

use super::{Action, ActionContext, ActionError, ActionOutcome, ActionResult};

async fn record_applied(context: &mut ActionContext, rate_limit: RateLimitConfig) -> ActionOutcome {
    context.task_mut().parameters_mut().rate_limit = rate_limit;
    context.persist_parameters().await?;
    info!(
        task_id = %context.task().id(),
        row_limit = ?rate_limit.row_limit,
        data_size_limit = ?rate_limit.data_size_limit,
        "rate limit applied"
    );
    Ok(ActionResult::transition(
        OscState::ModifyDataTask,
        OscState::MonitorDataTask,
    ))
}

/// Updates the rate limit of the migration-service project.
#[derive(Clone)]
pub struct MigrationServiceModifyDataTaskAction {
    service: Arc<dyn MigrationService>,
}

impl MigrationServiceModifyDataTaskAction {
    /// Creates the action.
    #[must_use]
    pub fn new(service: Arc<dyn MigrationService>) -> Self {
        Self { service }
    }
}

impl std::fmt::Debug for MigrationServiceModifyDataTaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationServiceModifyDataTaskAction")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for MigrationServiceModifyDataTaskAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let target = context.schedule().parameters().rate_limit;
        let project_id = context
            .parameters()
            .migration_project_id
            .clone()
            .ok_or(ActionError::MissingParameter("migration_project_id"))?;

        if let Err(err) = self.service.update_rate_limit(&project_id, &target).await {
            warn!(task_id = %context.task().id(), error = %err, "rate limit update failed, retrying");
            return Ok(ActionResult::stay(OscState::ModifyDataTask));
        }
        record_applied(context, target).await
    }
}

/// Updates the throttle of the self-hosted worker.
///
/// The worker only throttles rows; a job without a row limit is recorded
/// as applied without calling the worker.
#[derive(Clone)]
pub struct WorkerModifyDataTaskAction {
    control_plane: Arc<dyn ControlPlane>,
}

impl WorkerModifyDataTaskAction {
    /// Creates the action.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }
}

impl std::fmt::Debug for WorkerModifyDataTaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerModifyDataTaskAction")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for WorkerModifyDataTaskAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let target = context.schedule().parameters().rate_limit;
        let Some(rows) = target.row_limit else {
            return record_applied(context, target).await;
        };
        let url = context
            .parameters()
            .control_url
            .clone()
            .ok_or(ActionError::MissingParameter("control_url"))?;

        match self.control_plane.update(&url, rows).await {
            Ok(response) if response.success => record_applied(context, target).await,
            Ok(_) => {
                warn!(task_id = %context.task().id(), "worker refused throttle update, retrying");
                Ok(ActionResult::stay(OscState::ModifyDataTask))
            }
            Err(err) => {
                warn!(task_id = %context.task().id(), error = %err, "throttle update failed, retrying");
                Ok(ActionResult::stay(OscState::ModifyDataTask))
            }
        }
    }
}
