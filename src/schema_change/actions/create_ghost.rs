//! Creates the ghost table and checks it can receive the origin rows.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::schema_change::{
    domain::{OscState, check_column_compatibility},
    ports::DbError,
};

use super::{Action, ActionContext, ActionError, ActionOutcome, ActionResult};

/// Drops any stale ghost table, recreates it from the new DDL, and
/// validates its columns against the origin table.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateGhostTableAction;

impl CreateGhostTableAction {
    /// Creates the action.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Action for CreateGhostTableAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let parameters = context.parameters().clone();
        let session = context.open_session().await?;

        session
            .drop_table_if_exists(&parameters.new_table_name)
            .await?;
        session.execute(&parameters.new_table_ddl).await?;
        for sql in &parameters.auxiliary_sqls {
            session.execute(sql).await?;
        }

        let ghost = session
            .describe_table(&parameters.new_table_name)
            .await?
            .ok_or_else(|| DbError::TableNotFound(parameters.new_table_name.clone()))?;
        let origin = session
            .describe_table(&parameters.origin_table_name)
            .await?
            .ok_or_else(|| DbError::TableNotFound(parameters.origin_table_name.clone()))?;
        drop(session);

        let columns = check_column_compatibility(&origin, &ghost)?;

        let stored = context.task_mut().parameters_mut();
        stored.ghost_table_ddl = Some(ghost.ddl);
        stored.filter_columns = columns;
        if stored.origin_table_ddl.is_empty() {
            stored.origin_table_ddl = origin.ddl;
        }
        context.persist_parameters().await?;

        info!(
            task_id = %context.task().id(),
            ghost_table = %parameters.new_table_name,
            "ghost table created"
        );
        Ok(ActionResult::transition(
            OscState::CreateGhostTables,
            OscState::CreateDataTask,
        ))
    }

    async fn rollback(&self, context: &mut ActionContext) {
        let ghost = context.parameters().new_table_name.clone();
        let dropped = match context.open_session().await {
            Ok(session) => session
                .drop_table_if_exists(&ghost)
                .await
                .map_err(ActionError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = dropped {
            warn!(task_id = %context.task().id(), error = %err, "failed to drop ghost table on cancel");
        }
    }
}
