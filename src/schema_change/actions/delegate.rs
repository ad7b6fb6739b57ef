//! Backend selection for backend-specific actions.

use async_trait::async_trait;
use std::sync::Arc;

use crate::schema_change::domain::Backend;

use super::{Action, ActionContext, ActionOutcome};

/// Routes each call to the variant matching the schedule backend.
#[derive(Clone)]
pub struct ActionDelegate {
    migration_service: Arc<dyn Action>,
    worker: Arc<dyn Action>,
}

impl ActionDelegate {
    /// Creates a delegate over both backend variants.
    #[must_use]
    pub fn new(migration_service: Arc<dyn Action>, worker: Arc<dyn Action>) -> Self {
        Self {
            migration_service,
            worker,
        }
    }

    /// Returns the variant serving `backend`.
    #[must_use]
    pub fn select(&self, backend: Backend) -> &dyn Action {
        match backend {
            Backend::MigrationService => self.migration_service.as_ref(),
            Backend::Worker => self.worker.as_ref(),
        }
    }
}

impl std::fmt::Debug for ActionDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDelegate").finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for ActionDelegate {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let backend = context.schedule().parameters().backend;
        self.select(backend).execute(context).await
    }

    async fn rollback(&self, context: &mut ActionContext) {
        let backend = context.schedule().parameters().backend;
        self.select(backend).rollback(context).await;
    }
}
