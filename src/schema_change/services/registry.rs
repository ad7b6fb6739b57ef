//! Binding of states to actions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::OscSettings;
use crate::schema_change::{
    actions::{
        Action, ActionDelegate, CreateGhostTableAction, MigrationServiceCleanResourcesAction,
        MigrationServiceCreateDataTaskAction, MigrationServiceModifyDataTaskAction,
        MigrationServiceStepSource, MonitorDataTaskAction, SwapTableAction,
        WorkerCleanResourcesAction, WorkerCreateDataTaskAction, WorkerModifyDataTaskAction,
        WorkerStepSource, YieldContextAction,
    },
    domain::OscState,
    ports::{ControlPlane, MigrationService},
};

/// Clients of both replication backends.
#[derive(Clone)]
pub struct BackendClients {
    /// Managed migration service.
    pub migration_service: Arc<dyn MigrationService>,
    /// Worker control plane.
    pub control_plane: Arc<dyn ControlPlane>,
}

impl std::fmt::Debug for BackendClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClients").finish_non_exhaustive()
    }
}

/// One action per non-terminal state.
#[derive(Clone, Default)]
pub struct StateActions {
    actions: HashMap<OscState, Arc<dyn Action>>,
}

impl StateActions {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `action` to `state`, replacing any earlier binding.
    #[must_use]
    pub fn bind(mut self, state: OscState, action: Arc<dyn Action>) -> Self {
        self.actions.insert(state, action);
        self
    }

    /// Returns the action bound to `state`.
    #[must_use]
    pub fn action_for(&self, state: OscState) -> Option<Arc<dyn Action>> {
        self.actions.get(&state).cloned()
    }

    /// Builds the production bindings for both backends.
    #[must_use]
    pub fn standard(clients: &BackendClients, settings: &OscSettings) -> Self {
        let service_source = || {
            MigrationServiceStepSource::new(
                Arc::clone(&clients.migration_service),
                settings.enable_full_verify,
                settings.monitor.service_checkpoint_lag_secs,
            )
        };
        let worker_source = || {
            WorkerStepSource::new(
                Arc::clone(&clients.control_plane),
                settings.monitor.worker_checkpoint_lag_secs,
            )
        };
        let delegate = |service: Arc<dyn Action>, worker: Arc<dyn Action>| -> Arc<dyn Action> {
            Arc::new(ActionDelegate::new(service, worker))
        };
        let failure_timeout = settings.monitor.failure_timeout_secs;

        Self::new()
            .bind(
                OscState::CreateGhostTables,
                Arc::new(CreateGhostTableAction::new()),
            )
            .bind(
                OscState::CreateDataTask,
                delegate(
                    Arc::new(MigrationServiceCreateDataTaskAction::new(
                        Arc::clone(&clients.migration_service),
                        settings.enable_full_verify,
                    )),
                    Arc::new(WorkerCreateDataTaskAction::new(
                        Arc::clone(&clients.control_plane),
                        settings.worker.clone(),
                    )),
                ),
            )
            .bind(
                OscState::MonitorDataTask,
                delegate(
                    Arc::new(MonitorDataTaskAction::new(service_source(), failure_timeout)),
                    Arc::new(MonitorDataTaskAction::new(worker_source(), failure_timeout)),
                ),
            )
            .bind(
                OscState::ModifyDataTask,
                delegate(
                    Arc::new(MigrationServiceModifyDataTaskAction::new(Arc::clone(
                        &clients.migration_service,
                    ))),
                    Arc::new(WorkerModifyDataTaskAction::new(Arc::clone(
                        &clients.control_plane,
                    ))),
                ),
            )
            .bind(
                OscState::SwapTable,
                delegate(
                    Arc::new(SwapTableAction::new(service_source(), settings.swap.clone())),
                    Arc::new(SwapTableAction::new(worker_source(), settings.swap.clone())),
                ),
            )
            .bind(
                OscState::CleanResource,
                delegate(
                    Arc::new(MigrationServiceCleanResourcesAction::new(Arc::clone(
                        &clients.migration_service,
                    ))),
                    Arc::new(WorkerCleanResourcesAction::new(Arc::clone(
                        &clients.control_plane,
                    ))),
                ),
            )
            .bind(OscState::YieldContext, Arc::new(YieldContextAction::new()))
    }
}

impl std::fmt::Debug for StateActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<&str> = self.actions.keys().map(|state| state.as_str()).collect();
        bound.sort_unstable();
        f.debug_struct("StateActions").field("bound", &bound).finish()
    }
}
