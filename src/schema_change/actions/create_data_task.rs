//! Starts replication from the origin table into the ghost table.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WorkerSettings;
use crate::schema_change::{
    domain::{OscState, ScheduleTaskId},
    ports::{
        ConnectionConfig, ControlPlane, DataSourceSpec, MigrationService, PodResource, PodSpec,
        PortMapping, ProjectSpec, ResourceLocation,
    },
};

use super::{Action, ActionContext, ActionError, ActionOutcome, ActionResult};

/// Registers the datasource and a replication project with the managed
/// migration service.
///
/// Each registration is persisted as soon as it succeeds, so a rerun
/// resumes where the previous one stopped.
#[derive(Clone)]
pub struct MigrationServiceCreateDataTaskAction {
    service: Arc<dyn MigrationService>,
    enable_full_verify: bool,
}

impl MigrationServiceCreateDataTaskAction {
    /// Creates the action.
    #[must_use]
    pub fn new(service: Arc<dyn MigrationService>, enable_full_verify: bool) -> Self {
        Self {
            service,
            enable_full_verify,
        }
    }

    async fn ensure_datasource(&self, context: &mut ActionContext) -> Result<String, ActionError> {
        if let Some(existing) = context.parameters().migration_datasource_id.clone() {
            return Ok(existing);
        }
        let spec = DataSourceSpec {
            name: format!("osc_{}", context.task().id()),
            connection: context.connection_config().await?,
        };
        let datasource_id = self.service.create_datasource(&spec).await?;
        context.task_mut().parameters_mut().migration_datasource_id = Some(datasource_id.clone());
        context.persist_parameters().await?;
        Ok(datasource_id)
    }
}

impl std::fmt::Debug for MigrationServiceCreateDataTaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationServiceCreateDataTaskAction")
            .field("enable_full_verify", &self.enable_full_verify)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for MigrationServiceCreateDataTaskAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let datasource_id = self.ensure_datasource(context).await?;

        if context.parameters().migration_project_id.is_none() {
            let parameters = context.parameters();
            let spec = ProjectSpec {
                name: format!(
                    "osc_{}_{}",
                    parameters.database_name, parameters.origin_table_name
                ),
                datasource_id,
                database_name: parameters.database_name.clone(),
                source_table: parameters.origin_table_name.clone(),
                target_table: parameters.new_table_name.clone(),
                columns: parameters.filter_columns.clone(),
                rate_limit: parameters.rate_limit,
                enable_full_verify: self.enable_full_verify,
            };
            let project_id = self.service.create_project(&spec).await?;
            info!(task_id = %context.task().id(), project_id = %project_id, "migration project created");
            context.task_mut().parameters_mut().migration_project_id = Some(project_id);
            context.persist_parameters().await?;
        }

        Ok(ActionResult::transition(
            OscState::CreateDataTask,
            OscState::MonitorDataTask,
        ))
    }
}

/// Provisions a self-hosted worker, locates its control plane, and starts
/// replication on it.
#[derive(Clone)]
pub struct WorkerCreateDataTaskAction {
    control_plane: Arc<dyn ControlPlane>,
    settings: WorkerSettings,
}

impl WorkerCreateDataTaskAction {
    /// Creates the action.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, settings: WorkerSettings) -> Self {
        Self {
            control_plane,
            settings,
        }
    }

    /// Host port reserved for `task_id` when the port mapper is enabled.
    fn mapped_port(&self, task_id: ScheduleTaskId) -> Option<u16> {
        if !self.settings.enable_port_mapper {
            return None;
        }
        let offset = task_id
            .into_inner()
            .as_u128()
            .checked_rem(u128::from(self.settings.mapped_port_range))
            .and_then(|value| u16::try_from(value).ok())?;
        self.settings.mapped_port_base.checked_add(offset)
    }

    async fn provision(&self, context: &mut ActionContext) -> Result<(), ActionError> {
        let task_id = context.task().id();
        let config = context.connection_config().await?;
        let location = ResourceLocation {
            region: config
                .region
                .clone()
                .unwrap_or_else(|| self.settings.default_region.clone()),
            group: self.settings.group.clone(),
        };
        let mapped_port = self.mapped_port(task_id);
        let spec = PodSpec {
            namespace: self.settings.namespace.clone(),
            name: format!("osc-worker-{task_id}"),
            cpu_millis: self.settings.cpu_millis,
            memory_mb: self.settings.memory_mb,
            port_mappings: mapped_port
                .map(|host_port| PortMapping {
                    host_port,
                    container_port: self.settings.listen_port,
                })
                .into_iter()
                .collect(),
        };

        let (resource_id, pod) = context
            .resources()
            .create(
                &location,
                &self.settings.resource_type,
                &self.settings.image,
                &spec,
            )
            .await?;
        let parameters = context.task_mut().parameters_mut();
        parameters.resource_id = Some(resource_id);
        parameters.mapped_port = pod.mapped_port.or(mapped_port);

        if let Err(err) = context.persist_parameters().await {
            if let Err(destroy_err) = context.resources().destroy(resource_id).await {
                warn!(%task_id, %resource_id, error = %destroy_err, "failed to release unrecorded worker");
            }
            return Err(err);
        }
        info!(%task_id, %resource_id, "worker provisioned");
        Ok(())
    }

    /// Finds a control-plane URL that answers: pod address first, then the
    /// host-mapped port.
    async fn resolve_control_url(
        &self,
        context: &ActionContext,
    ) -> Result<Option<String>, ActionError> {
        let resource_id = context
            .parameters()
            .resource_id
            .ok_or(ActionError::MissingParameter("resource_id"))?;
        let pod = context
            .resources()
            .query(resource_id)
            .await?
            .unwrap_or_default();

        for candidate in self.candidate_urls(&pod, context.parameters().mapped_port) {
            if self.control_plane.is_alive(&candidate).await {
                return Ok(Some(candidate));
            }
            debug!(task_id = %context.task().id(), url = %candidate, "worker did not answer heartbeat");
        }
        Ok(None)
    }

    fn candidate_urls(&self, pod: &PodResource, recorded_port: Option<u16>) -> Vec<String> {
        let mut urls = Vec::with_capacity(2);
        if let Some(pod_ip) = &pod.pod_ip {
            urls.push(format!("http://{pod_ip}:{}", self.settings.listen_port));
        }
        let mapped = pod.mapped_port.or(recorded_port).filter(|port| *port > 0);
        if let (Some(host_ip), Some(port)) = (&pod.host_ip, mapped) {
            urls.push(format!("http://{host_ip}:{port}"));
        }
        urls
    }

    fn start_config(context: &ActionContext, config: &ConnectionConfig) -> BTreeMap<String, String> {
        let parameters = context.parameters();
        let column_mapping: BTreeMap<&str, &str> = parameters
            .filter_columns
            .iter()
            .map(|column| (column.as_str(), column.as_str()))
            .collect();

        let mut start = BTreeMap::new();
        start.insert(
            "databaseUrl".to_owned(),
            format!("{}:{}", config.host, config.port),
        );
        start.insert("databaseUser".to_owned(), config.qualified_username());
        start.insert("databasePassword".to_owned(), config.password.clone());
        if let Some(replication) = &config.replication {
            start.insert("crawlerClusterURL".to_owned(), replication.config_url.clone());
            start.insert("crawlerClusterUser".to_owned(), replication.username.clone());
            start.insert(
                "crawlerClusterPassword".to_owned(),
                replication.password.clone(),
            );
            start.insert("crawlerClusterAppName".to_owned(), replication.app_name.clone());
        }
        start.insert("dbname".to_owned(), parameters.database_name.clone());
        if let Some(tenant) = &config.tenant {
            start.insert("tenantName".to_owned(), tenant.clone());
        }
        start.insert(
            "sourceTableName".to_owned(),
            parameters.origin_table_name.clone(),
        );
        start.insert(
            "targetTableName".to_owned(),
            parameters.new_table_name.clone(),
        );
        start.insert(
            "targetToSrcColMapper".to_owned(),
            serde_json::to_string(&column_mapping).unwrap_or_default(),
        );
        if let Some(rows) = parameters.rate_limit.row_limit {
            start.insert("throttleRps".to_owned(), rows.to_string());
        }
        start
    }
}

impl std::fmt::Debug for WorkerCreateDataTaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCreateDataTaskAction")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for WorkerCreateDataTaskAction {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let task_id = context.task().id();
        if context.parameters().resource_id.is_none() {
            self.provision(context).await?;
        }

        let Some(base_url) = self.resolve_control_url(context).await? else {
            info!(%task_id, "worker control plane not reachable yet");
            return Ok(ActionResult::stay(OscState::CreateDataTask));
        };
        if context.parameters().control_url.as_deref() != Some(base_url.as_str()) {
            context.task_mut().parameters_mut().control_url = Some(base_url.clone());
            context.persist_parameters().await?;
        }

        let running = self
            .control_plane
            .monitor(&base_url)
            .await
            .is_ok_and(|counters| counters.shows_replication());
        if running {
            info!(%task_id, url = %base_url, "worker replication already started");
            return Ok(ActionResult::transition(
                OscState::CreateDataTask,
                OscState::MonitorDataTask,
            ));
        }

        let config = context.connection_config().await?;
        let start = Self::start_config(context, &config);
        let response = self.control_plane.start(&base_url, &start).await?;
        if !response.success {
            return Err(ActionError::StartRejected(task_id));
        }
        info!(%task_id, url = %base_url, "worker replication started");
        Ok(ActionResult::transition(
            OscState::CreateDataTask,
            OscState::MonitorDataTask,
        ))
    }
}
