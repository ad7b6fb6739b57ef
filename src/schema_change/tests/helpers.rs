//! Shared fixtures for schema-change unit tests.

use chrono::Utc;
use mockable::DefaultClock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{OscSettings, SwapSettings};
use crate::schema_change::{
    actions::{ActionCollaborators, ActionContext},
    adapters::memory::{
        InMemoryControlPlane, InMemoryDatabase, InMemoryMigrationService,
        InMemoryResourceManager, InMemoryScheduleRepository,
    },
    domain::{
        Backend, OscState, PersistedScheduleTaskData, Schedule, ScheduleParameters, ScheduleTask,
        ScheduleTaskId, TableDefinition, TaskParameters, TaskStatus, ghost_table_name,
    },
    ports::{
        ConnectionConfig, ControlPlane, MigrationCounters, PodResource, ScheduleRepository,
    },
    services::{BackendClients, OscStateMachine, StateActions},
};

pub const DATASOURCE: &str = "primary";
pub const DATABASE: &str = "shop";
pub const ORIGIN: &str = "orders";
pub const GHOST: &str = "_orders_osc_new_";
pub const ARCHIVE: &str = "_orders_osc_old_";
pub const WORKER_URL: &str = "http://10.0.0.5:18001";

pub fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| (*column).to_owned()).collect()
}

/// DDL creating the ghost table of `table` with one extra column.
pub fn new_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE {} (id BIGINT PRIMARY KEY, amount INT, note VARCHAR(64))",
        ghost_table_name(table)
    )
}

pub fn origin_definition(table: &str) -> TableDefinition {
    TableDefinition::new(
        table,
        names(&["id", "amount"]),
        names(&["id"]),
        format!("CREATE TABLE {table} (id BIGINT PRIMARY KEY, amount INT)"),
    )
}

pub fn ghost_definition(table: &str) -> TableDefinition {
    TableDefinition::new(
        ghost_table_name(table),
        names(&["id", "amount", "note"]),
        names(&["id"]),
        new_table_ddl(table),
    )
}

pub fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "db.internal".to_owned(),
        port: 2881,
        username: "osc".to_owned(),
        password: "secret".to_owned(),
        tenant: Some("sys".to_owned()),
        cluster: Some("c1".to_owned()),
        region: None,
        replication: None,
    }
}

pub fn fast_settings() -> OscSettings {
    OscSettings {
        poll_interval_ms: 10,
        swap: SwapSettings {
            wait_timeout_secs: 1,
            check_interval_ms: 50,
            session_kill_interval_ms: 10,
            ..SwapSettings::default()
        },
        ..OscSettings::default()
    }
}

pub fn worker_schedule() -> ScheduleParameters {
    ScheduleParameters::new(DATASOURCE, DATABASE, Backend::Worker)
}

pub fn service_schedule() -> ScheduleParameters {
    ScheduleParameters::new(DATASOURCE, DATABASE, Backend::MigrationService)
}

/// Counters of a worker that finished the bulk copy and whose checkpoint
/// lags `lag_secs` behind now.
pub fn caught_up_counters(lag_secs: i64) -> MigrationCounters {
    MigrationCounters {
        checkpoint: Some(Utc::now().timestamp() - lag_secs),
        estimate_migrate_rows: Some(1_000),
        full_migrator_progress: 100.0,
        full_migrator_done: true,
        table_total_rows: Some(1_000),
    }
}

/// In-memory adapters wired together the way production wires real ones.
pub struct Harness {
    pub repository: Arc<InMemoryScheduleRepository>,
    pub database: InMemoryDatabase,
    pub resources: InMemoryResourceManager,
    pub control_plane: InMemoryControlPlane,
    pub migration_service: InMemoryMigrationService,
    pub settings: OscSettings,
}

impl Harness {
    pub fn new() -> Self {
        let database = InMemoryDatabase::new();
        database.register_datasource(DATASOURCE, connection_config());
        let harness = Self {
            repository: Arc::new(InMemoryScheduleRepository::new()),
            database,
            resources: InMemoryResourceManager::new().with_pod_addresses(PodResource {
                pod_ip: Some("10.0.0.5".to_owned()),
                host_ip: Some("192.168.0.9".to_owned()),
                mapped_port: None,
            }),
            control_plane: InMemoryControlPlane::new(),
            migration_service: InMemoryMigrationService::new(),
            settings: fast_settings(),
        };
        harness.add_table(ORIGIN);
        harness
    }

    /// Creates `table` and registers the DDL of its ghost table.
    pub fn add_table(&self, table: &str) {
        self.database.create_table(DATABASE, origin_definition(table));
        self.database
            .register_ddl(new_table_ddl(table), ghost_definition(table));
    }

    pub fn collaborators(&self) -> ActionCollaborators {
        ActionCollaborators::new(
            self.repository.clone(),
            Arc::new(self.database.clone()),
            Arc::new(self.resources.clone()),
            Arc::new(DefaultClock),
        )
    }

    pub fn clients(&self) -> BackendClients {
        BackendClients {
            migration_service: Arc::new(self.migration_service.clone()),
            control_plane: Arc::new(self.control_plane.clone()),
        }
    }

    pub fn machine(&self) -> OscStateMachine {
        self.machine_with(StateActions::standard(&self.clients(), &self.settings))
    }

    pub fn machine_with(&self, actions: StateActions) -> OscStateMachine {
        OscStateMachine::new(self.collaborators(), actions, &self.settings)
    }

    pub async fn store_schedule(&self, parameters: ScheduleParameters) -> Schedule {
        let schedule = Schedule::new(parameters, &DefaultClock);
        self.repository
            .store_schedule(&schedule)
            .await
            .expect("schedule should store");
        schedule
    }

    /// Stores queued tasks for `tables`, in order.
    pub async fn queue_tasks(&self, schedule: &Schedule, tables: &[&str]) -> Vec<ScheduleTask> {
        let mut tasks = Vec::new();
        for (sequence, table) in (0_u32..).zip(tables) {
            let parameters = TaskParameters::new(DATABASE, *table, new_table_ddl(table))
                .with_rate_limit(schedule.parameters().rate_limit);
            let task = ScheduleTask::new(schedule.id(), sequence, parameters, &DefaultClock);
            self.repository
                .store_task(&task)
                .await
                .expect("task should store");
            tasks.push(task);
        }
        tasks
    }

    /// Stores a task of `schedule` already in `state`.
    pub async fn task_in(
        &self,
        schedule: &Schedule,
        state: OscState,
        status: TaskStatus,
        parameters: TaskParameters,
    ) -> ScheduleTask {
        let now = Utc::now();
        let task = ScheduleTask::from_persisted(PersistedScheduleTaskData {
            id: ScheduleTaskId::new(),
            schedule_id: schedule.id(),
            sequence: 0,
            state,
            status,
            parameters,
            result: None,
            progress_percentage: 0.0,
            extra_info: None,
            created_at: now,
            updated_at: now,
        });
        self.repository
            .store_task(&task)
            .await
            .expect("task should store");
        task
    }

    pub async fn reload(&self, id: ScheduleTaskId) -> ScheduleTask {
        self.repository
            .find_task(id)
            .await
            .expect("lookup should succeed")
            .expect("task should exist")
    }

    pub fn context(&self, schedule: &Schedule, task: &ScheduleTask) -> ActionContext {
        ActionContext::new(schedule.clone(), task.clone(), self.collaborators())
    }

    /// Makes the worker answer and start replicating with `counters`.
    pub async fn start_worker(&self, counters: MigrationCounters) {
        self.control_plane.mark_alive(WORKER_URL);
        self.control_plane
            .start(WORKER_URL, &BTreeMap::new())
            .await
            .expect("worker should start");
        self.control_plane.set_counters(WORKER_URL, counters);
    }
}

/// Parameters of a task whose worker answers at [`WORKER_URL`].
pub fn worker_parameters() -> TaskParameters {
    let mut parameters = TaskParameters::new(DATABASE, ORIGIN, new_table_ddl(ORIGIN));
    parameters.control_url = Some(WORKER_URL.to_owned());
    parameters.filter_columns = names(&["id", "amount"]);
    parameters
}
