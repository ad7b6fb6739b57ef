//! Shared in-memory service stack for integration tests.

use chrono::Utc;
use ghostswap::config::{OscSettings, SwapSettings};
use ghostswap::schema_change::{
    adapters::memory::{
        InMemoryControlPlane, InMemoryDatabase, InMemoryMigrationService,
        InMemoryResourceManager, InMemoryScheduleRepository,
    },
    actions::ActionCollaborators,
    domain::{
        Backend, Schedule, ScheduleId, ScheduleParameters, ScheduleTask, TableDefinition,
        ghost_table_name,
    },
    ports::{ConnectionConfig, MigrationCounters, PodResource, ScheduleRepository},
    services::{
        ActionScheduler, BackendClients, OnlineSchemaChangeService, OscStateMachine,
        StateActions, SubmitScheduleRequest, SubmittedSchedule, TableChange,
    },
};
use mockable::DefaultClock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DATASOURCE: &str = "primary";
pub const DATABASE: &str = "shop";
pub const WORKER_URL: &str = "http://10.0.0.5:18001";

const WAIT_LIMIT: Duration = Duration::from_secs(15);
const WAIT_STEP: Duration = Duration::from_millis(10);

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| (*column).to_owned()).collect()
}

/// DDL creating the ghost table of `table` with an extra `note` column.
pub fn new_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE {} (id BIGINT PRIMARY KEY, amount INT, note VARCHAR(64))",
        ghost_table_name(table)
    )
}

pub fn worker_schedule() -> ScheduleParameters {
    ScheduleParameters::new(DATASOURCE, DATABASE, Backend::Worker)
}

pub fn service_schedule() -> ScheduleParameters {
    ScheduleParameters::new(DATASOURCE, DATABASE, Backend::MigrationService)
}

/// Counters of a worker whose checkpoint is always ahead of the swap lock.
pub fn caught_up_counters() -> MigrationCounters {
    MigrationCounters {
        checkpoint: Some(Utc::now().timestamp() + 3_600),
        estimate_migrate_rows: Some(1_000),
        full_migrator_progress: 100.0,
        full_migrator_done: true,
        table_total_rows: Some(1_000),
    }
}

/// The public service wired to in-memory adapters and a fast poll loop.
pub struct OscStack {
    pub service: OnlineSchemaChangeService,
    pub repository: Arc<InMemoryScheduleRepository>,
    pub database: InMemoryDatabase,
    pub resources: InMemoryResourceManager,
    pub control_plane: InMemoryControlPlane,
    pub migration_service: InMemoryMigrationService,
}

impl OscStack {
    /// Builds the stack; must run inside a Tokio runtime.
    pub fn new() -> Self {
        let settings = OscSettings {
            poll_interval_ms: 10,
            swap: SwapSettings {
                wait_timeout_secs: 1,
                check_interval_ms: 20,
                ..SwapSettings::default()
            },
            ..OscSettings::default()
        };
        let repository = Arc::new(InMemoryScheduleRepository::new());
        let database = InMemoryDatabase::new();
        database.register_datasource(
            DATASOURCE,
            ConnectionConfig {
                host: "db.internal".to_owned(),
                port: 2881,
                username: "osc".to_owned(),
                password: "secret".to_owned(),
                tenant: Some("sys".to_owned()),
                cluster: None,
                region: None,
                replication: None,
            },
        );
        let resources = InMemoryResourceManager::new().with_pod_addresses(PodResource {
            pod_ip: Some("10.0.0.5".to_owned()),
            host_ip: Some("192.168.0.9".to_owned()),
            mapped_port: None,
        });
        let control_plane = InMemoryControlPlane::new();
        let migration_service = InMemoryMigrationService::new();

        let clients = BackendClients {
            migration_service: Arc::new(migration_service.clone()),
            control_plane: Arc::new(control_plane.clone()),
        };
        let collaborators = ActionCollaborators::new(
            repository.clone(),
            Arc::new(database.clone()),
            Arc::new(resources.clone()),
            Arc::new(DefaultClock),
        );
        let machine = Arc::new(OscStateMachine::new(
            collaborators,
            StateActions::standard(&clients, &settings),
            &settings,
        ));
        let scheduler = Arc::new(ActionScheduler::new(
            Arc::clone(&machine),
            settings.poll_interval(),
        ));
        Self {
            service: OnlineSchemaChangeService::new(machine, scheduler),
            repository,
            database,
            resources,
            control_plane,
            migration_service,
        }
    }

    /// Creates `table` with columns `id, amount` and registers its ghost DDL.
    pub fn add_table(&self, table: &str) {
        self.database.create_table(
            DATABASE,
            TableDefinition::new(
                table,
                names(&["id", "amount"]),
                names(&["id"]),
                format!("CREATE TABLE {table} (id BIGINT PRIMARY KEY, amount INT)"),
            ),
        );
        self.database.register_ddl(
            new_table_ddl(table),
            TableDefinition::new(
                ghost_table_name(table),
                names(&["id", "amount", "note"]),
                names(&["id"]),
                new_table_ddl(table),
            ),
        );
    }

    /// Makes every provisioned worker answer and report caught-up counters.
    pub fn caught_up_worker(&self) {
        self.control_plane.mark_alive(WORKER_URL);
        self.control_plane
            .set_counters(WORKER_URL, caught_up_counters());
    }

    pub async fn submit(
        &self,
        parameters: ScheduleParameters,
        tables: &[&str],
    ) -> SubmittedSchedule {
        let request = SubmitScheduleRequest {
            parameters,
            tables: tables
                .iter()
                .map(|table| TableChange::new(*table, new_table_ddl(table)))
                .collect(),
        };
        self.service
            .submit(request)
            .await
            .expect("schedule should be accepted")
    }

    pub async fn schedule(&self, id: ScheduleId) -> Schedule {
        self.repository
            .find_schedule(id)
            .await
            .expect("lookup should succeed")
            .expect("schedule should exist")
    }

    pub async fn tasks(&self, id: ScheduleId) -> Vec<ScheduleTask> {
        self.service.tasks(id).await.expect("tasks should list")
    }

    /// Waits until the schedule is marked completed.
    pub async fn wait_for_completion(&self, id: ScheduleId) -> Vec<ScheduleTask> {
        wait_until(|| async { self.schedule(id).await.is_completed() }).await;
        self.tasks(id).await
    }

    pub async fn shutdown(&self) {
        self.service.scheduler().shutdown().await;
    }
}

/// Polls `condition` until it holds; panics after a generous limit.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(WAIT_LIMIT, async {
        while !condition().await {
            tokio::time::sleep(WAIT_STEP).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within {WAIT_LIMIT:?}");
}
