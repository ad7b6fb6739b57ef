//! Job-level and task-level parameters carried across polls.

use super::{ResourceId, archive_table_name, ghost_table_name};
use serde::{Deserialize, Serialize};

/// What happens to the rest of a schedule after one task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStrategy {
    /// Keep going with the next queued table.
    Continue,
    /// Stop the whole schedule.
    #[default]
    Abort,
}

/// How the final table swap is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapTableType {
    /// Swap as soon as replication is ready.
    #[default]
    Auto,
    /// Wait for an operator to trigger the swap.
    Manual,
}

/// Replication backend chosen once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Backend {
    /// A managed external data-migration service.
    MigrationService,
    /// A self-hosted worker provisioned per task and driven over HTTP.
    #[default]
    Worker,
}

impl Backend {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MigrationService => "MIGRATION_SERVICE",
            Self::Worker => "WORKER",
        }
    }
}

/// What happens to the original table after a successful swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OriginTableCleanStrategy {
    /// Keep the archived table.
    #[default]
    RenameAndReserve,
    /// Drop the archived table during cleanup.
    Drop,
}

/// Replication throughput limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum rows per second, if limited.
    #[serde(default)]
    pub row_limit: Option<u32>,
    /// Maximum bytes per second, if limited.
    #[serde(default)]
    pub data_size_limit: Option<u64>,
}

impl RateLimitConfig {
    /// Creates a configuration limited to `rows` per second.
    #[must_use]
    pub const fn rows_per_second(rows: u32) -> Self {
        Self {
            row_limit: Some(rows),
            data_size_limit: None,
        }
    }
}

/// Parameters shared by every task of one schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleParameters {
    /// Datasource the tables live in.
    pub datasource: String,
    /// Database (schema) containing the tables.
    pub database_name: String,
    /// Replication backend for every task.
    pub backend: Backend,
    /// Failure policy across sibling tasks.
    pub error_strategy: ErrorStrategy,
    /// Automatic or operator-triggered swap.
    pub swap_table_type: SwapTableType,
    /// Current job-level rate limit; tasks converge to it.
    pub rate_limit: RateLimitConfig,
    /// Fate of the archived origin table.
    pub origin_table_clean_strategy: OriginTableCleanStrategy,
    /// Kill sessions blocking the origin table while swapping.
    pub kill_locking_sessions: bool,
}

impl ScheduleParameters {
    /// Creates parameters with default policies.
    #[must_use]
    pub fn new(
        datasource: impl Into<String>,
        database_name: impl Into<String>,
        backend: Backend,
    ) -> Self {
        Self {
            datasource: datasource.into(),
            database_name: database_name.into(),
            backend,
            error_strategy: ErrorStrategy::default(),
            swap_table_type: SwapTableType::default(),
            rate_limit: RateLimitConfig::default(),
            origin_table_clean_strategy: OriginTableCleanStrategy::default(),
            kill_locking_sessions: false,
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_error_strategy(mut self, error_strategy: ErrorStrategy) -> Self {
        self.error_strategy = error_strategy;
        self
    }

    /// Sets the swap trigger mode.
    #[must_use]
    pub const fn with_swap_table_type(mut self, swap_table_type: SwapTableType) -> Self {
        self.swap_table_type = swap_table_type;
        self
    }

    /// Sets the initial rate limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the archived table policy.
    #[must_use]
    pub const fn with_origin_table_clean_strategy(
        mut self,
        strategy: OriginTableCleanStrategy,
    ) -> Self {
        self.origin_table_clean_strategy = strategy;
        self
    }

    /// Enables killing of sessions that block the swap lock.
    #[must_use]
    pub const fn with_kill_locking_sessions(mut self, enabled: bool) -> Self {
        self.kill_locking_sessions = enabled;
        self
    }
}

/// Current version of the persisted [`TaskParameters`] layout.
pub const TASK_PARAMETERS_VERSION: u32 = 2;

/// Mutable working state of one task, persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParameters {
    /// Layout version of this blob.
    pub version: u32,
    /// Database (schema) containing the tables.
    pub database_name: String,
    /// Table being changed.
    pub origin_table_name: String,
    /// Ghost table receiving the replicated rows.
    pub new_table_name: String,
    /// Name the origin table is archived under after the swap.
    pub renamed_table_name: String,
    /// Origin DDL captured at submission.
    #[serde(default)]
    pub origin_table_ddl: String,
    /// DDL that creates the ghost table.
    pub new_table_ddl: String,
    /// DDL the engine reports for the ghost table after creation.
    #[serde(default)]
    pub ghost_table_ddl: Option<String>,
    /// Extra statements run after the ghost table is created.
    #[serde(default)]
    pub auxiliary_sqls: Vec<String>,
    /// Columns replicated from origin into the ghost table.
    #[serde(default)]
    pub filter_columns: Vec<String>,
    /// Rate limit last applied to the replication backend.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Worker compute resource, once provisioned.
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    /// Host port mapped to the worker listen port, if any.
    #[serde(default)]
    pub mapped_port: Option<u16>,
    /// Resolved worker control-plane base URL.
    #[serde(default)]
    pub control_url: Option<String>,
    /// Datasource registered with the migration service.
    #[serde(default)]
    pub migration_datasource_id: Option<String>,
    /// Project registered with the migration service.
    #[serde(default)]
    pub migration_project_id: Option<String>,
    /// Whether cleanup already released the worker resource.
    #[serde(default)]
    pub resource_released: bool,
}

impl TaskParameters {
    /// Creates parameters for changing `origin_table` to `new_table_ddl`.
    ///
    /// Ghost and archive names are derived from the origin table name.
    #[must_use]
    pub fn new(
        database_name: impl Into<String>,
        origin_table: impl Into<String>,
        new_table_ddl: impl Into<String>,
    ) -> Self {
        let origin_table_name = origin_table.into();
        Self {
            version: TASK_PARAMETERS_VERSION,
            database_name: database_name.into(),
            new_table_name: ghost_table_name(&origin_table_name),
            renamed_table_name: archive_table_name(&origin_table_name),
            origin_table_name,
            origin_table_ddl: String::new(),
            new_table_ddl: new_table_ddl.into(),
            ghost_table_ddl: None,
            auxiliary_sqls: Vec::new(),
            filter_columns: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            resource_id: None,
            mapped_port: None,
            control_url: None,
            migration_datasource_id: None,
            migration_project_id: None,
            resource_released: false,
        }
    }

    /// Records the origin DDL captured at submission.
    #[must_use]
    pub fn with_origin_table_ddl(mut self, ddl: impl Into<String>) -> Self {
        self.origin_table_ddl = ddl.into();
        self
    }

    /// Sets statements to run after the ghost table is created.
    #[must_use]
    pub fn with_auxiliary_sqls(mut self, sqls: impl IntoIterator<Item = String>) -> Self {
        self.auxiliary_sqls = sqls.into_iter().collect();
        self
    }

    /// Sets the initial rate limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}
