//! Port of the managed data-migration service backend.

use crate::schema_change::{domain::RateLimitConfig, ports::ConnectionConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type for migration-service calls.
pub type MigrationServiceResult<T> = Result<T, MigrationServiceError>;

/// Datasource registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Display name of the registration.
    pub name: String,
    /// Connection settings of the datasource.
    pub connection: ConnectionConfig,
}

/// Replication project request copying one table into its ghost table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Display name of the project.
    pub name: String,
    /// Registered datasource used as both source and target.
    pub datasource_id: String,
    /// Database containing both tables.
    pub database_name: String,
    /// Table rows are read from.
    pub source_table: String,
    /// Table rows are written to.
    pub target_table: String,
    /// Columns to replicate.
    pub columns: Vec<String>,
    /// Throughput limits.
    pub rate_limit: RateLimitConfig,
    /// Whether a full verification step runs after the transfer.
    pub enable_full_verify: bool,
}

/// Lifecycle status of a replication project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    /// Created, not started.
    Init,
    /// Steps are running.
    Running,
    /// Every step finished.
    Finished,
    /// A step failed.
    Failed,
    /// Paused.
    Suspend,
    /// Resources released.
    Released,
    /// Removed.
    Deleted,
}

impl ProjectStatus {
    /// Returns whether the project no longer exists on the service.
    #[must_use]
    pub const fn is_destroyed(self) -> bool {
        matches!(self, Self::Released | Self::Deleted)
    }
}

/// Step of a replication project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStepName {
    /// Pre-flight checks.
    TransferPrecheck,
    /// Change log capture.
    TransferIncrLogPull,
    /// Bulk copy.
    FullTransfer,
    /// Change streaming.
    IncrTransfer,
    /// Row comparison.
    FullVerifier,
    /// Application switch-over, never used by schema changes.
    TransferAppSwitch,
}

/// Status of one project step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStepStatus {
    /// Not started.
    Init,
    /// Running.
    Running,
    /// Finished.
    Finished,
    /// Failed.
    Failed,
    /// Streaming steadily; used by the incremental step.
    Monitoring,
    /// Paused.
    Suspend,
}

impl ProjectStepStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Monitoring => "MONITORING",
            Self::Suspend => "SUSPEND",
        }
    }
}

/// One step as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStep {
    /// Step name.
    pub name: ProjectStepName,
    /// Step status.
    pub status: ProjectStepStatus,
    /// Progress in whole percent, if reported.
    pub progress: Option<u8>,
    /// Error detail of a failed step.
    pub error_message: Option<String>,
    /// Estimated rows, for the bulk copy step.
    pub capacity: Option<u64>,
    /// Rows processed, for the bulk copy step.
    pub processed_records: Option<u64>,
}

/// Overall progress of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProgress {
    /// Project status.
    pub status: ProjectStatus,
    /// Step currently executing.
    pub current_step: Option<ProjectStepName>,
    /// Incremental checkpoint, seconds since the epoch.
    pub incr_sync_checkpoint: Option<i64>,
}

/// Outcome of a finished full verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullVerifyOutcome {
    /// Number of differing rows, if counted.
    pub different_number: Option<u64>,
    /// Human-readable detail.
    pub description: Option<String>,
}

/// Managed migration service contract.
#[async_trait]
pub trait MigrationService: Send + Sync {
    /// Registers a datasource; returns its service-side identifier.
    async fn create_datasource(&self, spec: &DataSourceSpec) -> MigrationServiceResult<String>;

    /// Creates and starts a replication project; returns its identifier.
    async fn create_project(&self, spec: &ProjectSpec) -> MigrationServiceResult<String>;

    /// Reads overall project progress.
    async fn describe_progress(&self, project_id: &str) -> MigrationServiceResult<ProjectProgress>;

    /// Reads every project step.
    async fn describe_steps(&self, project_id: &str) -> MigrationServiceResult<Vec<ProjectStep>>;

    /// Reads the verification outcome, if verification ran.
    async fn full_verify_result(
        &self,
        project_id: &str,
    ) -> MigrationServiceResult<Option<FullVerifyOutcome>>;

    /// Changes project throughput limits.
    async fn update_rate_limit(
        &self,
        project_id: &str,
        rate_limit: &RateLimitConfig,
    ) -> MigrationServiceResult<()>;

    /// Stops a running project.
    async fn stop_project(&self, project_id: &str) -> MigrationServiceResult<()>;

    /// Releases project resources on the service.
    async fn release_project(&self, project_id: &str) -> MigrationServiceResult<()>;
}

/// Errors returned by migration-service clients.
#[derive(Debug, Clone, Error)]
pub enum MigrationServiceError {
    /// The project does not exist (already released or never created).
    #[error("migration project not found: {0}")]
    ProjectNotFound(String),

    /// The service refused the request.
    #[error("migration service rejected request: {0}")]
    Rejected(String),

    /// Transport or service failure.
    #[error("migration service error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl MigrationServiceError {
    /// Wraps a transport or service error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
