//! Port contracts for online schema changes.
//!
//! Ports define infrastructure-agnostic interfaces used by actions and
//! services: persistence, database sessions, compute resources, the worker
//! control plane, and the managed migration service.

pub mod connection;
pub mod control_plane;
pub mod migration_service;
pub mod repository;
pub mod resource;

pub use connection::{
    ConnectionConfig, ConnectionProvider, DbError, DbResult, DbSession, ReplicationEndpoint,
    SessionGuard, TableRename,
};
pub use control_plane::{
    ControlPlane, ControlPlaneError, ControlPlaneResult, MigrationCounters, SupervisorResponse,
};
pub use migration_service::{
    DataSourceSpec, FullVerifyOutcome, MigrationService, MigrationServiceError,
    MigrationServiceResult, ProjectProgress, ProjectSpec, ProjectStatus, ProjectStep,
    ProjectStepName, ProjectStepStatus,
};
pub use repository::{ScheduleRepository, ScheduleRepositoryError, ScheduleRepositoryResult};
pub use resource::{
    PodResource, PodSpec, PortMapping, ResourceError, ResourceLocation, ResourceManager,
    ResourceResult,
};
