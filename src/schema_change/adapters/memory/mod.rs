//! In-memory adapters for every schema-change port.

mod control_plane;
mod database;
mod migration_service;
mod repository;
mod resource;

pub use control_plane::InMemoryControlPlane;
pub use database::InMemoryDatabase;
pub use migration_service::InMemoryMigrationService;
pub use repository::InMemoryScheduleRepository;
pub use resource::InMemoryResourceManager;
