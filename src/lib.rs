//! Ghostswap: online schema change orchestration.
//!
//! Ghostswap changes the structure of large tables without blocking
//! writers. It copies each table into a ghost table with the new
//! structure, keeps the copy in sync through a replication backend, and
//! swaps the two tables by renaming once the copy has caught up.
//!
//! # Architecture
//!
//! Ghostswap follows hexagonal architecture principles:
//!
//! - **Domain**: Pure orchestration state with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for databases, compute, and
//!   replication backends
//! - **Adapters**: Concrete implementations of ports (in-memory, HTTP)
//!
//! # Modules
//!
//! - [`config`]: Engine settings
//! - [`schema_change`]: Schedules, tasks, actions, and the state machine

pub mod config;
pub mod schema_change;
