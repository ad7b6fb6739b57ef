//! Online schema changes driven as per-table state machines.
//!
//! A submitted schedule becomes one task per table. Each task creates a
//! ghost table in the new shape, replicates the origin rows into it through
//! one of two backends, swaps the tables by renaming once replication has
//! caught up, and releases everything it provisioned. Tasks of a schedule
//! run one after another. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - State-bound actions in [`actions`]
//! - Orchestration services in [`services`]

pub mod actions;
pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
