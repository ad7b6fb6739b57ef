//! Adapter implementations for schema-change ports.

pub mod http;
pub mod memory;
