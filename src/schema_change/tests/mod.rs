//! Unit tests for the schema-change module.

mod domain_tests;
mod helpers;
mod versioning_tests;
