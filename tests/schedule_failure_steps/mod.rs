//! Step definitions for schedule failure scenarios.

mod given;
mod then;
mod when;
pub mod world;
