//! Shared world state for schedule failure scenarios.

use ghostswap::schema_change::domain::{ScheduleId, ScheduleParameters, ScheduleTask};
use rstest::fixture;

use crate::test_helpers::OscStack;

/// Scenario world holding the service stack and what it produced.
#[derive(Default)]
pub struct ScheduleWorld {
    pub stack: Option<OscStack>,
    pub parameters: Option<ScheduleParameters>,
    pub tables: Vec<String>,
    pub schedule_id: Option<ScheduleId>,
    pub tasks: Vec<ScheduleTask>,
}

impl ScheduleWorld {
    /// Returns the stack built by a `Given` step.
    pub fn stack(&self) -> Result<&OscStack, eyre::Report> {
        self.stack
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no backend configured in scenario world"))
    }

    /// Returns the submitted schedule.
    pub fn schedule_id(&self) -> Result<ScheduleId, eyre::Report> {
        self.schedule_id
            .ok_or_else(|| eyre::eyre!("no schedule submitted in scenario world"))
    }

    /// Returns the task at `index` as observed when the schedule completed.
    pub fn task(&self, index: usize) -> Result<&ScheduleTask, eyre::Report> {
        self.tasks
            .get(index)
            .ok_or_else(|| eyre::eyre!("no task {index}; schedule has {}", self.tasks.len()))
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> ScheduleWorld {
    ScheduleWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
