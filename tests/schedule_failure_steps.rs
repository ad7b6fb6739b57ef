//! Behaviour tests for schedules whose tables fail or are cancelled.

mod test_helpers;

#[path = "schedule_failure_steps/mod.rs"]
mod schedule_failure_steps_defs;

use rstest_bdd_macros::scenario;
use schedule_failure_steps_defs::world::{ScheduleWorld, world};

#[scenario(
    path = "tests/features/schedule_failures.feature",
    name = "Abort stops the schedule at the failed table"
)]
#[tokio::test(flavor = "multi_thread")]
async fn abort_stops_at_failed_table(world: ScheduleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/schedule_failures.feature",
    name = "Continue changes the remaining tables"
)]
#[tokio::test(flavor = "multi_thread")]
async fn continue_changes_remaining_tables(world: ScheduleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/schedule_failures.feature",
    name = "Abort on the migration service backend"
)]
#[tokio::test(flavor = "multi_thread")]
async fn abort_on_migration_service(world: ScheduleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/schedule_failures.feature",
    name = "Cancelling a replicating table keeps its origin"
)]
#[tokio::test(flavor = "multi_thread")]
async fn cancelling_keeps_origin(world: ScheduleWorld) {
    let _ = world;
}
