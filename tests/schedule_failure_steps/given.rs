//! Given steps for schedule failure scenarios.

use rstest_bdd_macros::given;

use super::world::ScheduleWorld;
use crate::test_helpers::{OscStack, WORKER_URL, service_schedule, worker_schedule};

#[given(r#"a "{backend}" backend with tables "{first}" and "{second}""#)]
fn backend_with_tables(
    world: &mut ScheduleWorld,
    backend: String,
    first: String,
    second: String,
) -> Result<(), eyre::Report> {
    let parameters = match backend.as_str() {
        "worker" => worker_schedule(),
        "migration service" => service_schedule(),
        other => return Err(eyre::eyre!("unknown backend in scenario: {other}")),
    };
    let stack = OscStack::new();
    stack.add_table(&first);
    stack.add_table(&second);
    stack.control_plane.mark_alive(WORKER_URL);
    world.stack = Some(stack);
    world.parameters = Some(parameters);
    world.tables = vec![first, second];
    Ok(())
}

#[given("the worker has caught up")]
fn worker_caught_up(world: &mut ScheduleWorld) -> Result<(), eyre::Report> {
    world.stack()?.caught_up_worker();
    Ok(())
}

#[given(r#"creating the ghost table of "{table}" fails"#)]
fn ghost_creation_fails(world: &mut ScheduleWorld, table: String) -> Result<(), eyre::Report> {
    world
        .stack()?
        .database
        .fail_statements_containing(format!("CREATE TABLE _{table}_osc_new_"));
    Ok(())
}
