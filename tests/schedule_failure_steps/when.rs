//! When steps for schedule failure scenarios.

use ghostswap::schema_change::domain::{ErrorStrategy, OscState};
use rstest_bdd_macros::when;

use super::world::{ScheduleWorld, run_async};
use crate::test_helpers::wait_until;

#[when(r#"the tables are submitted with error strategy "{strategy}""#)]
fn submit_tables(world: &mut ScheduleWorld, strategy: String) -> Result<(), eyre::Report> {
    let error_strategy = match strategy.as_str() {
        "ABORT" => ErrorStrategy::Abort,
        "CONTINUE" => ErrorStrategy::Continue,
        other => return Err(eyre::eyre!("unknown error strategy in scenario: {other}")),
    };
    let parameters = world
        .parameters
        .clone()
        .ok_or_else(|| eyre::eyre!("no backend configured in scenario world"))?
        .with_error_strategy(error_strategy);
    let tables: Vec<&str> = world.tables.iter().map(String::as_str).collect();
    let submitted = run_async(world.stack()?.submit(parameters, &tables));
    world.schedule_id = Some(submitted.schedule.id());
    world.tasks = submitted.tasks;
    Ok(())
}

#[when("task {index:usize} is cancelled once it is replicating")]
fn cancel_when_replicating(world: &ScheduleWorld, index: usize) -> Result<(), eyre::Report> {
    let stack = world.stack()?;
    let schedule_id = world.schedule_id()?;
    let task_id = world.task(index)?.id();
    run_async(wait_until(|| async {
        stack.tasks(schedule_id).await.iter().any(|task| {
            task.id() == task_id && task.state() == OscState::MonitorDataTask
        })
    }));
    run_async(stack.service.cancel(task_id))
        .map_err(|err| eyre::eyre!("cancel task {index}: {err}"))?;
    Ok(())
}

#[when("the schedule completes")]
fn schedule_completes(world: &mut ScheduleWorld) -> Result<(), eyre::Report> {
    let schedule_id = world.schedule_id()?;
    let stack = world.stack()?;
    let tasks = run_async(stack.wait_for_completion(schedule_id));
    run_async(stack.shutdown());
    world.tasks = tasks;
    Ok(())
}
