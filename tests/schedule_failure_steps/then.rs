//! Then steps for schedule failure scenarios.

use ghostswap::schema_change::domain::TaskStatus;
use rstest_bdd_macros::then;

use super::world::ScheduleWorld;
use crate::test_helpers::DATABASE;

#[then(r#"task {index:usize} has status "{status}""#)]
fn task_has_status(
    world: &ScheduleWorld,
    index: usize,
    status: String,
) -> Result<(), eyre::Report> {
    let expected = TaskStatus::try_from(status.as_str())
        .map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))?;
    let task = world.task(index)?;
    if task.status() != expected {
        return Err(eyre::eyre!(
            "expected task {index} to be {expected}, found {} ({:?})",
            task.status(),
            task.extra_info()
        ));
    }
    Ok(())
}

#[then(r#"table "{table}" has {count:usize} columns"#)]
fn table_has_columns(
    world: &ScheduleWorld,
    table: String,
    count: usize,
) -> Result<(), eyre::Report> {
    let definition = world
        .stack()?
        .database
        .table(DATABASE, &table)
        .ok_or_else(|| eyre::eyre!("table {table} does not exist"))?;
    if definition.columns.len() != count {
        return Err(eyre::eyre!(
            "expected {count} columns in {table}, found {:?}",
            definition.columns
        ));
    }
    Ok(())
}

#[then("{count:usize} worker was released")]
fn workers_released(world: &ScheduleWorld, count: usize) -> Result<(), eyre::Report> {
    let released = world.stack()?.resources.destroy_calls().len();
    if released != count {
        return Err(eyre::eyre!("expected {count} released workers, found {released}"));
    }
    Ok(())
}
