//! Unit tests for the state graph, task lifecycle, and table checks.

use mockable::DefaultClock;
use rstest::rstest;

use crate::schema_change::domain::{
    Backend, FullVerificationResult, MAX_TABLE_NAME_LENGTH, OscDomainError, OscState, Schedule,
    ScheduleParameters, ScheduleTask, TableDefinition, TaskParameters, TaskStatus, UniqueKey,
    archive_table_name, check_column_compatibility, check_table_eligible,
    check_table_name_length, ghost_table_name, is_swap_table_ready, weighted_task_percentage,
};

use super::helpers::{names, origin_definition};

fn queued_task() -> ScheduleTask {
    let schedule = Schedule::new(
        ScheduleParameters::new("primary", "shop", Backend::Worker),
        &DefaultClock,
    );
    ScheduleTask::new(
        schedule.id(),
        0,
        TaskParameters::new("shop", "orders", "CREATE TABLE x (id INT)"),
        &DefaultClock,
    )
}

#[rstest]
#[case(OscState::YieldContext, OscState::CreateGhostTables, true)]
#[case(OscState::YieldContext, OscState::YieldContext, false)]
#[case(OscState::CreateGhostTables, OscState::CreateDataTask, true)]
#[case(OscState::CreateGhostTables, OscState::SwapTable, false)]
#[case(OscState::CreateDataTask, OscState::CreateDataTask, true)]
#[case(OscState::MonitorDataTask, OscState::ModifyDataTask, true)]
#[case(OscState::MonitorDataTask, OscState::CleanResource, false)]
#[case(OscState::ModifyDataTask, OscState::MonitorDataTask, true)]
#[case(OscState::ModifyDataTask, OscState::SwapTable, false)]
#[case(OscState::SwapTable, OscState::CleanResource, true)]
#[case(OscState::SwapTable, OscState::MonitorDataTask, false)]
#[case(OscState::CleanResource, OscState::YieldContext, true)]
#[case(OscState::CleanResource, OscState::Complete, true)]
#[case(OscState::Complete, OscState::YieldContext, false)]
fn successor_graph(#[case] from: OscState, #[case] to: OscState, #[case] allowed: bool) {
    assert_eq!(from.can_transition_to(to), allowed);
}

#[test]
fn every_live_state_may_complete() {
    for state in OscState::ALL.into_iter().filter(|state| !state.is_terminal()) {
        assert!(state.can_transition_to(OscState::Complete), "{state}");
    }
    assert!(OscState::Complete.successors().is_empty());
}

#[rstest]
#[case("MONITOR_DATA_TASK", OscState::MonitorDataTask)]
#[case(" swap_table ", OscState::SwapTable)]
fn parses_persisted_state_names(#[case] raw: &str, #[case] expected: OscState) {
    assert_eq!(OscState::try_from(raw), Ok(expected));
}

#[test]
fn rejects_unknown_state_and_status() {
    assert!(OscState::try_from("PAUSED").is_err());
    assert!(TaskStatus::try_from("PAUSED").is_err());
    assert_eq!(TaskStatus::try_from("canceled"), Ok(TaskStatus::Canceled));
}

#[test]
fn new_task_is_parked_and_preparing() {
    let task = queued_task();

    assert_eq!(task.state(), OscState::YieldContext);
    assert_eq!(task.status(), TaskStatus::Preparing);
    assert_eq!(task.parameters().new_table_name, "_orders_osc_new_");
    assert_eq!(task.parameters().renamed_table_name, "_orders_osc_old_");
}

#[test]
fn start_moves_parked_task_to_ghost_creation() {
    let mut task = queued_task();

    task.start(&DefaultClock);

    assert_eq!(task.state(), OscState::CreateGhostTables);
    assert_eq!(task.status(), TaskStatus::Running);
}

#[test]
fn start_resumes_other_states_in_place() {
    let mut task = queued_task();
    task.start(&DefaultClock);
    task.transition_state(OscState::CreateDataTask, &DefaultClock)
        .expect("transition should be allowed");
    task.set_status(TaskStatus::Abnormal, &DefaultClock);

    task.start(&DefaultClock);

    assert_eq!(task.state(), OscState::CreateDataTask);
    assert_eq!(task.status(), TaskStatus::Running);
}

#[test]
fn transition_rejects_unregistered_successor() {
    let mut task = queued_task();
    task.start(&DefaultClock);

    let result = task.transition_state(OscState::SwapTable, &DefaultClock);

    assert!(matches!(
        result,
        Err(OscDomainError::InvalidStateTransition {
            from: OscState::CreateGhostTables,
            to: OscState::SwapTable,
            ..
        })
    ));
    assert_eq!(task.state(), OscState::CreateGhostTables);
}

#[rstest]
#[case(TaskStatus::Done)]
#[case(TaskStatus::Failed)]
#[case(TaskStatus::Canceled)]
fn terminal_status_pins_progress(#[case] status: TaskStatus) {
    let mut task = queued_task();
    task.set_progress(37.5);

    task.set_status(status, &DefaultClock);

    assert!((task.progress_percentage() - 100.0).abs() < f64::EPSILON);
}

#[test]
fn cleanup_routing_keeps_cancellation() {
    let mut task = queued_task();
    task.start(&DefaultClock);
    task.set_status(TaskStatus::Canceled, &DefaultClock);

    task.route_to_cleanup(TaskStatus::Failed, &DefaultClock);

    assert_eq!(task.state(), OscState::CleanResource);
    assert_eq!(task.status(), TaskStatus::Canceled);
}

#[test]
fn compatible_tables_replicate_origin_columns() {
    let ghost = TableDefinition::new(
        "_orders_osc_new_",
        names(&["ID", "amount", "note"]),
        names(&["id"]),
        "",
    );

    let columns = check_column_compatibility(&origin_definition("orders"), &ghost)
        .expect("tables should be compatible");

    assert_eq!(columns, names(&["id", "amount"]));
}

#[test]
fn dropped_origin_column_is_unsupported() {
    let ghost = TableDefinition::new("_orders_osc_new_", names(&["id"]), names(&["id"]), "");

    let err = check_column_compatibility(&origin_definition("orders"), &ghost)
        .expect_err("missing column should be rejected");

    assert_eq!(
        err,
        OscDomainError::ColumnNotFound {
            column: "amount".to_owned(),
            table: "_orders_osc_new_".to_owned(),
        }
    );
    assert!(
        err.to_string()
            .starts_with("unsupported: column not found in new table")
    );
}

#[test]
fn primary_key_on_new_column_is_unsupported() {
    let ghost = TableDefinition::new(
        "_orders_osc_new_",
        names(&["id", "amount", "tenant_id"]),
        names(&["id", "tenant_id"]),
        "",
    );

    let err = check_column_compatibility(&origin_definition("orders"), &ghost)
        .expect_err("new primary key column should be rejected");

    assert_eq!(
        err,
        OscDomainError::PrimaryKeyColumnNotInOrigin {
            column: "tenant_id".to_owned()
        }
    );
}

#[rstest]
#[case("orders", "_orders_osc_new_", "_orders_osc_old_")]
#[case("`orders`", "`_orders_osc_new_`", "`_orders_osc_old_`")]
#[case("\"Orders\"", "\"_Orders_osc_new_\"", "\"_Orders_osc_old_\"")]
fn derived_names_keep_quotes(#[case] origin: &str, #[case] ghost: &str, #[case] archive: &str) {
    assert_eq!(ghost_table_name(origin), ghost);
    assert_eq!(archive_table_name(origin), archive);
}

fn keyless(unique_keys: Vec<UniqueKey>) -> TableDefinition {
    unique_keys.into_iter().fold(
        TableDefinition::new("orders", names(&["id", "amount"]), Vec::new(), ""),
        TableDefinition::with_unique_key,
    )
}

#[test]
fn primary_key_table_is_eligible() {
    assert_eq!(check_table_eligible(&origin_definition("orders")), Ok(()));
}

#[test]
fn foreign_key_table_is_unsupported() {
    let table = origin_definition("orders").with_foreign_key("fk_customer");

    assert_eq!(
        check_table_eligible(&table),
        Err(OscDomainError::ForeignKeyTable("orders".to_owned()))
    );
}

#[rstest]
#[case::no_key(keyless(Vec::new()), false)]
#[case::nullable_unique(keyless(vec![UniqueKey::new(names(&["amount"]), true)]), false)]
#[case::not_null_unique(
    keyless(vec![
        UniqueKey::new(names(&["amount"]), true),
        UniqueKey::new(names(&["id"]), false),
    ]),
    true
)]
fn keyless_tables_need_not_null_unique_key(#[case] table: TableDefinition, #[case] eligible: bool) {
    let checked = check_table_eligible(&table);

    if eligible {
        assert_eq!(checked, Ok(()));
    } else {
        assert_eq!(checked, Err(OscDomainError::NoUniqueKey("orders".to_owned())));
    }
}

#[rstest]
#[case(MAX_TABLE_NAME_LENGTH, true)]
#[case(MAX_TABLE_NAME_LENGTH + 1, false)]
fn table_name_length_is_bounded(#[case] length: usize, #[case] accepted: bool) {
    assert_eq!(check_table_name_length(&"t".repeat(length)).is_ok(), accepted);
}

#[rstest]
#[case(TaskStatus::Running, 100.0, FullVerificationResult::Uncheck, true)]
#[case(TaskStatus::Running, 100.0, FullVerificationResult::Consistent, true)]
#[case(TaskStatus::Running, 99.0, FullVerificationResult::Uncheck, false)]
#[case(TaskStatus::Running, 100.0, FullVerificationResult::Inconsistent, false)]
#[case(TaskStatus::Canceled, 100.0, FullVerificationResult::Uncheck, false)]
fn swap_readiness(
    #[case] status: TaskStatus,
    #[case] transfer: f64,
    #[case] verification: FullVerificationResult,
    #[case] expected: bool,
) {
    assert_eq!(is_swap_table_ready(status, transfer, verification), expected);
}

#[rstest]
#[case(100.0, 50.0, 0.0, false, 50.0)]
#[case(100.0, 100.0, 50.0, true, 70.0)]
#[case(0.0, 0.0, 0.0, true, 0.0)]
fn weighted_percentages(
    #[case] precheck: f64,
    #[case] transfer: f64,
    #[case] verification: f64,
    #[case] full_verify: bool,
    #[case] expected: f64,
) {
    let actual = weighted_task_percentage(precheck, transfer, verification, full_verify);

    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}
