//! End-to-end schedule lifecycles over the public service.

use chrono::Utc;
use ghostswap::schema_change::{
    domain::{
        MAX_TABLE_NAME_LENGTH, OscDomainError, OscState, RateLimitConfig, ScheduleTask,
        SwapTableType, TableDefinition, TaskStatus, UniqueKey, archive_table_name,
        ghost_table_name,
    },
    services::{OscOperationError, SubmitScheduleRequest, TableChange},
};
use rstest::rstest;

use crate::test_helpers::{
    DATABASE, OscStack, WORKER_URL, new_table_ddl, service_schedule, wait_until,
    worker_schedule,
};

fn only(tasks: &[ScheduleTask]) -> &ScheduleTask {
    assert_eq!(tasks.len(), 1, "expected exactly one task");
    tasks.first().expect("one task")
}

async fn wait_for_state(stack: &OscStack, task: &ScheduleTask, state: OscState) {
    let schedule_id = task.schedule_id();
    let task_id = task.id();
    wait_until(|| async {
        stack
            .tasks(schedule_id)
            .await
            .iter()
            .any(|current| current.id() == task_id && current.state() == state)
    })
    .await;
}

fn assert_swapped(stack: &OscStack, table: &str) {
    let swapped = stack
        .database
        .table(DATABASE, table)
        .expect("changed table should exist");
    assert_eq!(swapped.columns.len(), 3, "{table} should carry the new column");
    assert!(stack.database.table(DATABASE, &archive_table_name(table)).is_some());
    assert!(stack.database.table(DATABASE, &ghost_table_name(table)).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_schedule_changes_a_table() {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.caught_up_worker();

    let submitted = stack.submit(worker_schedule(), &["orders"]).await;
    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    let task = only(&tasks);
    assert_eq!(task.state(), OscState::Complete);
    assert_eq!(task.status(), TaskStatus::Done);
    assert!((task.progress_percentage() - 100.0).abs() < f64::EPSILON);
    assert_swapped(&stack, "orders");
    assert_eq!(stack.control_plane.start_calls(), 1);
    assert_eq!(stack.resources.destroy_calls().len(), 1);
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn tables_are_changed_in_submission_order() {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.add_table("invoices");
    stack.caught_up_worker();

    let submitted = stack
        .submit(worker_schedule(), &["orders", "invoices"])
        .await;
    let queued = submitted
        .tasks
        .get(1)
        .expect("second task should be stored");
    assert_eq!(queued.status(), TaskStatus::Preparing);

    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    let sequences: Vec<u32> = tasks.iter().map(ScheduleTask::sequence).collect();
    assert_eq!(sequences, vec![0, 1]);
    assert!(tasks.iter().all(|task| task.status() == TaskStatus::Done));
    let [first, second] = tasks.as_slice() else {
        panic!("expected two tasks");
    };
    assert!(first.updated_at() <= second.updated_at());
    assert_swapped(&stack, "orders");
    assert_swapped(&stack, "invoices");
    assert_eq!(stack.control_plane.start_calls(), 2);
    assert_eq!(stack.resources.destroy_calls().len(), 2);
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_service_schedule_changes_a_table() {
    let stack = OscStack::new();
    stack.add_table("orders");

    let submitted = stack.submit(service_schedule(), &["orders"]).await;
    let task = only(&submitted.tasks).clone();
    wait_for_state(&stack, &task, OscState::MonitorDataTask).await;
    let monitored = stack.tasks(submitted.schedule.id()).await;
    let project_id = only(&monitored)
        .parameters()
        .migration_project_id
        .clone()
        .expect("project should be registered");
    stack
        .migration_service
        .finish_transfer(&project_id, Utc::now().timestamp() + 3_600);

    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    assert_eq!(only(&tasks).status(), TaskStatus::Done);
    assert_swapped(&stack, "orders");
    assert!(stack.migration_service.is_released(&project_id));
    assert_eq!(stack.control_plane.start_calls(), 0);
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_change_reaches_running_worker() {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.control_plane.mark_alive(WORKER_URL);

    let submitted = stack.submit(worker_schedule(), &["orders"]).await;
    let task = only(&submitted.tasks).clone();
    wait_for_state(&stack, &task, OscState::MonitorDataTask).await;
    stack
        .service
        .update_rate_limit(submitted.schedule.id(), RateLimitConfig::rows_per_second(300))
        .await
        .expect("rate limit should update");
    wait_until(|| async {
        stack
            .control_plane
            .update_calls()
            .contains(&(WORKER_URL.to_owned(), 300))
    })
    .await;
    stack.caught_up_worker();

    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    let finished = only(&tasks);
    assert_eq!(finished.status(), TaskStatus::Done);
    assert_eq!(
        finished.parameters().rate_limit,
        RateLimitConfig::rows_per_second(300)
    );
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_task_leaves_origin_untouched() {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.control_plane.mark_alive(WORKER_URL);

    let submitted = stack.submit(worker_schedule(), &["orders"]).await;
    let task = only(&submitted.tasks).clone();
    wait_for_state(&stack, &task, OscState::MonitorDataTask).await;
    stack
        .service
        .cancel(task.id())
        .await
        .expect("running task should cancel");

    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    let cancelled = only(&tasks);
    assert_eq!(cancelled.status(), TaskStatus::Canceled);
    assert_eq!(cancelled.state(), OscState::Complete);
    assert_eq!(stack.database.table_names(DATABASE), vec!["orders".to_owned()]);
    let origin = stack
        .database
        .table(DATABASE, "orders")
        .expect("origin should survive");
    assert_eq!(origin.columns.len(), 2);
    assert_eq!(stack.resources.destroy_calls().len(), 1);
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_swap_waits_for_operator() {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.caught_up_worker();

    let submitted = stack
        .submit(
            worker_schedule().with_swap_table_type(SwapTableType::Manual),
            &["orders"],
        )
        .await;
    let task = only(&submitted.tasks).clone();
    wait_until(|| async {
        stack
            .tasks(submitted.schedule.id())
            .await
            .iter()
            .any(|current| {
                current
                    .result()
                    .is_some_and(|result| result.manual_swap_table_enabled)
            })
    })
    .await;
    let waiting = stack.tasks(submitted.schedule.id()).await;
    assert_eq!(only(&waiting).state(), OscState::MonitorDataTask);
    assert!(stack.database.table(DATABASE, "_orders_osc_old_").is_none());

    stack
        .service
        .trigger_manual_swap(task.id())
        .await
        .expect("swap should be enabled");
    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    assert_eq!(only(&tasks).status(), TaskStatus::Done);
    assert_swapped(&stack, "orders");
    stack.shutdown().await;
}

#[rstest]
#[case::no_tables(Vec::new(), "empty schedule")]
#[case::blank_table(vec![TableChange::new("  ", new_table_ddl("orders"))], "blank table")]
#[case::blank_ddl(vec![TableChange::new("orders", "")], "blank ddl")]
#[tokio::test(flavor = "multi_thread")]
async fn invalid_submissions_are_rejected(
    #[case] tables: Vec<TableChange>,
    #[case] label: &str,
) {
    let stack = OscStack::new();
    stack.add_table("orders");

    let error = stack
        .service
        .submit(SubmitScheduleRequest {
            parameters: worker_schedule(),
            tables,
        })
        .await
        .expect_err(label);

    assert!(
        matches!(
            error,
            OscOperationError::Domain(
                OscDomainError::EmptySchedule
                    | OscDomainError::EmptyTableName
                    | OscDomainError::EmptyNewTableDdl
            )
        ),
        "{label}: unexpected {error:?}"
    );
    assert_eq!(stack.resources.created().len(), 0);
    stack.shutdown().await;
}

fn keyless_orders(unique_keys: Vec<UniqueKey>) -> TableDefinition {
    let mut definition = TableDefinition::new(
        "orders",
        vec!["id".to_owned(), "amount".to_owned()],
        Vec::new(),
        "CREATE TABLE orders (id BIGINT, amount INT)",
    );
    definition.unique_keys = unique_keys;
    definition
}

fn leftover_table(stack: &OscStack, name: String) {
    stack
        .database
        .create_table(DATABASE, TableDefinition::new(name, Vec::new(), Vec::new(), ""));
}

fn missing_origin(_stack: &OscStack) {}

fn leftover_ghost(stack: &OscStack) {
    stack.add_table("orders");
    leftover_table(stack, ghost_table_name("orders"));
}

fn leftover_archive(stack: &OscStack) {
    stack.add_table("orders");
    leftover_table(stack, archive_table_name("orders"));
}

fn foreign_key_origin(stack: &OscStack) {
    stack.add_table("orders");
    let definition = stack
        .database
        .table(DATABASE, "orders")
        .expect("orders was just created")
        .with_foreign_key("fk_orders_customer");
    stack.database.create_table(DATABASE, definition);
}

fn keyless_origin(stack: &OscStack) {
    stack.database.create_table(DATABASE, keyless_orders(Vec::new()));
}

fn nullable_unique_key_origin(stack: &OscStack) {
    stack.database.create_table(
        DATABASE,
        keyless_orders(vec![UniqueKey::new(vec!["id".to_owned()], true)]),
    );
}

#[rstest]
#[case::missing_origin(missing_origin, OscDomainError::OriginTableNotFound("orders".to_owned()))]
#[case::leftover_ghost(
    leftover_ghost,
    OscDomainError::TableAlreadyExists("_orders_osc_new_".to_owned())
)]
#[case::leftover_archive(
    leftover_archive,
    OscDomainError::TableAlreadyExists("_orders_osc_old_".to_owned())
)]
#[case::foreign_key(foreign_key_origin, OscDomainError::ForeignKeyTable("orders".to_owned()))]
#[case::no_key(keyless_origin, OscDomainError::NoUniqueKey("orders".to_owned()))]
#[case::nullable_unique_key(
    nullable_unique_key_origin,
    OscDomainError::NoUniqueKey("orders".to_owned())
)]
#[tokio::test(flavor = "multi_thread")]
async fn ineligible_tables_are_rejected(
    #[case] prepare: fn(&OscStack),
    #[case] expected: OscDomainError,
) {
    let stack = OscStack::new();
    prepare(&stack);

    let error = stack
        .service
        .submit(SubmitScheduleRequest {
            parameters: worker_schedule(),
            tables: vec![TableChange::new("orders", new_table_ddl("orders"))],
        })
        .await
        .expect_err("ineligible table should be rejected");

    let OscOperationError::Domain(found) = error else {
        panic!("expected a validation error, got {error:?}");
    };
    assert_eq!(found, expected);
    assert_eq!(stack.resources.created().len(), 0);
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn overlong_table_name_is_rejected() {
    let stack = OscStack::new();
    let table = "t".repeat(MAX_TABLE_NAME_LENGTH + 1);
    stack.add_table(&table);

    let error = stack
        .service
        .submit(SubmitScheduleRequest {
            parameters: worker_schedule(),
            tables: vec![TableChange::new(table.clone(), new_table_ddl(&table))],
        })
        .await
        .expect_err("overlong name should be rejected");

    assert!(
        matches!(
            &error,
            OscOperationError::Domain(OscDomainError::TableNameTooLong { length, .. })
                if *length == MAX_TABLE_NAME_LENGTH + 1
        ),
        "unexpected {error:?}"
    );
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn not_null_unique_key_is_enough() {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.database.create_table(
        DATABASE,
        keyless_orders(vec![UniqueKey::new(vec!["id".to_owned()], false)]),
    );
    stack.caught_up_worker();

    let submitted = stack.submit(worker_schedule(), &["orders"]).await;

    assert_eq!(submitted.tasks.len(), 1);
    stack.shutdown().await;
}
