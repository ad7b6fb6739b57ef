//! Failure handling across the tables of a schedule.

use ghostswap::schema_change::domain::{ErrorStrategy, OscState, TaskStatus};
use rstest::rstest;

use crate::test_helpers::{DATABASE, OscStack, worker_schedule};

/// Stack whose first table cannot get a ghost table.
fn failing_first_table() -> OscStack {
    let stack = OscStack::new();
    stack.add_table("orders");
    stack.add_table("invoices");
    stack.caught_up_worker();
    stack
        .database
        .fail_statements_containing("CREATE TABLE _orders_osc_new_");
    stack
}

#[rstest]
#[case::abort(ErrorStrategy::Abort, TaskStatus::Preparing)]
#[case::continue_with_next(ErrorStrategy::Continue, TaskStatus::Done)]
#[tokio::test(flavor = "multi_thread")]
async fn failed_table_follows_error_strategy(
    #[case] strategy: ErrorStrategy,
    #[case] expected_second: TaskStatus,
) {
    let stack = failing_first_table();

    let submitted = stack
        .submit(
            worker_schedule().with_error_strategy(strategy),
            &["orders", "invoices"],
        )
        .await;
    let tasks = stack.wait_for_completion(submitted.schedule.id()).await;

    let [first, second] = tasks.as_slice() else {
        panic!("expected two tasks");
    };
    assert_eq!(first.status(), TaskStatus::Failed);
    assert_eq!(first.state(), OscState::Complete);
    assert!(
        first
            .extra_info()
            .is_some_and(|info| !info.is_empty()),
        "failure reason should be recorded"
    );
    assert_eq!(second.status(), expected_second);
    let origin = stack
        .database
        .table(DATABASE, "orders")
        .expect("failed table should be left in place");
    assert_eq!(origin.columns.len(), 2);
    stack.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn continued_schedule_changes_remaining_tables() {
    let stack = failing_first_table();

    let submitted = stack
        .submit(
            worker_schedule().with_error_strategy(ErrorStrategy::Continue),
            &["orders", "invoices"],
        )
        .await;
    stack.wait_for_completion(submitted.schedule.id()).await;

    let invoices = stack
        .database
        .table(DATABASE, "invoices")
        .expect("invoices should exist");
    assert_eq!(invoices.columns.len(), 3);
    assert!(
        stack
            .database
            .table(DATABASE, "_invoices_osc_old_")
            .is_some()
    );
    assert!(stack.database.table(DATABASE, "_orders_osc_new_").is_none());
    assert!(stack.database.table(DATABASE, "_orders_osc_old_").is_none());
    stack.shutdown().await;
}
