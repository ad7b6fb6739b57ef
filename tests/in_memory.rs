//! End-to-end schema-change tests over the in-memory adapters.
//!
//! Tests are organized into modules by functionality:
//! - `lifecycle_tests`: Submission, swaps, rate limits, cancellation
//! - `error_strategy_tests`: Failed tables under `ABORT` and `CONTINUE`

mod test_helpers;

mod in_memory {
    mod error_strategy_tests;
    mod lifecycle_tests;
}
