//! Normalized replication status and the persisted task result.

use super::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Replication pipeline step reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepName {
    /// Backend has not reported a step yet.
    #[default]
    Unknown,
    /// Pre-flight checks.
    TransferPrecheck,
    /// Change log capture.
    TransferIncrLogPull,
    /// Bulk copy of existing rows.
    FullTransfer,
    /// Streaming of changes made after the bulk copy started.
    IncrTransfer,
    /// Row-by-row comparison of origin and ghost table.
    FullVerifier,
}

impl StepName {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::TransferPrecheck => "TRANSFER_PRECHECK",
            Self::TransferIncrLogPull => "TRANSFER_INCR_LOG_PULL",
            Self::FullTransfer => "FULL_TRANSFER",
            Self::IncrTransfer => "INCR_TRANSFER",
            Self::FullVerifier => "FULL_VERIFIER",
        }
    }
}

/// Outcome of the backend pre-flight checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrecheckResult {
    /// Checks have not started.
    Waiting,
    /// Checks are running.
    Running,
    /// Checks passed.
    Finished,
    /// Checks failed; the task cannot proceed.
    Failed,
}

/// Outcome of comparing origin and ghost table contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FullVerificationResult {
    /// Verification disabled or not finished.
    #[default]
    Uncheck,
    /// Tables match.
    Consistent,
    /// Tables differ; the task cannot proceed.
    Inconsistent,
}

/// Overall status of the backend replication job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationTaskStatus {
    /// Replication is in progress.
    #[default]
    Running,
    /// Every checked step finished.
    Done,
    /// A checked step failed or the job was destroyed.
    Failed,
}

/// Backend-independent snapshot of replication progress.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepResult {
    /// Pre-flight check outcome, if reported.
    pub precheck_result: Option<PrecheckResult>,
    /// Pre-flight check progress in percent.
    pub precheck_progress_percentage: f64,
    /// Error reported by the failing step, if any.
    pub error_message: Option<String>,
    /// Step the backend is currently in.
    pub current_step: StepName,
    /// Backend-specific status of the current step.
    pub current_step_status: Option<String>,
    /// Overall replication status.
    pub task_status: MigrationTaskStatus,
    /// Estimated number of rows to copy.
    pub full_transfer_estimated_count: Option<u64>,
    /// Rows copied so far.
    pub full_transfer_finished_count: Option<u64>,
    /// Bulk copy progress in percent.
    pub full_transfer_progress_percentage: f64,
    /// Verification outcome.
    pub full_verification_result: FullVerificationResult,
    /// Human-readable verification detail.
    pub full_verification_result_description: Option<String>,
    /// Verification progress in percent.
    pub full_verification_progress_percentage: f64,
    /// Weighted overall progress in percent.
    pub task_percentage: f64,
    /// Seconds since the epoch up to which changes have been applied.
    pub increment_checkpoint: Option<i64>,
}

/// Latest externally observed migration status, persisted per task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResult {
    /// Pre-flight check outcome.
    #[serde(default)]
    pub precheck_result: Option<PrecheckResult>,
    /// Error reported by the backend, if any.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Step the backend was last seen in.
    #[serde(default)]
    pub current_step: StepName,
    /// Backend-specific status of that step.
    #[serde(default)]
    pub current_step_status: Option<String>,
    /// Estimated number of rows to copy.
    #[serde(default)]
    pub full_transfer_estimated_count: Option<u64>,
    /// Rows copied so far.
    #[serde(default)]
    pub full_transfer_finished_count: Option<u64>,
    /// Bulk copy progress in percent.
    #[serde(default)]
    pub full_transfer_progress_percentage: f64,
    /// Verification outcome.
    #[serde(default)]
    pub full_verification_result: FullVerificationResult,
    /// Human-readable verification detail.
    #[serde(default)]
    pub full_verification_result_description: Option<String>,
    /// Verification progress in percent.
    #[serde(default)]
    pub full_verification_progress_percentage: f64,
    /// Last observed incremental checkpoint, seconds since the epoch.
    #[serde(default)]
    pub increment_checkpoint: Option<i64>,
    /// Set by the monitor once a manual swap may be triggered.
    #[serde(default)]
    pub manual_swap_table_enabled: bool,
    /// Set by the operator to trigger a manual swap.
    #[serde(default)]
    pub manual_swap_table_started: bool,
    /// First poll in the current run of polls without a backend answer.
    #[serde(default)]
    pub last_check_failed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Overwrites the observed fields with a fresh snapshot.
    ///
    /// Manual swap flags are operator state and survive the overwrite; the
    /// failure timestamp is cleared because the backend answered.
    pub fn absorb(&mut self, step: &StepResult) {
        self.precheck_result = step.precheck_result;
        self.error_message.clone_from(&step.error_message);
        self.current_step = step.current_step;
        self.current_step_status.clone_from(&step.current_step_status);
        self.full_transfer_estimated_count = step.full_transfer_estimated_count;
        self.full_transfer_finished_count = step.full_transfer_finished_count;
        self.full_transfer_progress_percentage = step.full_transfer_progress_percentage;
        self.full_verification_result = step.full_verification_result;
        self.full_verification_result_description
            .clone_from(&step.full_verification_result_description);
        self.full_verification_progress_percentage = step.full_verification_progress_percentage;
        self.increment_checkpoint = step.increment_checkpoint;
        self.last_check_failed_at = None;
    }
}

/// Returns whether replication has progressed far enough to swap.
///
/// The schedule task must not have ended, the bulk copy must be complete,
/// and verification must not have found differences.
#[must_use]
pub fn is_swap_table_ready(
    status: TaskStatus,
    full_transfer_progress_percentage: f64,
    verification: FullVerificationResult,
) -> bool {
    !status.is_terminal()
        && full_transfer_progress_percentage >= 100.0
        && verification != FullVerificationResult::Inconsistent
}

/// Combines step progress into one task percentage.
///
/// Precheck weighs 10%. Transfer weighs 80%, or 40% when full verification
/// is enabled and verification takes the other 40%.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    reason = "progress percentages are reported as floating-point values"
)]
pub fn weighted_task_percentage(
    precheck_percentage: f64,
    transfer_percentage: f64,
    verification_percentage: f64,
    full_verify_enabled: bool,
) -> f64 {
    let precheck = precheck_percentage * 0.1;
    if full_verify_enabled {
        precheck + transfer_percentage * 0.4 + verification_percentage * 0.4
    } else {
        precheck + transfer_percentage * 0.8
    }
}
