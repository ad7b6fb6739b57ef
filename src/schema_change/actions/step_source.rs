//! Normalized replication status per backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::schema_change::{
    domain::{
        FullVerificationResult, MigrationTaskStatus, PrecheckResult, StepName, StepResult,
        weighted_task_percentage,
    },
    ports::{
        ControlPlane, MigrationCounters, MigrationService, ProjectProgress, ProjectStatus,
        ProjectStep, ProjectStepName, ProjectStepStatus,
    },
};

use super::ActionContext;

/// Backend-specific view of replication progress.
#[async_trait]
pub trait StepResultSource: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Reads the current replication status, or `None` when the backend
    /// did not answer.
    async fn step_result(&self, context: &ActionContext) -> Option<StepResult>;

    /// Returns whether replication has caught up enough to swap at `now`.
    fn is_migrate_task_ready(&self, step: &StepResult, now: DateTime<Utc>) -> bool;
}

fn checkpoint_within_lag(checkpoint: Option<i64>, now: DateTime<Utc>, lag_secs: u64) -> bool {
    let lag = i64::try_from(lag_secs).unwrap_or(i64::MAX);
    checkpoint.is_some_and(|seconds| now.timestamp().saturating_sub(seconds) <= lag)
}

/// Status read from a self-hosted worker's `monitor` endpoint.
#[derive(Clone)]
pub struct WorkerStepSource {
    control_plane: Arc<dyn ControlPlane>,
    checkpoint_lag_secs: u64,
}

impl WorkerStepSource {
    /// Creates a source tolerating `checkpoint_lag_secs` of replication lag.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, checkpoint_lag_secs: u64) -> Self {
        Self {
            control_plane,
            checkpoint_lag_secs,
        }
    }

    /// Maps worker counters onto a [`StepResult`].
    ///
    /// Before the bulk copy finishes the worker is in the full-transfer
    /// step; afterwards it streams changes in the incremental step.
    #[must_use]
    pub fn to_step_result(counters: &MigrationCounters) -> StepResult {
        let (current_step, status, transfer_percentage) = if counters.full_migrator_done {
            (
                StepName::IncrTransfer,
                ProjectStepStatus::Monitoring,
                100.0,
            )
        } else {
            (
                StepName::FullTransfer,
                ProjectStepStatus::Running,
                counters.full_migrator_progress,
            )
        };
        StepResult {
            precheck_result: Some(PrecheckResult::Finished),
            precheck_progress_percentage: 100.0,
            error_message: None,
            current_step,
            current_step_status: Some(status.as_str().to_owned()),
            task_status: MigrationTaskStatus::Running,
            full_transfer_estimated_count: counters.table_total_rows,
            full_transfer_finished_count: counters.estimate_migrate_rows,
            full_transfer_progress_percentage: transfer_percentage,
            full_verification_result: FullVerificationResult::Uncheck,
            full_verification_result_description: None,
            full_verification_progress_percentage: 0.0,
            task_percentage: weighted_task_percentage(100.0, transfer_percentage, 0.0, false),
            increment_checkpoint: counters.checkpoint,
        }
    }
}

impl std::fmt::Debug for WorkerStepSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStepSource")
            .field("checkpoint_lag_secs", &self.checkpoint_lag_secs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepResultSource for WorkerStepSource {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn step_result(&self, context: &ActionContext) -> Option<StepResult> {
        let url = context.parameters().control_url.as_deref()?;
        match self.control_plane.monitor(url).await {
            Ok(counters) => Some(Self::to_step_result(&counters)),
            Err(err) => {
                debug!(task_id = %context.task().id(), error = %err, "worker monitor failed");
                None
            }
        }
    }

    fn is_migrate_task_ready(&self, step: &StepResult, now: DateTime<Utc>) -> bool {
        step.current_step == StepName::IncrTransfer
            && checkpoint_within_lag(step.increment_checkpoint, now, self.checkpoint_lag_secs)
    }
}

/// Status assembled from the managed migration service's project steps.
#[derive(Clone)]
pub struct MigrationServiceStepSource {
    service: Arc<dyn MigrationService>,
    enable_full_verify: bool,
    checkpoint_lag_secs: u64,
}

const fn step_name(name: ProjectStepName) -> StepName {
    match name {
        ProjectStepName::TransferPrecheck => StepName::TransferPrecheck,
        ProjectStepName::TransferIncrLogPull => StepName::TransferIncrLogPull,
        ProjectStepName::FullTransfer => StepName::FullTransfer,
        ProjectStepName::IncrTransfer => StepName::IncrTransfer,
        ProjectStepName::FullVerifier => StepName::FullVerifier,
        ProjectStepName::TransferAppSwitch => StepName::Unknown,
    }
}

fn percentage(step: &ProjectStep) -> f64 {
    step.progress.map_or(0.0, f64::from)
}

fn find_step(steps: &[ProjectStep], name: ProjectStepName) -> Option<&ProjectStep> {
    steps.iter().find(|step| step.name == name)
}

impl MigrationServiceStepSource {
    /// Creates a source; `checkpoint_lag_secs` bounds the incremental lag
    /// accepted as caught up.
    #[must_use]
    pub fn new(
        service: Arc<dyn MigrationService>,
        enable_full_verify: bool,
        checkpoint_lag_secs: u64,
    ) -> Self {
        Self {
            service,
            enable_full_verify,
            checkpoint_lag_secs,
        }
    }

    fn checked_steps(&self) -> Vec<ProjectStepName> {
        let mut steps = vec![
            ProjectStepName::TransferIncrLogPull,
            ProjectStepName::FullTransfer,
            ProjectStepName::IncrTransfer,
        ];
        if self.enable_full_verify {
            steps.push(ProjectStepName::FullVerifier);
        }
        steps
    }

    fn is_step_finished(
        &self,
        step: Option<&ProjectStep>,
        progress: &ProjectProgress,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(reported) = step else {
            return true;
        };
        let complete = reported.progress == Some(100);
        match reported.name {
            ProjectStepName::IncrTransfer => {
                reported.status == ProjectStepStatus::Monitoring
                    && complete
                    && checkpoint_within_lag(
                        progress.incr_sync_checkpoint,
                        now,
                        self.checkpoint_lag_secs,
                    )
            }
            ProjectStepName::FullVerifier => {
                self.enable_full_verify && reported.status == ProjectStepStatus::Running && complete
            }
            _ => reported.status == ProjectStepStatus::Finished && complete,
        }
    }

    /// Normalizes a project snapshot observed at `now`.
    ///
    /// A failed precheck short-circuits everything else. Verification is
    /// only filled in once every checked step finished.
    #[must_use]
    pub fn evaluate(
        &self,
        progress: &ProjectProgress,
        steps: &[ProjectStep],
        now: DateTime<Utc>,
    ) -> StepResult {
        let mut result = StepResult {
            current_step: progress.current_step.map_or(StepName::Unknown, step_name),
            current_step_status: progress
                .current_step
                .and_then(|name| find_step(steps, name))
                .map(|step| step.status.as_str().to_owned()),
            ..StepResult::default()
        };

        if let Some(precheck) = find_step(steps, ProjectStepName::TransferPrecheck) {
            result.precheck_progress_percentage = percentage(precheck);
            result.precheck_result = Some(match precheck.status {
                ProjectStepStatus::Failed => PrecheckResult::Failed,
                ProjectStepStatus::Finished => PrecheckResult::Finished,
                ProjectStepStatus::Running | ProjectStepStatus::Monitoring => {
                    PrecheckResult::Running
                }
                ProjectStepStatus::Init | ProjectStepStatus::Suspend => PrecheckResult::Waiting,
            });
            if precheck.status == ProjectStepStatus::Failed {
                result.error_message.clone_from(&precheck.error_message);
                result.task_status = MigrationTaskStatus::Failed;
                return result;
            }
        }

        let checked = self.checked_steps();
        let finished = progress.status == ProjectStatus::Finished
            || checked
                .iter()
                .all(|name| self.is_step_finished(find_step(steps, *name), progress, now));
        let failed_step = checked
            .iter()
            .filter_map(|name| find_step(steps, *name))
            .find(|step| step.status == ProjectStepStatus::Failed);

        result.task_status = if finished {
            MigrationTaskStatus::Done
        } else if failed_step.is_some() || progress.status.is_destroyed() {
            MigrationTaskStatus::Failed
        } else {
            MigrationTaskStatus::Running
        };
        if let Some(step) = failed_step {
            result.error_message.clone_from(&step.error_message);
        }

        if let Some(transfer) = find_step(steps, ProjectStepName::FullTransfer) {
            result.full_transfer_estimated_count = transfer.capacity;
            result.full_transfer_finished_count = transfer.processed_records;
            result.full_transfer_progress_percentage = percentage(transfer);
        }
        if let Some(verifier) = find_step(steps, ProjectStepName::FullVerifier)
            .filter(|_| self.enable_full_verify)
        {
            result.full_verification_progress_percentage = percentage(verifier);
        }

        result.task_percentage = weighted_task_percentage(
            result.precheck_progress_percentage,
            result.full_transfer_progress_percentage,
            result.full_verification_progress_percentage,
            self.enable_full_verify,
        );
        result.increment_checkpoint = progress.incr_sync_checkpoint;
        result
    }
}

impl std::fmt::Debug for MigrationServiceStepSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationServiceStepSource")
            .field("enable_full_verify", &self.enable_full_verify)
            .field("checkpoint_lag_secs", &self.checkpoint_lag_secs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepResultSource for MigrationServiceStepSource {
    fn name(&self) -> &'static str {
        "migration-service"
    }

    async fn step_result(&self, context: &ActionContext) -> Option<StepResult> {
        let task_id = context.task().id();
        let project_id = context.parameters().migration_project_id.as_deref()?;
        let answered = async {
            let progress = self.service.describe_progress(project_id).await?;
            let steps = self.service.describe_steps(project_id).await?;
            Ok::<_, crate::schema_change::ports::MigrationServiceError>((progress, steps))
        }
        .await;
        let (progress, steps) = match answered {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(%task_id, error = %err, "migration service status unavailable");
                return None;
            }
        };

        let mut result = self.evaluate(&progress, &steps, context.now());
        if result.task_status != MigrationTaskStatus::Done {
            return Some(result);
        }
        if !self.enable_full_verify {
            result.full_verification_result = FullVerificationResult::Uncheck;
            result.full_verification_result_description = Some("not verified".to_owned());
            return Some(result);
        }
        match self.service.full_verify_result(project_id).await {
            Ok(Some(outcome)) => {
                result.full_verification_result = if outcome.different_number == Some(0) {
                    FullVerificationResult::Consistent
                } else {
                    FullVerificationResult::Inconsistent
                };
                result.full_verification_result_description = outcome.description;
            }
            Ok(None) => {}
            Err(err) => {
                debug!(%task_id, error = %err, "verification result unavailable");
            }
        }
        Some(result)
    }

    fn is_migrate_task_ready(&self, step: &StepResult, _now: DateTime<Utc>) -> bool {
        step.task_status == MigrationTaskStatus::Done
            && match step.full_verification_result {
                FullVerificationResult::Consistent => true,
                FullVerificationResult::Uncheck => !self.enable_full_verify,
                FullVerificationResult::Inconsistent => false,
            }
    }
}
