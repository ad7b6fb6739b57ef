//! Watches replication until the ghost table is ready to swap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::schema_change::domain::{
    FullVerificationResult, MigrationTaskStatus, OscState, PrecheckResult, StepResult,
    SwapTableType, TaskResult, is_swap_table_ready,
};

use super::{Action, ActionContext, ActionError, ActionOutcome, ActionResult, StepResultSource};

/// Polls the replication backend and decides when to swap.
#[derive(Debug, Clone)]
pub struct MonitorDataTaskAction<S> {
    source: S,
    failure_timeout_secs: u64,
}

impl<S: StepResultSource> MonitorDataTaskAction<S> {
    /// Creates the action; the task fails once `source` stays silent for
    /// longer than `failure_timeout_secs`.
    #[must_use]
    pub const fn new(source: S, failure_timeout_secs: u64) -> Self {
        Self {
            source,
            failure_timeout_secs,
        }
    }

    async fn record_silence(&self, context: &mut ActionContext, now: DateTime<Utc>) -> ActionOutcome {
        let task_id = context.task().id();
        let mut result = context.task().result().cloned().unwrap_or_default();
        let first_failure = *result.last_check_failed_at.get_or_insert(now);
        context.task_mut().set_result(result);
        context.persist_result().await?;

        let timeout =
            chrono::Duration::seconds(i64::try_from(self.failure_timeout_secs).unwrap_or(i64::MAX));
        if now.signed_duration_since(first_failure) > timeout {
            return Err(ActionError::MonitorTimeout {
                task_id,
                seconds: self.failure_timeout_secs,
            });
        }
        warn!(%task_id, backend = self.source.name(), since = %first_failure, "no replication status");
        Ok(ActionResult::stay(OscState::MonitorDataTask))
    }

    const fn ready_state(swap_table_type: SwapTableType, result: &mut TaskResult) -> OscState {
        match swap_table_type {
            SwapTableType::Auto => OscState::SwapTable,
            SwapTableType::Manual => {
                result.manual_swap_table_enabled = true;
                if result.manual_swap_table_started {
                    OscState::SwapTable
                } else {
                    OscState::MonitorDataTask
                }
            }
        }
    }
}

fn failure_of(step: &StepResult) -> Option<ActionError> {
    let detail = || step.error_message.clone().unwrap_or_default();
    if step.precheck_result == Some(PrecheckResult::Failed) {
        return Some(ActionError::PrecheckFailed(detail()));
    }
    if step.task_status == MigrationTaskStatus::Failed {
        return Some(ActionError::MigrationFailed(detail()));
    }
    if step.full_verification_result == FullVerificationResult::Inconsistent {
        return Some(ActionError::DataInconsistent(
            step.full_verification_result_description
                .clone()
                .unwrap_or_default(),
        ));
    }
    None
}

#[async_trait]
impl<S: StepResultSource> Action for MonitorDataTaskAction<S> {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let task_id = context.task().id();
        let job_rate_limit = context.schedule().parameters().rate_limit;
        if job_rate_limit != context.parameters().rate_limit {
            info!(%task_id, "rate limit changed, modifying replication");
            return Ok(ActionResult::transition(
                OscState::MonitorDataTask,
                OscState::ModifyDataTask,
            ));
        }

        let now = context.now();
        let Some(step) = self.source.step_result(context).await else {
            return self.record_silence(context, now).await;
        };

        let mut result = context.task().result().cloned().unwrap_or_default();
        result.absorb(&step);
        info!(
            %task_id,
            step = step.current_step.as_str(),
            status = step.current_step_status.as_deref().unwrap_or("UNKNOWN"),
            progress = step.task_percentage,
            description = step
                .full_verification_result_description
                .as_deref()
                .unwrap_or(""),
            "replication progress"
        );

        let ready = self.source.is_migrate_task_ready(&step, now)
            && is_swap_table_ready(
                context.task().status(),
                step.full_transfer_progress_percentage,
                step.full_verification_result,
            );
        let outcome = if ready {
            let swap_table_type = context.schedule().parameters().swap_table_type;
            Ok(Self::ready_state(swap_table_type, &mut result))
        } else {
            failure_of(&step).map_or(Ok(OscState::MonitorDataTask), Err)
        };

        context.task_mut().set_result(result);
        context.task_mut().set_progress(step.task_percentage);
        context.persist_result().await?;

        let next_state = outcome?;
        if next_state == OscState::SwapTable {
            info!(%task_id, "replication caught up, swapping tables");
        }
        Ok(ActionResult::transition(OscState::MonitorDataTask, next_state))
    }

    async fn rollback(&self, context: &mut ActionContext) {
        let Some(mut result) = context.task().result().cloned() else {
            return;
        };
        result.manual_swap_table_enabled = false;
        context.task_mut().set_result(result);
        if let Err(err) = context.persist_result().await {
            warn!(task_id = %context.task().id(), error = %err, "failed to clear manual swap flag");
        }
    }
}
