//! Atomically swaps the ghost table in for the origin table.
//!
//! The swap is one rename batch, `origin → archive, ghost → origin`. On
//! engines that support it the origin table is locked first and the rename
//! only runs once replication has applied every change up to a checkpoint
//! taken after the lock. Anything short of a confirmed rename keeps the
//! task in `SwapTable` for the next poll.

use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SwapSettings;
use crate::schema_change::{
    domain::{OscState, TaskParameters, is_swap_table_ready},
    ports::{DbSession, SessionGuard, TableRename},
};

use super::{Action, ActionContext, ActionError, ActionOutcome, ActionResult, StepResultSource};

/// How the rename batch is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Lock the origin table, wait for replication, then rename.
    LockTable,
    /// Rename without locking, for engines that cannot rename locked
    /// tables.
    DirectRename,
}

fn version_parts(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or_default()
        })
        .collect()
}

impl SwapStrategy {
    /// Picks the strategy for an engine reporting `server_version`.
    #[must_use]
    pub fn for_version(server_version: &str, lock_table_min_version: &str) -> Self {
        let mut actual = version_parts(server_version);
        let mut minimum = version_parts(lock_table_min_version);
        let width = actual.len().max(minimum.len());
        actual.resize(width, 0);
        minimum.resize(width, 0);
        if actual >= minimum {
            Self::LockTable
        } else {
            Self::DirectRename
        }
    }
}

/// Where the three tables of a swap stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapProgress {
    Pending,
    AlreadySwapped,
}

/// Kills sessions blocking the origin table until dropped.
struct SessionKiller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionKiller {
    fn spawn(session: SessionGuard, table: String, spared: u64, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        kill_blocking_sessions(&session, &table, spared).await;
                    }
                }
            }
        });
        Self { token, handle }
    }

    async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            warn!(error = %err, "session killer ended abnormally");
        }
    }
}

async fn kill_blocking_sessions(session: &SessionGuard, table: &str, spared: u64) {
    let blocking = match session.list_blocking_sessions(table).await {
        Ok(ids) => ids,
        Err(err) => {
            debug!(error = %err, "failed to list blocking sessions");
            return;
        }
    };
    for id in blocking.into_iter().filter(|id| *id != spared) {
        match session.kill_session(id).await {
            Ok(()) => info!(session_id = id, table, "killed session blocking swap"),
            Err(err) => warn!(session_id = id, error = %err, "failed to kill blocking session"),
        }
    }
}

fn renames(parameters: &TaskParameters) -> [TableRename; 2] {
    [
        TableRename::new(
            parameters.origin_table_name.clone(),
            parameters.renamed_table_name.clone(),
        ),
        TableRename::new(
            parameters.new_table_name.clone(),
            parameters.origin_table_name.clone(),
        ),
    ]
}

/// Swaps tables once replication is ready.
#[derive(Debug, Clone)]
pub struct SwapTableAction<S> {
    source: S,
    settings: SwapSettings,
}

impl<S: StepResultSource> SwapTableAction<S> {
    /// Creates the action.
    #[must_use]
    pub const fn new(source: S, settings: SwapSettings) -> Self {
        Self { source, settings }
    }

    async fn swap_progress(
        context: &ActionContext,
        session: &dyn DbSession,
    ) -> Result<SwapProgress, ActionError> {
        let parameters = context.parameters();
        let origin = session.table_exists(&parameters.origin_table_name).await?;
        let ghost = session.table_exists(&parameters.new_table_name).await?;
        let archive = session.table_exists(&parameters.renamed_table_name).await?;
        match (origin, ghost, archive) {
            (true, true, false) => Ok(SwapProgress::Pending),
            // A finished rename leaves the former ghost under the origin name.
            (true, false, true) => Ok(SwapProgress::AlreadySwapped),
            _ => Err(ActionError::SwapTablesInconsistent {
                task_id: context.task().id(),
                origin,
                ghost,
                archive,
            }),
        }
    }

    async fn is_ready(&self, context: &ActionContext) -> bool {
        let Some(step) = self.source.step_result(context).await else {
            return false;
        };
        self.source.is_migrate_task_ready(&step, context.now())
            && is_swap_table_ready(
                context.task().status(),
                step.full_transfer_progress_percentage,
                step.full_verification_result,
            )
    }

    /// Waits until replication applied every change up to `safe_checkpoint`.
    async fn wait_for_checkpoint(&self, context: &ActionContext, safe_checkpoint: i64) -> bool {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.wait_timeout_secs);
        loop {
            let caught_up = self
                .source
                .step_result(context)
                .await
                .and_then(|step| step.increment_checkpoint)
                .is_some_and(|checkpoint| checkpoint >= safe_checkpoint);
            if caught_up {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(self.settings.check_interval_ms)).await;
        }
    }

    async fn locked_rename(
        &self,
        context: &ActionContext,
        session: &dyn DbSession,
    ) -> Result<bool, ActionError> {
        let parameters = context.parameters();
        session.lock_table(&parameters.origin_table_name).await?;
        let safe_checkpoint = context.now().timestamp();
        let renamed = if self.wait_for_checkpoint(context, safe_checkpoint).await {
            session.rename_tables(&renames(parameters)).await.map(|()| true)
        } else {
            warn!(
                task_id = %context.task().id(),
                safe_checkpoint,
                timeout_secs = self.settings.wait_timeout_secs,
                "replication did not reach safe checkpoint"
            );
            Ok(false)
        };
        let unlocked = session.unlock_tables().await;
        let swapped = renamed?;
        unlocked?;
        Ok(swapped)
    }

    async fn swap(&self, context: &ActionContext, session: &dyn DbSession) -> Result<bool, ActionError> {
        let version = session.server_version().await?;
        match SwapStrategy::for_version(&version, &self.settings.lock_table_min_version) {
            SwapStrategy::LockTable => self.locked_rename(context, session).await,
            SwapStrategy::DirectRename => {
                session.rename_tables(&renames(context.parameters())).await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl<S: StepResultSource> Action for SwapTableAction<S> {
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome {
        let task_id = context.task().id();
        let session = context.open_session().await?;

        if Self::swap_progress(context, &*session).await? == SwapProgress::AlreadySwapped {
            info!(%task_id, "tables already swapped");
            return Ok(ActionResult::transition(
                OscState::SwapTable,
                OscState::CleanResource,
            ));
        }
        if !self.is_ready(context).await {
            info!(%task_id, "replication not ready for swap");
            return Ok(ActionResult::stay(OscState::SwapTable));
        }

        let killer = if context.schedule().parameters().kill_locking_sessions {
            let killer_session = context.open_session().await?;
            Some(SessionKiller::spawn(
                killer_session,
                context.parameters().origin_table_name.clone(),
                session.session_id(),
                Duration::from_millis(self.settings.session_kill_interval_ms),
            ))
        } else {
            None
        };

        let swapped = self.swap(context, &*session).await;
        if let Some(running) = killer {
            running.stop().await;
        }

        match swapped {
            Ok(true) => {
                info!(%task_id, "tables swapped");
                Ok(ActionResult::transition(
                    OscState::SwapTable,
                    OscState::CleanResource,
                ))
            }
            Ok(false) => Ok(ActionResult::stay(OscState::SwapTable)),
            Err(err) => {
                warn!(%task_id, error = %err, "swap attempt failed, retrying");
                Ok(ActionResult::stay(OscState::SwapTable))
            }
        }
    }
}
