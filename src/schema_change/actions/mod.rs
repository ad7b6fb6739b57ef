//! State-bound actions.
//!
//! Every [`OscState`](crate::schema_change::domain::OscState) except
//! `Complete` is bound to exactly one [`Action`]. Actions are reentrant: the
//! state machine may run the same action many times after crashes or
//! self-loops, so each one re-checks external state before changing it.
//!
//! Backend-specific actions come in a migration-service and a worker
//! variant, routed by an [`ActionDelegate`].

mod clean;
mod context;
mod create_data_task;
mod create_ghost;
mod delegate;
mod error;
mod modify;
mod monitor;
mod result;
mod step_source;
mod swap;
mod yield_context;

use async_trait::async_trait;

pub use clean::{MigrationServiceCleanResourcesAction, WorkerCleanResourcesAction};
pub use context::{ActionCollaborators, ActionContext};
pub use create_data_task::{MigrationServiceCreateDataTaskAction, WorkerCreateDataTaskAction};
pub use create_ghost::CreateGhostTableAction;
pub use delegate::ActionDelegate;
pub use error::{ActionError, ActionOutcome};
pub use modify::{MigrationServiceModifyDataTaskAction, WorkerModifyDataTaskAction};
pub use monitor::MonitorDataTaskAction;
pub use result::{ActionOutput, ActionResult};
pub use step_source::{MigrationServiceStepSource, StepResultSource, WorkerStepSource};
pub use swap::{SwapStrategy, SwapTableAction};
pub use yield_context::YieldContextAction;

/// Unit of work bound to one state.
#[async_trait]
pub trait Action: Send + Sync {
    /// Runs one step and declares the next state.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the task: the state machine fails it and
    /// routes it to cleanup.
    async fn execute(&self, context: &mut ActionContext) -> ActionOutcome;

    /// Best-effort undo run when an operator cancels the task.
    async fn rollback(&self, _context: &mut ActionContext) {}
}
