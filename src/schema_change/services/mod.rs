//! Orchestration services: the per-task state machine, the poll scheduler
//! driving it, and the operator-facing operations.

mod operations;
mod registry;
mod scheduler;
mod state_machine;

pub use operations::{
    OnlineSchemaChangeService, OscOperationError, OscOperationResult, SubmitScheduleRequest,
    SubmittedSchedule, TableChange,
};
pub use registry::{BackendClients, StateActions};
pub use scheduler::ActionScheduler;
pub use state_machine::{OscStateMachine, PollOutcome, StateMachineError, StateMachineResult};
