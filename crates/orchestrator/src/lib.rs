//! Transaction orchestrator for workflow graphs.
//!
//! A [`WorkflowDefinition`] binds step handlers to a
//! [`WorkflowGraph`](workflow::WorkflowGraph). The [`WorkflowEngine`]
//! registers definitions and runs them as distributed transactions:
//!
//! 1. Ready steps run concurrently, each with its retry policy and timeout
//! 2. Async steps suspend until `set_step_success`/`set_step_failure`
//! 3. A permanent failure rolls back every completed step, children first
//!
//! Each state change is checkpointed in a
//! [`TransactionStore`](transaction_store::TransactionStore), so a run can be
//! resumed after a crash.

pub mod clock;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod handler;
pub mod lease;
pub mod manager;
pub mod orchestrator;
pub mod run;
pub mod schedule;
pub mod scheduler;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ExecutionContext, ServiceResolver};
pub use definition::{Retention, WorkflowDefinition, WorkflowOptions};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use error::{OrchestratorError, Result};
pub use handler::{
    FnStep, HandlerBindings, StepBinding, StepError, StepHandler, StepResponse, StepResult,
    WhenFn, step_fn,
};
pub use lease::{LeaseGuard, TransactionLeases};
pub use manager::WorkflowManager;
pub use orchestrator::TransactionOrchestrator;
pub use run::{RunRequest, RunResult};
pub use schedule::{CronExpression, Schedule, WorkflowSchedule};
pub use scheduler::{FireFn, Scheduler};
pub use validator::{
    FnValidator, PayloadValidator, RequiredFields, ValidationIssue, ValidationStage,
};
