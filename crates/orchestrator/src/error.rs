//! Orchestrator error types.

use common::{TransactionId, WorkflowId};
use thiserror::Error;
use transaction_store::TransactionStoreError;
use workflow::{FlowState, StepFailure, WorkflowError};

use crate::validator::{ValidationIssue, ValidationStage};

/// Errors surfaced by the workflow manager and the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The input or output of a run does not satisfy the workflow contract.
    #[error("Workflow '{workflow_id}' {stage} validation failed: {}", format_issues(.issues))]
    Validation {
        workflow_id: WorkflowId,
        stage: ValidationStage,
        issues: Vec<ValidationIssue>,
    },

    /// A step failed and the caller asked for errors to be raised.
    ///
    /// Raised only after compensation has finished; `state` tells whether
    /// the rollback was clean (`Reverted`) or left side effects (`Failed`).
    #[error("Step '{}' of transaction '{transaction_id}' failed: {} (transaction {state})", .failure.action, .failure.error)]
    StepFailed {
        workflow_id: WorkflowId,
        transaction_id: TransactionId,
        failure: StepFailure,
        state: FlowState,
        compensation_errors: Vec<StepFailure>,
    },

    /// An operation is not allowed in the current state.
    #[error("Invalid state for {subject}: expected {expected}, actual {actual}")]
    InvalidState {
        subject: String,
        expected: String,
        actual: String,
    },

    /// A different graph is already registered under this id.
    #[error("Workflow '{0}' is already registered with a different definition")]
    AlreadyRegistered(WorkflowId),

    /// A hook already has a handler.
    #[error("Hook '{hook}' of workflow '{workflow_id}' is already bound")]
    HookAlreadyBound { workflow_id: WorkflowId, hook: String },

    /// The workflow declares no hook with this name.
    #[error("Workflow '{workflow_id}' has no hook named '{hook}'")]
    UnknownHook { workflow_id: WorkflowId, hook: String },

    /// A step has no bound handler.
    #[error("Step '{step}' of workflow '{workflow_id}' has no handler")]
    MissingHandler { workflow_id: WorkflowId, step: String },

    /// A conditional step has no `when` predicate.
    #[error("Conditional step '{step}' of workflow '{workflow_id}' has no condition")]
    MissingCondition { workflow_id: WorkflowId, step: String },

    /// A handler is bound to a step the graph does not contain.
    #[error("Workflow '{workflow_id}' has no step '{step}' to bind")]
    UnknownStep { workflow_id: WorkflowId, step: String },

    /// Another run of the same transaction is in flight.
    #[error("Transaction '{transaction_id}' of workflow '{workflow_id}' is already running")]
    AlreadyRunning {
        workflow_id: WorkflowId,
        transaction_id: TransactionId,
    },

    /// The workflow is not registered.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// The transaction does not exist in the store.
    #[error("Transaction '{transaction_id}' of workflow '{workflow_id}' not found")]
    TransactionNotFound {
        workflow_id: WorkflowId,
        transaction_id: TransactionId,
    },

    /// A schedule could not be parsed.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Workflow model error.
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Transaction store error.
    #[error("Transaction store error: {0}")]
    Store(#[from] TransactionStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub(crate) fn invalid_state(
        subject: impl Into<String>,
        expected: impl Into<String>,
        actual: impl ToString,
    ) -> Self {
        OrchestratorError::InvalidState {
            subject: subject.into(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
