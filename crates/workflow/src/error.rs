//! Workflow model error types.

use thiserror::Error;

/// Errors raised while building or decoding a workflow graph.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A step was declared with an empty id.
    #[error("Step id must not be empty")]
    EmptyStepId,

    /// A step used the id reserved for the implicit root.
    #[error("Step id '{0}' is reserved")]
    ReservedStepId(String),

    /// Two steps share the same id.
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    /// A step references a parent or child that does not exist.
    #[error("Step '{step}' references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    /// The graph contains a cycle through the listed step.
    #[error("Workflow graph contains a cycle through step '{0}'")]
    Cycle(String),

    /// Builder chaining was used before any step was added.
    #[error("No previous step to attach '{0}' to")]
    NoPreviousStep(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for workflow model results.
pub type Result<T> = std::result::Result<T, WorkflowError>;
