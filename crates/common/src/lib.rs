//! Shared identifier types for the workflow orchestration engine.

pub mod types;

pub use types::{TransactionId, WorkflowId};
