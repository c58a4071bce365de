use thiserror::Error;

use crate::{TransactionId, Version, WorkflowId};

/// Errors that can occur when interacting with the transaction store.
#[derive(Debug, Error)]
pub enum TransactionStoreError {
    /// The expected version did not match the stored version.
    #[error(
        "Concurrency conflict for transaction {workflow_id}/{transaction_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        workflow_id: WorkflowId,
        transaction_id: TransactionId,
        expected: Version,
        actual: Version,
    },

    /// No checkpoint exists for the transaction.
    #[error("Transaction not found: {workflow_id}/{transaction_id}")]
    TransactionNotFound {
        workflow_id: WorkflowId,
        transaction_id: TransactionId,
    },

    /// The checkpoint failed validation before being written.
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransactionStoreError {
    /// Returns true if this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransactionStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for transaction store operations.
pub type Result<T> = std::result::Result<T, TransactionStoreError>;
