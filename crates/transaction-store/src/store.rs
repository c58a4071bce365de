use async_trait::async_trait;

use crate::{
    Result, TransactionCheckpoint, TransactionId, TransactionQuery, TransactionStoreError,
    Version, WorkflowId,
};

/// Options for saving a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Expected currently-stored version for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl SaveOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stored checkpoint to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting no checkpoint to exist yet (new transaction).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Persistence contract for distributed transaction state.
///
/// All implementations must be thread-safe (Send + Sync). The concrete
/// storage technology is an external collaborator of the orchestrator.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Loads the latest checkpoint of a transaction.
    ///
    /// Returns None if the transaction was never saved or has been deleted.
    async fn load_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionCheckpoint>>;

    /// Saves a checkpoint atomically.
    ///
    /// The checkpoint's `version` must be greater than the stored version.
    /// If `options.expected_version` is set, the operation fails with
    /// `ConcurrencyConflict` if the stored version doesn't match.
    ///
    /// Returns the version now stored.
    async fn save_transaction(
        &self,
        checkpoint: TransactionCheckpoint,
        options: SaveOptions,
    ) -> Result<Version>;

    /// Deletes a transaction's checkpoint.
    ///
    /// Returns true if a checkpoint existed.
    async fn delete_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<bool>;

    /// Lists checkpoints matching a query, oldest update first.
    async fn list_transactions(&self, query: TransactionQuery)
    -> Result<Vec<TransactionCheckpoint>>;
}

/// Extension trait providing convenience methods for transaction stores.
#[async_trait]
pub trait TransactionStoreExt: TransactionStore {
    /// Checks if a checkpoint exists for the transaction.
    async fn transaction_exists(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        Ok(self
            .load_transaction(workflow_id, transaction_id)
            .await?
            .is_some())
    }

    /// Loads a checkpoint, failing with `TransactionNotFound` if it doesn't exist.
    async fn load_existing(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<TransactionCheckpoint> {
        self.load_transaction(workflow_id, transaction_id)
            .await?
            .ok_or_else(|| TransactionStoreError::TransactionNotFound {
                workflow_id: workflow_id.clone(),
                transaction_id: transaction_id.clone(),
            })
    }

    /// Deletes every checkpoint whose retention expired at or before `now`.
    ///
    /// Returns the number of deleted checkpoints.
    async fn purge_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let expired = self
            .list_transactions(TransactionQuery::new().expired_before(now))
            .await?;
        let mut purged = 0;
        for checkpoint in expired {
            if self
                .delete_transaction(&checkpoint.workflow_id, &checkpoint.transaction_id)
                .await?
            {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

// Blanket implementation for all TransactionStore implementations
impl<T: TransactionStore + ?Sized> TransactionStoreExt for T {}

/// Validates a checkpoint before saving.
pub fn validate_checkpoint_for_save(
    checkpoint: &TransactionCheckpoint,
) -> std::result::Result<(), TransactionStoreError> {
    if checkpoint.workflow_id.as_str().is_empty() {
        return Err(TransactionStoreError::InvalidCheckpoint(
            "workflow_id must not be empty".to_string(),
        ));
    }
    if checkpoint.transaction_id.as_str().is_empty() {
        return Err(TransactionStoreError::InvalidCheckpoint(
            "transaction_id must not be empty".to_string(),
        ));
    }
    if checkpoint.version <= Version::initial() {
        return Err(TransactionStoreError::InvalidCheckpoint(format!(
            "checkpoint version must be at least {}, got {}",
            Version::first(),
            checkpoint.version
        )));
    }
    if checkpoint.flow_state.is_empty() {
        return Err(TransactionStoreError::InvalidCheckpoint(
            "flow_state must not be empty".to_string(),
        ));
    }
    Ok(())
}
