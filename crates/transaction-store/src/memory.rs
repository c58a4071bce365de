use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Result, TransactionCheckpoint, TransactionId, TransactionQuery, TransactionStoreError,
    Version, WorkflowId,
    store::{SaveOptions, TransactionStore, validate_checkpoint_for_save},
};

type Key = (WorkflowId, TransactionId);

/// In-memory transaction store.
///
/// Provides the same interface and concurrency semantics as the PostgreSQL
/// implementation; state does not survive the process.
#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    checkpoints: Arc<RwLock<HashMap<Key, TransactionCheckpoint>>>,
}

impl InMemoryTransactionStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored checkpoints.
    pub async fn transaction_count(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// Clears all checkpoints.
    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn load_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionCheckpoint>> {
        let store = self.checkpoints.read().await;
        Ok(store
            .get(&(workflow_id.clone(), transaction_id.clone()))
            .cloned())
    }

    async fn save_transaction(
        &self,
        checkpoint: TransactionCheckpoint,
        options: SaveOptions,
    ) -> Result<Version> {
        validate_checkpoint_for_save(&checkpoint)?;

        let key = (
            checkpoint.workflow_id.clone(),
            checkpoint.transaction_id.clone(),
        );

        let mut store = self.checkpoints.write().await;

        let current_version = store
            .get(&key)
            .map(|c| c.version)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            metrics::counter!("transaction_store_conflicts_total").increment(1);
            return Err(TransactionStoreError::ConcurrencyConflict {
                workflow_id: key.0,
                transaction_id: key.1,
                expected,
                actual: current_version,
            });
        }

        // Versions only move forward
        if checkpoint.version <= current_version {
            metrics::counter!("transaction_store_conflicts_total").increment(1);
            return Err(TransactionStoreError::ConcurrencyConflict {
                workflow_id: key.0,
                transaction_id: key.1,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let version = checkpoint.version;
        store.insert(key, checkpoint);
        Ok(version)
    }

    async fn delete_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let mut store = self.checkpoints.write().await;
        Ok(store
            .remove(&(workflow_id.clone(), transaction_id.clone()))
            .is_some())
    }

    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<Vec<TransactionCheckpoint>> {
        let store = self.checkpoints.read().await;
        let mut checkpoints: Vec<_> = store
            .values()
            .filter(|c| query.matches(c))
            .cloned()
            .collect();

        checkpoints.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then(a.transaction_id.cmp(&b.transaction_id))
        });

        let offset = query.offset.unwrap_or(0);
        let checkpoints: Vec<_> = checkpoints.into_iter().skip(offset).collect();

        let checkpoints = if let Some(limit) = query.limit {
            checkpoints.into_iter().take(limit).collect()
        } else {
            checkpoints
        };

        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionStoreExt;
    use chrono::Utc;

    fn create_checkpoint(transaction_id: &str, version: Version, flow_state: &str) -> TransactionCheckpoint {
        TransactionCheckpoint::builder()
            .workflow_id("create-order")
            .transaction_id(transaction_id)
            .version(version)
            .flow_state(flow_state)
            .state_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn save_and_load_checkpoint() {
        let store = InMemoryTransactionStore::new();
        let checkpoint = create_checkpoint("tx-1", Version::first(), "Invoking");

        let result = store
            .save_transaction(checkpoint.clone(), SaveOptions::expect_new())
            .await;
        assert_eq!(result.unwrap(), Version::first());

        let loaded = store
            .load_transaction(&"create-order".into(), &"tx-1".into())
            .await
            .unwrap();
        assert_eq!(loaded, Some(checkpoint));
    }

    #[tokio::test]
    async fn load_missing_transaction_returns_none() {
        let store = InMemoryTransactionStore::new();
        let loaded = store
            .load_transaction(&"create-order".into(), &"missing".into())
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryTransactionStore::new();
        store
            .save_transaction(
                create_checkpoint("tx-1", Version::first(), "Invoking"),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        // A second writer that also believes the transaction is new
        let result = store
            .save_transaction(
                create_checkpoint("tx-1", Version::first(), "Invoking"),
                SaveOptions::expect_new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(TransactionStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn save_with_correct_expected_version() {
        let store = InMemoryTransactionStore::new();
        store
            .save_transaction(
                create_checkpoint("tx-1", Version::first(), "Invoking"),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        let result = store
            .save_transaction(
                create_checkpoint("tx-1", Version::new(2), "Done"),
                SaveOptions::expect_version(Version::first()),
            )
            .await;
        assert_eq!(result.unwrap(), Version::new(2));

        let loaded = store
            .load_existing(&"create-order".into(), &"tx-1".into())
            .await
            .unwrap();
        assert_eq!(loaded.flow_state, "Done");
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_expected_version() {
        let store = InMemoryTransactionStore::new();
        store
            .save_transaction(
                create_checkpoint("tx-1", Version::new(2), "Invoking"),
                SaveOptions::new(),
            )
            .await
            .unwrap();

        let result = store
            .save_transaction(
                create_checkpoint("tx-1", Version::new(2), "Done"),
                SaveOptions::new(),
            )
            .await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn invalid_checkpoint_is_rejected() {
        let store = InMemoryTransactionStore::new();
        let result = store
            .save_transaction(
                create_checkpoint("tx-1", Version::initial(), "Invoking"),
                SaveOptions::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(TransactionStoreError::InvalidCheckpoint(_))
        ));
    }

    #[tokio::test]
    async fn delete_transaction() {
        let store = InMemoryTransactionStore::new();
        store
            .save_transaction(
                create_checkpoint("tx-1", Version::first(), "Done"),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        assert!(
            store
                .delete_transaction(&"create-order".into(), &"tx-1".into())
                .await
                .unwrap()
        );
        assert!(
            !store
                .delete_transaction(&"create-order".into(), &"tx-1".into())
                .await
                .unwrap()
        );
        assert_eq!(store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn list_transactions_with_filters() {
        let store = InMemoryTransactionStore::new();
        for (id, state) in [("tx-1", "Invoking"), ("tx-2", "Done"), ("tx-3", "Invoking")] {
            store
                .save_transaction(create_checkpoint(id, Version::first(), state), SaveOptions::new())
                .await
                .unwrap();
        }

        let invoking = store
            .list_transactions(TransactionQuery::new().flow_states(["Invoking"]))
            .await
            .unwrap();
        assert_eq!(invoking.len(), 2);

        let limited = store
            .list_transactions(TransactionQuery::for_workflow("create-order").limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn purge_expired_deletes_only_expired_checkpoints() {
        let store = InMemoryTransactionStore::new();
        let now = Utc::now();

        let mut expired = create_checkpoint("tx-1", Version::first(), "Done");
        expired.expires_at = Some(now - chrono::Duration::seconds(10));
        let mut retained = create_checkpoint("tx-2", Version::first(), "Done");
        retained.expires_at = Some(now + chrono::Duration::hours(1));

        store.save_transaction(expired, SaveOptions::new()).await.unwrap();
        store.save_transaction(retained, SaveOptions::new()).await.unwrap();

        let purged = store.purge_expired(now).await.unwrap();
        assert_eq!(purged, 1);
        assert!(
            store
                .transaction_exists(&"create-order".into(), &"tx-2".into())
                .await
                .unwrap()
        );
    }
}
