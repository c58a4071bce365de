//! Shared application state.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrator::WorkflowEngine;
use transaction_store::{
    InMemoryTransactionStore, PostgresTransactionStore, Result, SaveOptions, TransactionCheckpoint,
    TransactionId, TransactionQuery, TransactionStore, Version, WorkflowId,
};

/// The transaction store selected at startup.
#[derive(Clone)]
pub enum AppStore {
    Memory(InMemoryTransactionStore),
    Postgres(PostgresTransactionStore),
}

impl AppStore {
    pub fn backend(&self) -> &'static str {
        match self {
            AppStore::Memory(_) => "memory",
            AppStore::Postgres(_) => "postgres",
        }
    }
}

#[async_trait]
impl TransactionStore for AppStore {
    async fn load_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionCheckpoint>> {
        match self {
            AppStore::Memory(s) => s.load_transaction(workflow_id, transaction_id).await,
            AppStore::Postgres(s) => s.load_transaction(workflow_id, transaction_id).await,
        }
    }

    async fn save_transaction(
        &self,
        checkpoint: TransactionCheckpoint,
        options: SaveOptions,
    ) -> Result<Version> {
        match self {
            AppStore::Memory(s) => s.save_transaction(checkpoint, options).await,
            AppStore::Postgres(s) => s.save_transaction(checkpoint, options).await,
        }
    }

    async fn delete_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        match self {
            AppStore::Memory(s) => s.delete_transaction(workflow_id, transaction_id).await,
            AppStore::Postgres(s) => s.delete_transaction(workflow_id, transaction_id).await,
        }
    }

    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<Vec<TransactionCheckpoint>> {
        match self {
            AppStore::Memory(s) => s.list_transactions(query).await,
            AppStore::Postgres(s) => s.list_transactions(query).await,
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: Arc<WorkflowEngine<AppStore>>,
    pub store_backend: &'static str,
}
