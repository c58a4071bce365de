//! Durable storage for workflow transaction checkpoints.
//!
//! A checkpoint is the serialized state of one distributed transaction,
//! identified by `(workflow id, transaction id)` and guarded by a monotonically
//! increasing [`Version`]. Saves are atomic read-modify-writes: a save that
//! expects a stale version fails with
//! [`TransactionStoreError::ConcurrencyConflict`] instead of overwriting a
//! concurrent update.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use checkpoint::{TransactionCheckpoint, TransactionCheckpointBuilder, Version};
pub use common::{TransactionId, WorkflowId};
pub use error::{Result, TransactionStoreError};
pub use memory::InMemoryTransactionStore;
pub use postgres::PostgresTransactionStore;
pub use query::TransactionQuery;
pub use store::{SaveOptions, TransactionStore, TransactionStoreExt};
