//! Per-transaction execution leases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::{TransactionId, WorkflowId};
use tokio::sync::OwnedMutexGuard;

type Key = (WorkflowId, TransactionId);
type LockMap = Arc<Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>>;

/// Guarantees at most one tick per `(workflow, transaction)` at a time.
#[derive(Clone, Default)]
pub struct TransactionLeases {
    locks: LockMap,
}

/// Held while a transaction is being driven. Released on drop.
pub struct LeaseGuard {
    key: Key,
    locks: LockMap,
    _guard: OwnedMutexGuard<()>,
}

impl TransactionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease if it is free.
    pub fn try_acquire(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Option<LeaseGuard> {
        let key = (workflow_id.clone(), transaction_id.clone());
        let lock = self.lock_for(&key);
        match lock.try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                // The holder may have released while our clone kept the
                // entry alive, so its drop could not remove it.
                remove_if_unused(&self.locks, &key, 1);
                None
            }
        }
    }

    /// Waits until the lease is free, then takes it.
    pub async fn acquire(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> LeaseGuard {
        let key = (workflow_id.clone(), transaction_id.clone());
        let lock = self.lock_for(&key);
        let guard = lock.lock_owned().await;
        self.guard(key, guard)
    }

    /// Returns true if a lease is currently held or awaited.
    pub fn is_held(&self, workflow_id: &WorkflowId, transaction_id: &TransactionId) -> bool {
        let key = (workflow_id.clone(), transaction_id.clone());
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    fn lock_for(&self, key: &Key) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn guard(&self, key: Key, guard: OwnedMutexGuard<()>) -> LeaseGuard {
        LeaseGuard {
            key,
            locks: self.locks.clone(),
            _guard: guard,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // The map and this guard
        remove_if_unused(&self.locks, &self.key, 2);
    }
}

/// Removes the entry for `key` if at most `owners` references to its mutex
/// exist. References are only cloned under the map lock, so the count
/// cannot grow while it is checked.
fn remove_if_unused(locks: &LockMap, key: &Key, owners: usize) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(lock) = locks.get(key)
        && Arc::strong_count(lock) <= owners
    {
        locks.remove(key);
    }
}
