//! Execution context handed to step handlers.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use common::{TransactionId, WorkflowId};
use serde_json::Value;
use workflow::HandlerType;

/// Typed container for the external services step handlers depend on.
///
/// Cloning is cheap; clones share the same services.
#[derive(Clone, Default)]
pub struct ServiceResolver {
    services: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl ServiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, replacing any previous one of the same type.
    pub fn register<T: Send + Sync + 'static>(&self, service: T) {
        self.register_arc(Arc::new(service));
    }

    pub fn register_arc<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), service);
    }

    /// Resolves a service by type.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for ServiceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .services
            .read()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("ServiceResolver")
            .field("services", &count)
            .finish()
    }
}

/// Read-only view of the run a handler executes in.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub transaction_id: TransactionId,
    pub step_id: String,
    /// 1-based attempt number of the invoke action.
    pub attempt: u32,
    pub handler_type: HandlerType,
    /// Caller-supplied correlation metadata (actor, tenant, ...).
    pub metadata: Arc<BTreeMap<String, Value>>,
    pub services: ServiceResolver,
}

impl ExecutionContext {
    /// Looks up a metadata value.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Resolves a service by type.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services.resolve::<T>()
    }
}
