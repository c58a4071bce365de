//! Workflow registry.

use std::collections::HashMap;
use std::sync::Arc;

use common::WorkflowId;
use tokio::sync::RwLock;

use crate::definition::WorkflowDefinition;
use crate::error::{OrchestratorError, Result};
use crate::handler::StepHandler;

/// Maps workflow ids to their graphs, handler bindings and options.
///
/// An injectable instance; applications that want a process-wide registry
/// hold one in a static at their entry point.
#[derive(Default)]
pub struct WorkflowManager {
    workflows: RwLock<HashMap<WorkflowId, Arc<WorkflowDefinition>>>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow.
    ///
    /// Registering the same id again with a structurally equal graph is a
    /// no-op apart from merging handler bindings; a different graph is
    /// rejected with [`OrchestratorError::AlreadyRegistered`]. Hooks that are
    /// already bound cannot be rebound this way.
    #[tracing::instrument(skip(self, definition), fields(workflow_id = %definition.id))]
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let mut workflows = self.workflows.write().await;

        let merged = match workflows.get(&definition.id) {
            Some(existing) if existing.graph != definition.graph => {
                return Err(OrchestratorError::AlreadyRegistered(definition.id));
            }
            Some(existing) => {
                reject_rebound_hooks(existing, &definition)?;
                let mut merged = WorkflowDefinition::clone(existing);
                merged.handlers.merge(definition.handlers);
                merged
            }
            None => definition,
        };

        merged.handlers.validate_against(&merged.id, &merged.graph)?;

        let merged = Arc::new(merged);
        workflows.insert(merged.id.clone(), merged.clone());
        tracing::info!(steps = merged.graph.len(), "workflow registered");
        Ok(merged)
    }

    /// Replaces the graph and options of a workflow, registering it if new.
    ///
    /// Handler bindings are merged (new ones win, except for hooks that are
    /// already bound) and validators already attached are kept unless the
    /// update supplies its own.
    #[tracing::instrument(skip(self, definition), fields(workflow_id = %definition.id))]
    pub async fn update(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let mut workflows = self.workflows.write().await;

        let updated = match workflows.get(&definition.id) {
            Some(existing) => {
                reject_rebound_hooks(existing, &definition)?;
                let mut handlers = existing.handlers.clone();
                handlers.merge(definition.handlers);
                handlers.retain_steps(&definition.graph);

                let mut options = definition.options;
                if options.input_validator.is_none() {
                    options.input_validator = existing.options.input_validator.clone();
                }
                if options.output_validator.is_none() {
                    options.output_validator = existing.options.output_validator.clone();
                }

                WorkflowDefinition {
                    id: definition.id,
                    graph: definition.graph,
                    handlers,
                    options,
                }
            }
            None => definition,
        };

        updated
            .handlers
            .validate_against(&updated.id, &updated.graph)?;

        let updated = Arc::new(updated);
        workflows.insert(updated.id.clone(), updated.clone());
        tracing::info!(steps = updated.graph.len(), "workflow updated");
        Ok(updated)
    }

    /// Supplies the handler of a hook step.
    pub async fn register_hook<H: StepHandler + 'static>(
        &self,
        workflow_id: &WorkflowId,
        hook: &str,
        handler: H,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let existing = workflows
            .get(workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.clone()))?;

        if !existing.graph.get(hook).is_some_and(|s| s.hook) {
            return Err(OrchestratorError::UnknownHook {
                workflow_id: workflow_id.clone(),
                hook: hook.to_string(),
            });
        }
        if existing.handlers.contains(hook) {
            return Err(OrchestratorError::HookAlreadyBound {
                workflow_id: workflow_id.clone(),
                hook: hook.to_string(),
            });
        }

        let mut updated = WorkflowDefinition::clone(existing);
        updated.handlers.bind(hook, Arc::new(handler));
        workflows.insert(workflow_id.clone(), Arc::new(updated));
        tracing::info!(workflow_id = %workflow_id, hook, "hook bound");
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Looks up a workflow, failing with `WorkflowNotFound`.
    pub async fn require(&self, workflow_id: &WorkflowId) -> Result<Arc<WorkflowDefinition>> {
        self.get_workflow(workflow_id)
            .await
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.clone()))
    }

    /// Removes a workflow. Returns false if it was not registered.
    pub async fn unregister(&self, workflow_id: &WorkflowId) -> bool {
        self.workflows.write().await.remove(workflow_id).is_some()
    }

    /// Removes every workflow.
    pub async fn unregister_all(&self) {
        self.workflows.write().await.clear();
    }

    /// Ids of all registered workflows, sorted.
    pub async fn list(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<_> = self.workflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn reject_rebound_hooks(
    existing: &WorkflowDefinition,
    incoming: &WorkflowDefinition,
) -> Result<()> {
    match existing
        .handlers
        .rebound_hooks(&incoming.handlers, &incoming.graph)
    {
        Some(hook) => Err(OrchestratorError::HookAlreadyBound {
            workflow_id: incoming.id.clone(),
            hook: hook.clone(),
        }),
        None => Ok(()),
    }
}
