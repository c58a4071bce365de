//! Step handler binding layer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use workflow::{StepDefinition, StepInput, WorkflowGraph};

use common::WorkflowId;

use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};

/// Outcome of a successful invoke call.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResponse {
    /// The step finished with an output.
    Completed(Value),
    /// The step started work that completes out of band.
    Suspended,
}

impl StepResponse {
    /// Completes with a serializable output.
    pub fn completed<T: serde::Serialize>(output: &T) -> std::result::Result<Self, StepError> {
        Ok(StepResponse::Completed(serde_json::to_value(output)?))
    }
}

/// Error returned by a step handler.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    /// Retrying cannot help; fail the step immediately.
    pub permanent: bool,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    /// An error that bypasses the step's retry policy.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        StepError::permanent(format!("Serialization error: {err}"))
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError::new(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError::new(message)
    }
}

pub type StepResult = std::result::Result<StepResponse, StepError>;

/// The forward and rollback actions of a step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Performs the step.
    async fn invoke(&self, input: StepInput, ctx: ExecutionContext) -> StepResult;

    /// Undoes the step, given its original input and output.
    async fn compensate(
        &self,
        _input: StepInput,
        _output: Value,
        _ctx: ExecutionContext,
    ) -> std::result::Result<(), StepError> {
        Ok(())
    }
}

type InvokeFn =
    Arc<dyn Fn(StepInput, ExecutionContext) -> BoxFuture<'static, StepResult> + Send + Sync>;

type CompensateResult = std::result::Result<(), StepError>;

type CompensateFn = Arc<
    dyn Fn(StepInput, Value, ExecutionContext) -> BoxFuture<'static, CompensateResult>
        + Send
        + Sync,
>;

/// A step handler built from closures.
#[derive(Clone)]
pub struct FnStep {
    invoke: InvokeFn,
    compensate: Option<CompensateFn>,
}

impl FnStep {
    /// Adds a compensate closure.
    pub fn with_compensation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepInput, Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |input, output, ctx| {
            Box::pin(f(input, output, ctx))
        }));
        self
    }
}

/// Builds a step handler from an invoke closure.
pub fn step_fn<F, Fut>(f: F) -> FnStep
where
    F: Fn(StepInput, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    FnStep {
        invoke: Arc::new(move |input, ctx| Box::pin(f(input, ctx))),
        compensate: None,
    }
}

#[async_trait]
impl StepHandler for FnStep {
    async fn invoke(&self, input: StepInput, ctx: ExecutionContext) -> StepResult {
        (self.invoke)(input, ctx).await
    }

    async fn compensate(
        &self,
        input: StepInput,
        output: Value,
        ctx: ExecutionContext,
    ) -> std::result::Result<(), StepError> {
        match &self.compensate {
            Some(f) => f(input, output, ctx).await,
            None => Ok(()),
        }
    }
}

/// Handler for hooks nobody bound: completes with `null`.
pub(crate) struct NoopStep;

#[async_trait]
impl StepHandler for NoopStep {
    async fn invoke(&self, _input: StepInput, _ctx: ExecutionContext) -> StepResult {
        Ok(StepResponse::Completed(Value::Null))
    }
}

/// Predicate deciding whether a conditional step runs.
pub type WhenFn = Arc<dyn Fn(&StepInput) -> bool + Send + Sync>;

/// The handler and optional condition bound to one step.
#[derive(Clone)]
pub struct StepBinding {
    pub handler: Arc<dyn StepHandler>,
    pub when: Option<WhenFn>,
}

/// Handlers and conditions bound to the steps of a workflow, keyed by step id.
#[derive(Clone, Default)]
pub struct HandlerBindings {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    conditions: HashMap<String, WhenFn>,
}

impl HandlerBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a handler to a step.
    pub fn bind(&mut self, step_id: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_id.into(), handler);
    }

    /// Binds the condition of a conditional step.
    pub fn bind_when(&mut self, step_id: impl Into<String>, when: WhenFn) {
        self.conditions.insert(step_id.into(), when);
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.handlers.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Merges `other` into `self`; bindings from `other` win.
    pub fn merge(&mut self, other: HandlerBindings) {
        self.handlers.extend(other.handlers);
        self.conditions.extend(other.conditions);
    }

    /// Drops bindings for steps the graph no longer contains.
    pub fn retain_steps(&mut self, graph: &WorkflowGraph) {
        self.handlers.retain(|id, _| graph.contains(id));
        self.conditions.retain(|id, _| graph.contains(id));
    }

    /// Checks that every non-hook step has a handler, every conditional
    /// step has a condition and no binding names an unknown step.
    pub fn validate_against(&self, workflow_id: &WorkflowId, graph: &WorkflowGraph) -> Result<()> {
        if let Some(step) = self
            .handlers
            .keys()
            .chain(self.conditions.keys())
            .find(|id| !graph.contains(id))
        {
            return Err(OrchestratorError::UnknownStep {
                workflow_id: workflow_id.clone(),
                step: step.clone(),
            });
        }

        for step in graph.steps() {
            if !step.hook && !self.handlers.contains_key(&step.id) {
                return Err(OrchestratorError::MissingHandler {
                    workflow_id: workflow_id.clone(),
                    step: step.id.clone(),
                });
            }
            if step.conditional && !self.conditions.contains_key(&step.id) {
                return Err(OrchestratorError::MissingCondition {
                    workflow_id: workflow_id.clone(),
                    step: step.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// The binding to run for a step.
    ///
    /// Unbound hooks run as no-ops. Any other unbound step resolves to
    /// `None`; this happens when a workflow update dropped a step that a
    /// stored transaction still references.
    pub fn resolve(&self, step: &StepDefinition) -> Option<StepBinding> {
        let handler = match self.handlers.get(&step.id) {
            Some(handler) => handler.clone(),
            None if step.hook => Arc::new(NoopStep),
            None => return None,
        };
        Some(StepBinding {
            handler,
            when: self.conditions.get(&step.id).cloned(),
        })
    }

    /// Steps of `incoming` that would rebind a hook `self` already binds.
    pub fn rebound_hooks<'a>(
        &self,
        incoming: &'a HandlerBindings,
        graph: &WorkflowGraph,
    ) -> Option<&'a String> {
        incoming.handlers.keys().find(|id| {
            self.handlers.contains_key(*id) && graph.get(id).is_some_and(|s| s.hook)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServiceResolver;
    use std::collections::BTreeMap;
    use workflow::{HandlerType, StepDefinition, WorkflowBuilder};

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            workflow_id: "wf".into(),
            transaction_id: "tx".into(),
            step_id: "a".into(),
            attempt: 1,
            handler_type: HandlerType::Invoke,
            metadata: Arc::new(BTreeMap::new()),
            services: ServiceResolver::new(),
        }
    }

    fn graph() -> WorkflowGraph {
        WorkflowBuilder::new()
            .add_step(StepDefinition::new("a"))
            .then(StepDefinition::new("b").conditional())
            .then(StepDefinition::hook("after_b"))
            .build()
            .unwrap()
    }

    fn ok_step(value: Value) -> Arc<dyn StepHandler> {
        Arc::new(step_fn(move |_, _| {
            let value = value.clone();
            async move { Ok(StepResponse::Completed(value)) }
        }))
    }

    #[tokio::test]
    async fn test_fn_step_invoke_and_default_compensation() {
        let step = step_fn(|input, _| async move {
            Ok(StepResponse::Completed(input.workflow_input))
        });

        let result = step
            .invoke(StepInput::new(serde_json::json!(5)), ctx())
            .await
            .unwrap();
        assert_eq!(result, StepResponse::Completed(serde_json::json!(5)));
        assert!(
            step.compensate(StepInput::default(), Value::Null, ctx())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_fn_step_with_compensation() {
        let step = step_fn(|_, _| async { Ok(StepResponse::Suspended) })
            .with_compensation(|_, output, _| async move {
                if output.is_null() {
                    Err(StepError::new("nothing to undo"))
                } else {
                    Ok(())
                }
            });

        let err = step
            .compensate(StepInput::default(), Value::Null, ctx())
            .await
            .unwrap_err();
        assert_eq!(err.message, "nothing to undo");
    }

    #[test]
    fn test_step_error_constructors() {
        assert!(!StepError::new("x").permanent);
        assert!(StepError::permanent("x").permanent);
        assert_eq!(StepError::from("boom").to_string(), "boom");
    }

    #[test]
    fn test_validate_requires_handlers_and_conditions() {
        let wf: WorkflowId = "wf".into();
        let graph = graph();

        let mut bindings = HandlerBindings::new();
        bindings.bind("a", ok_step(Value::Null));
        assert!(matches!(
            bindings.validate_against(&wf, &graph),
            Err(OrchestratorError::MissingHandler { step, .. }) if step == "b"
        ));

        bindings.bind("b", ok_step(Value::Null));
        assert!(matches!(
            bindings.validate_against(&wf, &graph),
            Err(OrchestratorError::MissingCondition { step, .. }) if step == "b"
        ));

        bindings.bind_when("b", Arc::new(|_| true));
        assert!(bindings.validate_against(&wf, &graph).is_ok());
    }

    #[tokio::test]
    async fn test_unbound_hook_resolves_to_noop() {
        let bindings = HandlerBindings::new();
        let graph = graph();
        let binding = bindings.resolve(graph.get("after_b").unwrap()).unwrap();
        let result = binding
            .handler
            .invoke(StepInput::default(), ctx())
            .await
            .unwrap();
        assert_eq!(result, StepResponse::Completed(Value::Null));
    }

    #[test]
    fn test_unbound_step_does_not_resolve() {
        let bindings = HandlerBindings::new();
        assert!(bindings.resolve(graph().get("a").unwrap()).is_none());
    }

    #[test]
    fn test_rebound_hooks() {
        let graph = graph();
        let mut existing = HandlerBindings::new();
        existing.bind("a", ok_step(Value::Null));
        existing.bind("after_b", ok_step(Value::Null));

        let mut incoming = HandlerBindings::new();
        incoming.bind("a", ok_step(Value::Bool(true)));
        assert!(existing.rebound_hooks(&incoming, &graph).is_none());

        incoming.bind("after_b", ok_step(Value::Bool(true)));
        assert_eq!(
            existing.rebound_hooks(&incoming, &graph).map(String::as_str),
            Some("after_b")
        );
    }

    #[test]
    fn test_validate_rejects_unknown_binding() {
        let mut bindings = HandlerBindings::new();
        bindings.bind("zzz", ok_step(Value::Null));
        assert!(matches!(
            bindings.validate_against(&"wf".into(), &graph()),
            Err(OrchestratorError::UnknownStep { .. })
        ));
    }

    #[test]
    fn test_merge_prefers_new_handlers_and_keeps_conditions() {
        let mut existing = HandlerBindings::new();
        existing.bind("a", ok_step(Value::Null));
        existing.bind("b", ok_step(Value::Null));
        existing.bind_when("b", Arc::new(|_| false));

        let mut update = HandlerBindings::new();
        update.bind("b", ok_step(Value::Bool(true)));

        existing.merge(update);
        assert_eq!(existing.len(), 2);
        let graph = graph();
        assert!(existing.resolve(graph.get("b").unwrap()).unwrap().when.is_some());
        assert!(existing.resolve(graph.get("a").unwrap()).unwrap().when.is_none());
    }
}
