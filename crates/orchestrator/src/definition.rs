//! Registered workflow definitions.

use std::sync::Arc;
use std::time::Duration;

use common::WorkflowId;
use workflow::{StepInput, WorkflowGraph};

use crate::handler::{HandlerBindings, StepHandler};
use crate::schedule::WorkflowSchedule;
use crate::validator::PayloadValidator;

/// How long a finished transaction stays in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Delete as soon as the run reaches a terminal state.
    #[default]
    Discard,
    /// Keep forever.
    Keep,
    /// Keep for a while, then let `purge_expired` remove it.
    For(Duration),
}

/// Per-workflow options.
#[derive(Clone, Default)]
pub struct WorkflowOptions {
    /// Raise the first step failure (after compensation) instead of
    /// returning it in the run result.
    pub throw_on_error: bool,
    pub retention: Retention,
    /// Step whose output is the run result; all saved outputs otherwise.
    pub result_step: Option<String>,
    pub schedule: Option<WorkflowSchedule>,
    pub input_validator: Option<Arc<dyn PayloadValidator>>,
    pub output_validator: Option<Arc<dyn PayloadValidator>>,
}

impl WorkflowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn result_step(mut self, step_id: impl Into<String>) -> Self {
        self.result_step = Some(step_id.into());
        self
    }

    pub fn schedule(mut self, schedule: WorkflowSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn input_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.input_validator = Some(validator);
        self
    }

    pub fn output_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.output_validator = Some(validator);
        self
    }
}

impl std::fmt::Debug for WorkflowOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOptions")
            .field("throw_on_error", &self.throw_on_error)
            .field("retention", &self.retention)
            .field("result_step", &self.result_step)
            .field("schedule", &self.schedule)
            .field("input_validator", &self.input_validator.is_some())
            .field("output_validator", &self.output_validator.is_some())
            .finish()
    }
}

/// A workflow graph with its handler bindings and options.
#[derive(Clone)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub graph: WorkflowGraph,
    pub handlers: HandlerBindings,
    pub options: WorkflowOptions,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<WorkflowId>, graph: WorkflowGraph) -> Self {
        Self {
            id: id.into(),
            graph,
            handlers: HandlerBindings::new(),
            options: WorkflowOptions::default(),
        }
    }

    /// Binds a handler to a step.
    pub fn step<H: StepHandler + 'static>(mut self, step_id: impl Into<String>, handler: H) -> Self {
        self.handlers.bind(step_id, Arc::new(handler));
        self
    }

    /// Binds the condition of a conditional step.
    pub fn when<F>(mut self, step_id: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        self.handlers.bind_when(step_id, Arc::new(predicate));
        self
    }

    pub fn options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.id)
            .field("graph", &self.graph)
            .field("handlers", &self.handlers.len())
            .field("options", &self.options)
            .finish()
    }
}
