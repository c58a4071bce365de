//! Run requests and results.

use std::collections::BTreeMap;

use common::{TransactionId, WorkflowId};
use serde_json::Value;
use workflow::{DistributedTransaction, FlowState, StepFailure};

/// A request to start a workflow run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub workflow_id: WorkflowId,
    /// Reusing an id returns the existing transaction instead of running again.
    pub transaction_id: Option<TransactionId>,
    pub input: Value,
    /// Correlation metadata handed to every handler.
    pub context: BTreeMap<String, Value>,
    /// Overrides the workflow's `throw_on_error` option.
    pub throw_on_error: Option<bool>,
}

impl RunRequest {
    pub fn new(workflow_id: impl Into<WorkflowId>, input: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            transaction_id: None,
            input,
            context: BTreeMap::new(),
            throw_on_error: None,
        }
    }

    pub fn transaction_id(mut self, transaction_id: impl Into<TransactionId>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }
}

/// What a run (or a signal that advanced one) produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The output of the result step, or every saved output keyed by step.
    pub result: Value,
    pub errors: Vec<StepFailure>,
    pub transaction: DistributedTransaction,
}

impl RunResult {
    pub fn state(&self) -> FlowState {
        self.transaction.flow_state()
    }

    pub fn transaction_id(&self) -> &TransactionId {
        self.transaction.transaction_id()
    }

    /// Returns true if the run finished and nothing was rolled back.
    pub fn is_done(&self) -> bool {
        self.state() == FlowState::Done
    }

    /// Returns true if the run waits for an async step.
    pub fn is_suspended(&self) -> bool {
        self.state() == FlowState::Invoking && !self.transaction.dormant().is_empty()
    }
}
