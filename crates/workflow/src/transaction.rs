//! The distributed transaction aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{TransactionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use transaction_store::{TransactionCheckpoint, Version};

use crate::builder::WorkflowGraph;
use crate::events::TransactionEvent;
use crate::payload::{PayloadContext, StepInput};
use crate::state::FlowState;
use crate::step::{HandlerType, StepErrorRecord, StepState, TransactionStep};

/// A step error surfaced to the caller of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    /// The step id.
    pub action: String,
    pub handler_type: HandlerType,
    pub error: String,
}

/// The runtime record of one workflow run.
///
/// Holds a snapshot of the graph the run started with, the state of every
/// step and the payload context. State changes only through [`apply`];
/// the orchestrator decides which events to apply.
///
/// [`apply`]: DistributedTransaction::apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedTransaction {
    transaction_id: TransactionId,
    workflow_id: WorkflowId,
    version: Version,
    graph: WorkflowGraph,
    flow_state: FlowState,
    steps: BTreeMap<String, TransactionStep>,
    payload: PayloadContext,
    input: Value,
    metadata: BTreeMap<String, Value>,
    errors: Vec<StepFailure>,
    /// A step failed permanently in a way that requires compensation.
    has_failed_steps: bool,
    cancelled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DistributedTransaction {
    /// Creates an empty, not yet started transaction.
    pub fn new(workflow_id: WorkflowId, transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            workflow_id,
            version: Version::initial(),
            graph: WorkflowGraph::empty(),
            flow_state: FlowState::NotStarted,
            steps: BTreeMap::new(),
            payload: PayloadContext::new(),
            input: Value::Null,
            metadata: BTreeMap::new(),
            errors: Vec::new(),
            has_failed_steps: false,
            cancelled: false,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }

    /// Applies an event. Events naming unknown steps are ignored.
    pub fn apply(&mut self, event: TransactionEvent) {
        self.updated_at = event.at();

        match event {
            TransactionEvent::TransactionStarted(data) => {
                self.steps = data
                    .graph
                    .topological_order()
                    .iter()
                    .map(|id| (id.clone(), TransactionStep::new(id.clone())))
                    .collect();
                self.graph = data.graph;
                self.input = data.input;
                self.metadata = data.metadata;
                self.flow_state = FlowState::Invoking;
                self.created_at = data.at;
            }
            TransactionEvent::StepInvoked(data) => {
                let timeout = self.graph.get(&data.step_id).and_then(|d| d.timeout());
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.invoke = StepState::Invoking;
                    step.attempts += 1;
                    step.started_at.get_or_insert(data.at);
                    step.last_attempt_at = Some(data.at);
                    step.retry_at = None;
                    step.deadline = timeout
                        .and_then(|t| chrono::Duration::from_std(t).ok())
                        .map(|t| data.at + t);
                    self.payload.set_invoke_input(&data.step_id, data.input);
                }
            }
            TransactionEvent::StepCompleted(data) => {
                let save = self
                    .graph
                    .get(&data.step_id)
                    .is_some_and(|d| d.save_response);
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.invoke = StepState::Done;
                    step.invoked_once = true;
                    step.completed_at = Some(data.at);
                    step.deadline = None;
                    step.retry_at = None;
                    step.output = Some(data.output.clone());
                    if save {
                        self.payload.set_invoke_output(&data.step_id, data.output);
                    }
                }
            }
            TransactionEvent::StepSuspended(data) => {
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.invoke = StepState::Dormant;
                }
            }
            TransactionEvent::StepRetryScheduled(data) => {
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.invoke = StepState::NotStarted;
                    step.retry_at = Some(data.retry_at);
                    step.deadline = None;
                    step.error = Some(data.error);
                }
            }
            TransactionEvent::StepFailed(data) => {
                self.record_permanent_failure(&data.step_id, data.error);
            }
            TransactionEvent::StepSkipped(data) => {
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.invoke = StepState::Skipped;
                }
            }
            TransactionEvent::CompensationRequested(_) => {
                self.flow_state = FlowState::WaitingToCompensate;
            }
            TransactionEvent::CompensationStarted(data) => {
                self.flow_state = FlowState::Compensating;
                for step in self.steps.values_mut() {
                    if step.is_active() {
                        step.invoke = StepState::Failed;
                        step.deadline = None;
                        step.error = Some(
                            StepErrorRecord::invoke("aborted by compensation", data.at)
                                .permanent(),
                        );
                    }
                    step.retry_at = None;
                }
            }
            TransactionEvent::StepCompensating(data) => {
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.compensate = StepState::Compensating;
                    self.payload.set_compensate_input(&data.step_id, data.input);
                }
            }
            TransactionEvent::StepCompensated(data) => {
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.compensate = StepState::Reverted;
                    self.payload
                        .set_compensate_output(&data.step_id, Value::Null);
                }
            }
            TransactionEvent::StepCompensationFailed(data) => {
                if let Some(step) = self.steps.get_mut(&data.step_id) {
                    step.compensate = StepState::Failed;
                    self.errors.push(StepFailure {
                        action: data.step_id.clone(),
                        handler_type: HandlerType::Compensate,
                        error: data.error.message.clone(),
                    });
                    step.compensation_error = Some(data.error);
                }
            }
            TransactionEvent::TransactionCompleted(_) => {
                self.flow_state = FlowState::Done;
            }
            TransactionEvent::TransactionReverted(_) => {
                self.flow_state = FlowState::Reverted;
            }
            TransactionEvent::TransactionFailed(_) => {
                self.flow_state = FlowState::Failed;
            }
            TransactionEvent::TransactionCancelled(_) => {
                self.cancelled = true;
            }
        }
    }

    fn record_permanent_failure(&mut self, step_id: &str, error: StepErrorRecord) {
        let Some(definition) = self.graph.get(step_id) else {
            return;
        };
        let skip = definition.skip_on_permanent_failure;
        let fails_transaction = definition.fails_transaction();
        let descendants = if skip {
            self.graph.descendants(step_id)
        } else {
            Default::default()
        };

        let Some(step) = self.steps.get_mut(step_id) else {
            return;
        };
        step.invoke = if skip {
            StepState::SkippedFailure
        } else {
            StepState::Failed
        };
        step.deadline = None;
        step.retry_at = None;
        self.errors.push(StepFailure {
            action: step_id.to_string(),
            handler_type: HandlerType::Invoke,
            error: error.message.clone(),
        });
        step.error = Some(error);

        for id in descendants {
            if let Some(child) = self.steps.get_mut(&id)
                && child.invoke == StepState::NotStarted
            {
                child.invoke = StepState::Skipped;
            }
        }

        if fails_transaction {
            self.has_failed_steps = true;
        }
    }
}

// Query methods
impl DistributedTransaction {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn flow_state(&self) -> FlowState {
        self.flow_state
    }

    pub fn step(&self, step_id: &str) -> Option<&TransactionStep> {
        self.steps.get(step_id)
    }

    /// Steps in topological order.
    pub fn steps(&self) -> impl Iterator<Item = &TransactionStep> {
        self.graph
            .topological_order()
            .iter()
            .filter_map(|id| self.steps.get(id))
    }

    pub fn payload(&self) -> &PayloadContext {
        &self.payload
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Invoke and compensate errors in the order they happened.
    pub fn errors(&self) -> &[StepFailure] {
        &self.errors
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the run must be rolled back.
    pub fn needs_compensation(&self) -> bool {
        self.has_failed_steps || self.cancelled
    }

    /// Steps ready to be invoked: not started, with every parent completed
    /// or skipped (or failed with `continue_on_permanent_failure`).
    ///
    /// Includes steps waiting for a retry delay; see
    /// [`TransactionStep::retry_at`].
    pub fn frontier(&self) -> Vec<String> {
        if !self.flow_state.can_invoke() || self.needs_compensation() {
            return Vec::new();
        }

        self.steps()
            .filter(|s| s.invoke == StepState::NotStarted)
            .filter(|s| {
                self.graph
                    .parents(&s.step_id)
                    .iter()
                    .all(|p| self.parent_satisfied(p))
            })
            .map(|s| s.step_id.clone())
            .collect()
    }

    fn parent_satisfied(&self, parent_id: &str) -> bool {
        let Some(parent) = self.steps.get(parent_id) else {
            return false;
        };
        parent.invoke.unblocks_children()
            || (parent.invoke == StepState::Failed
                && self
                    .graph
                    .get(parent_id)
                    .is_some_and(|d| d.continue_on_permanent_failure))
    }

    /// Steps with a scheduled retry and the time it is due.
    pub fn pending_retries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.steps()
            .filter(|s| s.invoke == StepState::NotStarted)
            .filter_map(|s| s.retry_at.map(|at| (s.step_id.clone(), at)))
            .collect()
    }

    /// Steps with an attempt in flight.
    pub fn in_flight(&self) -> Vec<String> {
        self.steps_in(StepState::Invoking)
    }

    /// Async steps waiting for a signal.
    pub fn dormant(&self) -> Vec<String> {
        self.steps_in(StepState::Dormant)
    }

    /// Dormant steps whose deadline has passed.
    pub fn dormant_overdue(&self, now: DateTime<Utc>) -> Vec<String> {
        self.steps()
            .filter(|s| s.invoke == StepState::Dormant)
            .filter(|s| s.deadline.is_some_and(|d| d <= now))
            .map(|s| s.step_id.clone())
            .collect()
    }

    /// Steps whose scheduled retry is due at `now`.
    pub fn retries_due(&self, now: DateTime<Utc>) -> Vec<String> {
        self.pending_retries()
            .into_iter()
            .filter(|(_, at)| *at <= now)
            .map(|(step_id, _)| step_id)
            .collect()
    }

    /// Earliest time something has to happen without a signal: a dormant
    /// step's deadline or a scheduled retry.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let deadlines = self
            .steps()
            .filter(|s| s.invoke == StepState::Dormant)
            .filter_map(|s| s.deadline);
        let retries = self.pending_retries().into_iter().map(|(_, at)| at);
        deadlines.chain(retries).min()
    }

    fn steps_in(&self, state: StepState) -> Vec<String> {
        self.steps()
            .filter(|s| s.invoke == state)
            .map(|s| s.step_id.clone())
            .collect()
    }

    /// Returns true if every step settled without requiring compensation.
    pub fn is_complete(&self) -> bool {
        !self.needs_compensation()
            && self.steps.values().all(|s| match s.invoke {
                StepState::Done | StepState::Skipped | StepState::SkippedFailure => true,
                StepState::Failed => self
                    .graph
                    .get(&s.step_id)
                    .is_some_and(|d| d.continue_on_permanent_failure),
                _ => false,
            })
    }

    /// Steps to compensate, children before parents.
    pub fn compensation_order(&self) -> Vec<String> {
        self.graph
            .topological_order()
            .iter()
            .rev()
            .filter(|id| {
                self.steps.get(*id).is_some_and(|s| s.needs_compensation())
                    && self.graph.get(id).is_some_and(|d| !d.no_compensation)
            })
            .cloned()
            .collect()
    }

    /// Returns true if any compensate handler failed.
    pub fn compensation_failed(&self) -> bool {
        self.steps
            .values()
            .any(|s| s.compensate == StepState::Failed)
    }

    /// The input a step's handlers receive.
    pub fn input_for(&self, step_id: &str) -> StepInput {
        let previous = self
            .graph
            .parents(step_id)
            .iter()
            .filter_map(|p| self.payload.output(p).map(|v| (p.clone(), v.clone())))
            .collect();
        let dependencies = self
            .graph
            .ancestors(step_id)
            .into_iter()
            .filter_map(|a| self.payload.output(&a).cloned().map(|v| (a, v)))
            .collect();

        StepInput {
            workflow_input: self.input.clone(),
            previous,
            dependencies,
        }
    }

    /// The run result: the output of `result_step` when given, otherwise
    /// every saved output keyed by step id.
    pub fn result(&self, result_step: Option<&str>) -> Value {
        match result_step {
            Some(id) => self.payload.output(id).cloned().unwrap_or(Value::Null),
            None => Value::Object(self.payload.outputs().into_iter().collect()),
        }
    }

    /// The first invoke failure, if any.
    pub fn first_failure(&self) -> Option<&StepFailure> {
        self.errors
            .iter()
            .find(|e| e.handler_type == HandlerType::Invoke)
    }

    /// Compensate failures recorded during rollback.
    pub fn compensation_errors(&self) -> Vec<StepFailure> {
        self.errors
            .iter()
            .filter(|e| e.handler_type == HandlerType::Compensate)
            .cloned()
            .collect()
    }
}

// Persistence
impl DistributedTransaction {
    /// Builds the checkpoint for the next version of this transaction.
    pub fn to_checkpoint(
        &self,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<TransactionCheckpoint, serde_json::Error> {
        Ok(TransactionCheckpoint::builder()
            .workflow_id(self.workflow_id.clone())
            .transaction_id(self.transaction_id.clone())
            .version(self.version.next())
            .flow_state(self.flow_state.as_str())
            .next_deadline(self.next_deadline())
            .expires_at(expires_at)
            .created_at(self.created_at)
            .updated_at(self.updated_at)
            .state(self)?
            .build())
    }

    /// Restores a transaction from a stored checkpoint.
    pub fn from_checkpoint(checkpoint: &TransactionCheckpoint) -> Result<Self, serde_json::Error> {
        let mut transaction: Self = checkpoint.state_as()?;
        transaction.version = checkpoint.version;
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::definition::StepDefinition;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn started(graph: WorkflowGraph) -> DistributedTransaction {
        let mut tx = DistributedTransaction::new("wf".into(), "tx-1".into());
        tx.apply(TransactionEvent::transaction_started(
            graph,
            json!({"order": 1}),
            BTreeMap::new(),
            now(),
        ));
        tx
    }

    fn complete(tx: &mut DistributedTransaction, step: &str, output: Value) {
        tx.apply(TransactionEvent::step_invoked(step, json!(null), now()));
        tx.apply(TransactionEvent::step_completed(step, output, now()));
    }

    fn diamond() -> WorkflowGraph {
        WorkflowBuilder::new()
            .add_step(StepDefinition::new("a"))
            .parallel([StepDefinition::new("b"), StepDefinition::new("c")])
            .then(StepDefinition::new("d"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_started_transaction() {
        let tx = started(diamond());
        assert_eq!(tx.flow_state(), FlowState::Invoking);
        assert_eq!(tx.steps().count(), 4);
        assert_eq!(tx.frontier(), ["a"]);
        assert!(!tx.is_complete());
    }

    #[test]
    fn test_frontier_waits_for_all_parents() {
        let mut tx = started(diamond());
        complete(&mut tx, "a", json!("A"));
        assert_eq!(tx.frontier(), ["b", "c"]);

        complete(&mut tx, "b", json!("B"));
        assert_eq!(tx.frontier(), ["c"]);

        complete(&mut tx, "c", json!("C"));
        assert_eq!(tx.frontier(), ["d"]);

        complete(&mut tx, "d", json!("D"));
        assert!(tx.frontier().is_empty());
        assert!(tx.is_complete());
    }

    #[test]
    fn test_invoked_step_counts_attempts() {
        let mut tx = started(diamond());
        tx.apply(TransactionEvent::step_invoked("a", json!({}), now()));
        let step = tx.step("a").unwrap();
        assert_eq!(step.invoke, StepState::Invoking);
        assert_eq!(step.attempts, 1);
        assert!(step.started_at.is_some());
        assert_eq!(tx.in_flight(), ["a"]);
        assert!(tx.frontier().is_empty());
    }

    #[test]
    fn test_retry_returns_step_to_frontier() {
        let mut tx = started(diamond());
        let at = now();
        tx.apply(TransactionEvent::step_invoked("a", json!({}), at));
        tx.apply(TransactionEvent::step_retry_scheduled(
            "a",
            StepErrorRecord::invoke("flaky", at),
            at,
        ));

        assert_eq!(tx.frontier(), ["a"]);
        assert_eq!(tx.pending_retries(), [("a".to_string(), at)]);
        assert_eq!(tx.next_deadline(), Some(at));
        assert_eq!(tx.retries_due(at), ["a"]);
        assert!(tx.retries_due(at - chrono::Duration::seconds(1)).is_empty());
        assert_eq!(tx.step("a").unwrap().error.as_ref().unwrap().message, "flaky");
        assert!(tx.errors().is_empty());
    }

    #[test]
    fn test_failure_stops_frontier_and_orders_compensation() {
        let mut tx = started(diamond());
        complete(&mut tx, "a", json!("A"));
        complete(&mut tx, "b", json!("B"));
        tx.apply(TransactionEvent::step_invoked("c", json!({}), now()));
        tx.apply(TransactionEvent::step_failed(
            "c",
            StepErrorRecord::invoke("boom", now()),
        ));

        assert!(tx.needs_compensation());
        assert!(tx.frontier().is_empty());
        assert!(!tx.is_complete());
        assert_eq!(tx.compensation_order(), ["b", "a"]);
        assert_eq!(tx.first_failure().unwrap().action, "c");
    }

    #[test]
    fn test_continue_on_permanent_failure_unblocks_children() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a").continue_on_permanent_failure())
            .then(StepDefinition::new("b"))
            .build()
            .unwrap();
        let mut tx = started(graph);
        tx.apply(TransactionEvent::step_failed(
            "a",
            StepErrorRecord::invoke("boom", now()),
        ));

        assert!(!tx.needs_compensation());
        assert_eq!(tx.frontier(), ["b"]);
        complete(&mut tx, "b", json!(1));
        assert!(tx.is_complete());
        assert_eq!(tx.errors().len(), 1);
    }

    #[test]
    fn test_skip_on_permanent_failure_skips_descendants() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a"))
            .then(StepDefinition::new("b").skip_on_permanent_failure())
            .then(StepDefinition::new("c"))
            .build()
            .unwrap();
        let mut tx = started(graph);
        complete(&mut tx, "a", json!(1));
        tx.apply(TransactionEvent::step_failed(
            "b",
            StepErrorRecord::invoke("boom", now()),
        ));

        assert_eq!(tx.step("b").unwrap().invoke, StepState::SkippedFailure);
        assert_eq!(tx.step("c").unwrap().invoke, StepState::Skipped);
        assert!(!tx.needs_compensation());
        assert!(tx.is_complete());
    }

    #[test]
    fn test_skipped_step_unblocks_children() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a").conditional())
            .then(StepDefinition::new("b"))
            .build()
            .unwrap();
        let mut tx = started(graph);
        tx.apply(TransactionEvent::step_skipped("a", now()));
        assert_eq!(tx.frontier(), ["b"]);
    }

    #[test]
    fn test_dormant_deadline_and_abort_on_compensation() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a"))
            .then(StepDefinition::new("wait").async_step().timeout_seconds(5))
            .build()
            .unwrap();
        let mut tx = started(graph);
        complete(&mut tx, "a", json!(1));

        let at = now();
        tx.apply(TransactionEvent::step_invoked("wait", json!({}), at));
        tx.apply(TransactionEvent::step_suspended("wait", at));

        assert_eq!(tx.dormant(), ["wait"]);
        assert_eq!(tx.next_deadline(), Some(at + chrono::Duration::seconds(5)));
        assert!(tx.dormant_overdue(at).is_empty());
        assert_eq!(
            tx.dormant_overdue(at + chrono::Duration::seconds(5)),
            ["wait"]
        );

        tx.apply(TransactionEvent::transaction_cancelled(at));
        tx.apply(TransactionEvent::compensation_requested("cancelled", at));
        tx.apply(TransactionEvent::compensation_started(at));

        let wait = tx.step("wait").unwrap();
        assert_eq!(wait.invoke, StepState::Failed);
        assert!(!wait.needs_compensation());
        assert_eq!(tx.compensation_order(), ["a"]);
    }

    #[test]
    fn test_compensation_outcomes() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a"))
            .then(StepDefinition::new("b"))
            .then(StepDefinition::new("c"))
            .build()
            .unwrap();
        let mut tx = started(graph);
        complete(&mut tx, "a", json!(1));
        complete(&mut tx, "b", json!(2));
        tx.apply(TransactionEvent::step_failed(
            "c",
            StepErrorRecord::invoke("boom", now()),
        ));
        tx.apply(TransactionEvent::compensation_requested("c", now()));
        tx.apply(TransactionEvent::compensation_started(now()));
        assert_eq!(tx.flow_state(), FlowState::Compensating);

        tx.apply(TransactionEvent::step_compensating("b", json!({}), now()));
        assert_eq!(tx.step("b").unwrap().compensate, StepState::Compensating);
        tx.apply(TransactionEvent::step_compensation_failed(
            "b",
            StepErrorRecord::compensate("refund failed", now()),
        ));
        tx.apply(TransactionEvent::step_compensating("a", json!({}), now()));
        tx.apply(TransactionEvent::step_compensated("a", now()));

        assert!(tx.compensation_failed());
        assert_eq!(tx.step("a").unwrap().compensate, StepState::Reverted);
        let comp = tx.compensation_errors();
        assert_eq!(comp.len(), 1);
        assert_eq!(comp[0].action, "b");

        tx.apply(TransactionEvent::transaction_failed(now()));
        assert_eq!(tx.flow_state(), FlowState::Failed);
        assert!(tx.flow_state().is_terminal());
    }

    #[test]
    fn test_no_compensation_steps_are_excluded() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a").no_compensation())
            .then(StepDefinition::new("b"))
            .build()
            .unwrap();
        let mut tx = started(graph);
        complete(&mut tx, "a", json!(1));
        complete(&mut tx, "b", json!(2));
        tx.apply(TransactionEvent::transaction_cancelled(now()));
        assert_eq!(tx.compensation_order(), ["b"]);
    }

    #[test]
    fn test_input_for_resolves_parents_and_ancestors() {
        let mut tx = started(diamond());
        complete(&mut tx, "a", json!("A"));
        complete(&mut tx, "b", json!("B"));
        complete(&mut tx, "c", json!("C"));

        let input = tx.input_for("d");
        assert_eq!(input.workflow_input, json!({"order": 1}));
        assert_eq!(input.previous.keys().collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(input.dependencies.len(), 3);
        assert_eq!(input.dependencies["a"], json!("A"));
    }

    #[test]
    fn test_unsaved_output_is_hidden_but_kept() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("secret").save_response(false))
            .then(StepDefinition::new("next"))
            .build()
            .unwrap();
        let mut tx = started(graph);
        complete(&mut tx, "secret", json!("token"));

        assert!(tx.input_for("next").previous.is_empty());
        assert_eq!(tx.step("secret").unwrap().output, Some(json!("token")));
        assert_eq!(tx.result(None), json!({}));
    }

    #[test]
    fn test_result_selection() {
        let mut tx = started(diamond());
        complete(&mut tx, "a", json!("A"));
        complete(&mut tx, "b", json!("B"));

        assert_eq!(tx.result(Some("b")), json!("B"));
        assert_eq!(tx.result(Some("d")), Value::Null);
        assert_eq!(tx.result(None), json!({"a": "A", "b": "B"}));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let mut tx = started(diamond());
        complete(&mut tx, "a", json!("A"));

        let checkpoint = tx.to_checkpoint(None).unwrap();
        assert_eq!(checkpoint.version, Version::first());
        assert_eq!(checkpoint.flow_state, "invoking");

        let restored = DistributedTransaction::from_checkpoint(&checkpoint).unwrap();
        assert_eq!(restored.version(), Version::first());
        assert_eq!(restored.frontier(), ["b", "c"]);
        assert_eq!(restored.payload(), tx.payload());
    }

    #[test]
    fn test_empty_workflow_is_complete() {
        let tx = started(WorkflowGraph::empty());
        assert!(tx.is_complete());
        assert!(tx.frontier().is_empty());
    }
}
