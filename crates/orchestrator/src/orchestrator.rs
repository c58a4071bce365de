//! Drives distributed transactions through their workflow graph.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::{TransactionId, WorkflowId};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use transaction_store::{SaveOptions, TransactionQuery, TransactionStore, TransactionStoreExt};
use workflow::{
    DistributedTransaction, FlowState, HandlerType, StepErrorRecord, StepState, TransactionEvent,
};

use crate::clock::{Clock, SystemClock};
use crate::context::{ExecutionContext, ServiceResolver};
use crate::definition::{Retention, WorkflowDefinition};
use crate::error::{OrchestratorError, Result};
use crate::handler::{StepBinding, StepError, StepResponse, StepResult};
use crate::lease::TransactionLeases;
use crate::manager::WorkflowManager;
use crate::run::{RunRequest, RunResult};
use crate::validator::ValidationStage;

/// How one invoke attempt ended.
enum Attempt {
    Finished(StepResult),
    TimedOut(Duration),
}

enum Work {
    Attempted { step_id: String, attempt: Attempt },
    RetryDue(String),
}

/// What `drive` does with retries scheduled for later.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Retries {
    /// Sleep until they are due and run them.
    Wait,
    /// Leave them in the checkpoint for the timeout sweeper.
    Defer,
}

/// Runs transactions of registered workflows.
///
/// Every state change is applied to the transaction as an event and saved
/// with an expected version, so a crashed process can be resumed from the
/// last checkpoint. Operations on one transaction are serialized through a
/// lease; `run` rejects a second concurrent run while signals and `resume`
/// wait for their turn.
pub struct TransactionOrchestrator<S> {
    store: S,
    manager: Arc<WorkflowManager>,
    leases: TransactionLeases,
    clock: Arc<dyn Clock>,
    services: ServiceResolver,
}

impl<S: TransactionStore> TransactionOrchestrator<S> {
    pub fn new(store: S, manager: Arc<WorkflowManager>) -> Self {
        Self {
            store,
            manager,
            leases: TransactionLeases::new(),
            clock: Arc::new(SystemClock),
            services: ServiceResolver::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_services(mut self, services: ServiceResolver) -> Self {
        self.services = services;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn manager(&self) -> &Arc<WorkflowManager> {
        &self.manager
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn services(&self) -> &ServiceResolver {
        &self.services
    }

    pub fn leases(&self) -> &TransactionLeases {
        &self.leases
    }

    /// Starts a run and drives it until it finishes or waits on an async step.
    ///
    /// If the transaction id already exists, returns its current result
    /// without executing anything.
    #[tracing::instrument(skip(self, request), fields(workflow_id = %request.workflow_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        let definition = self.manager.require(&request.workflow_id).await?;
        let throw_on_error = request
            .throw_on_error
            .unwrap_or(definition.options.throw_on_error);
        let transaction_id = request.transaction_id.unwrap_or_default();

        let input = match &definition.options.input_validator {
            Some(validator) => {
                validator
                    .validate(request.input)
                    .map_err(|issues| OrchestratorError::Validation {
                        workflow_id: definition.id.clone(),
                        stage: ValidationStage::Input,
                        issues,
                    })?
            }
            None => request.input,
        };

        let _lease = self
            .leases
            .try_acquire(&definition.id, &transaction_id)
            .ok_or_else(|| OrchestratorError::AlreadyRunning {
                workflow_id: definition.id.clone(),
                transaction_id: transaction_id.clone(),
            })?;

        if let Some(existing) = self.load(&definition.id, &transaction_id).await? {
            tracing::info!(
                transaction_id = %transaction_id,
                state = %existing.flow_state(),
                "transaction already exists"
            );
            return self.outcome(&definition, existing, throw_on_error);
        }

        metrics::counter!("workflow_runs_total").increment(1);
        tracing::info!(transaction_id = %transaction_id, "starting transaction");

        let mut tx = DistributedTransaction::new(definition.id.clone(), transaction_id);
        tx.apply(TransactionEvent::transaction_started(
            definition.graph.clone(),
            input,
            request.context,
            self.clock.now(),
        ));
        self.save(&definition, &mut tx).await?;

        self.drive(&definition, &mut tx, Retries::Wait).await?;
        self.outcome(&definition, tx, throw_on_error)
    }

    /// Completes a dormant async step with its response and continues the run.
    ///
    /// Retries scheduled while continuing are left to the timeout sweeper.
    #[tracing::instrument(skip(self, response))]
    pub async fn set_step_success(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
        step_id: &str,
        response: Value,
    ) -> Result<RunResult> {
        let definition = self.manager.require(workflow_id).await?;
        let _lease = self.leases.acquire(workflow_id, transaction_id).await;
        let mut tx = self.load_existing(workflow_id, transaction_id).await?;
        require_dormant(&tx, step_id)?;

        tracing::info!("async step completed");
        tx.apply(TransactionEvent::step_completed(
            step_id,
            response,
            self.clock.now(),
        ));
        self.save(&definition, &mut tx).await?;

        self.drive(&definition, &mut tx, Retries::Defer).await?;
        self.outcome(&definition, tx, definition.options.throw_on_error)
    }

    /// Fails a dormant async step and continues the run.
    ///
    /// The step's retry policy applies unless the error is permanent. A
    /// retry is recorded in the checkpoint and run later by the timeout
    /// sweeper, so the call does not wait out the retry interval.
    #[tracing::instrument(skip(self))]
    pub async fn set_step_failure(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
        step_id: &str,
        error: StepError,
    ) -> Result<RunResult> {
        let definition = self.manager.require(workflow_id).await?;
        let _lease = self.leases.acquire(workflow_id, transaction_id).await;
        let mut tx = self.load_existing(workflow_id, transaction_id).await?;
        require_dormant(&tx, step_id)?;

        let mut record = StepErrorRecord::invoke(error.message, self.clock.now());
        if error.permanent {
            record = record.permanent();
        }
        self.record_failure(&mut tx, step_id, record);
        self.save(&definition, &mut tx).await?;

        self.drive(&definition, &mut tx, Retries::Defer).await?;
        self.outcome(&definition, tx, definition.options.throw_on_error)
    }

    /// Continues a stored transaction from its last checkpoint.
    ///
    /// A finished transaction is returned unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn resume(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<RunResult> {
        let definition = self.manager.require(workflow_id).await?;
        let _lease = self.leases.acquire(workflow_id, transaction_id).await;
        let mut tx = self.load_existing(workflow_id, transaction_id).await?;

        self.drive(&definition, &mut tx, Retries::Wait).await?;
        self.outcome(&definition, tx, definition.options.throw_on_error)
    }

    /// Rolls back a transaction that has not been rolled back yet.
    ///
    /// Dormant steps are aborted; completed steps are compensated.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<RunResult> {
        let definition = self.manager.require(workflow_id).await?;
        let _lease = self.leases.acquire(workflow_id, transaction_id).await;
        let mut tx = self.load_existing(workflow_id, transaction_id).await?;

        match tx.flow_state() {
            FlowState::Reverted | FlowState::Failed => {
                return Err(OrchestratorError::invalid_state(
                    format!("transaction '{transaction_id}'"),
                    "a state that can be compensated",
                    tx.flow_state(),
                ));
            }
            FlowState::WaitingToCompensate | FlowState::Compensating => {}
            _ => {
                let now = self.clock.now();
                tracing::info!("cancelling transaction");
                tx.apply(TransactionEvent::transaction_cancelled(now));
                tx.apply(TransactionEvent::compensation_requested(
                    "transaction cancelled",
                    now,
                ));
                self.save(&definition, &mut tx).await?;
            }
        }

        self.compensate(&definition, &mut tx).await?;
        self.outcome(&definition, tx, false)
    }

    /// Loads a stored transaction.
    pub async fn get_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<DistributedTransaction>> {
        self.load(workflow_id, transaction_id).await
    }

    /// Fails every dormant step whose deadline has passed, runs retries
    /// that are due and continues the affected runs.
    ///
    /// Transactions another caller is driving are skipped until the next
    /// sweep. Returns the number of expired steps.
    #[tracing::instrument(skip(self))]
    pub async fn expire_overdue(&self) -> Result<usize> {
        let query = TransactionQuery::new()
            .flow_states([FlowState::Invoking.as_str()])
            .deadline_before(self.clock.now());
        let overdue = self.store.list_transactions(query).await?;

        let mut expired = 0;
        for checkpoint in overdue {
            match self
                .expire_transaction(&checkpoint.workflow_id, &checkpoint.transaction_id)
                .await
            {
                Ok(count) => expired += count,
                Err(err) => tracing::error!(
                    workflow_id = %checkpoint.workflow_id,
                    transaction_id = %checkpoint.transaction_id,
                    error = %err,
                    "failed to expire transaction"
                ),
            }
        }
        Ok(expired)
    }

    /// Deletes finished transactions whose retention elapsed.
    pub async fn purge_expired(&self) -> Result<usize> {
        Ok(self.store.purge_expired(self.clock.now()).await?)
    }

    async fn expire_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<usize> {
        let definition = self.manager.require(workflow_id).await?;
        let Some(_lease) = self.leases.try_acquire(workflow_id, transaction_id) else {
            tracing::debug!(transaction_id = %transaction_id, "transaction is busy, skipping sweep");
            return Ok(0);
        };
        let Some(mut tx) = self.load(workflow_id, transaction_id).await? else {
            return Ok(0);
        };

        let now = self.clock.now();
        let overdue = tx.dormant_overdue(now);
        let retries = tx.retries_due(now);
        if overdue.is_empty() && retries.is_empty() {
            return Ok(0);
        }

        for step_id in &overdue {
            tracing::warn!(transaction_id = %transaction_id, step_id = %step_id, "async step timed out");
            metrics::counter!("workflow_step_timeouts_total").increment(1);
            let error = StepErrorRecord::invoke("async step timed out", now).timed_out();
            self.record_failure(&mut tx, step_id, error);
        }
        if !overdue.is_empty() {
            self.save(&definition, &mut tx).await?;
        }
        if !retries.is_empty() {
            tracing::info!(transaction_id = %transaction_id, ?retries, "running due retries");
        }

        self.drive(&definition, &mut tx, Retries::Defer).await?;
        Ok(overdue.len())
    }

    /// Advances a transaction as far as it can go.
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        tx: &mut DistributedTransaction,
        retries: Retries,
    ) -> Result<()> {
        if tx.flow_state().is_terminal() {
            return Ok(());
        }

        if tx.flow_state().can_invoke() {
            self.invoke_steps(definition, tx, retries).await?;
        }

        if tx.needs_compensation() {
            self.compensate(definition, tx).await?;
        } else if tx.is_complete() {
            tracing::info!(transaction_id = %tx.transaction_id(), "transaction completed");
            tx.apply(TransactionEvent::transaction_completed(self.clock.now()));
            self.record_finished(tx);
            self.save(definition, tx).await?;
        }
        Ok(())
    }

    /// Invokes ready steps until nothing is left to run.
    ///
    /// Independent steps run concurrently. Outcomes are applied one at a
    /// time and each is saved before the next is looked at. Once the
    /// transaction needs compensation no new step starts, but attempts
    /// already running are awaited. With [`Retries::Defer`] a step waiting
    /// for its retry delay is not started here.
    async fn invoke_steps(
        &self,
        definition: &WorkflowDefinition,
        tx: &mut DistributedTransaction,
        retries: Retries,
    ) -> Result<()> {
        let mut pending: FuturesUnordered<BoxFuture<'static, Work>> = FuturesUnordered::new();
        let mut backoff = HashSet::new();
        let mut running = 0usize;

        // Attempts a previous process started but never recorded.
        let interrupted = tx.in_flight();
        for step_id in &interrupted {
            tracing::warn!(step_id = %step_id, "invoke attempt was interrupted");
            let error = StepErrorRecord::invoke("invoke attempt was interrupted", self.clock.now());
            self.record_failure(tx, step_id, error);
        }
        if !interrupted.is_empty() {
            self.save(definition, tx).await?;
        }

        let now = self.clock.now();
        for (step_id, retry_at) in tx.pending_retries() {
            let delay = (retry_at - now).to_std().unwrap_or_default();
            if !delay.is_zero() {
                backoff.insert(step_id.clone());
                if retries == Retries::Wait {
                    pending.push(retry_after(step_id, delay));
                }
            }
        }

        loop {
            let mut dispatched = false;
            loop {
                let ready: Vec<String> = tx
                    .frontier()
                    .into_iter()
                    .filter(|id| !backoff.contains(id))
                    .collect();
                if ready.is_empty() {
                    break;
                }
                for step_id in ready {
                    dispatched = true;
                    if let Some(invocation) = self.dispatch(definition, tx, &step_id)? {
                        pending.push(invocation);
                        running += 1;
                    }
                }
            }
            if dispatched {
                self.save(definition, tx).await?;
            }

            if running == 0
                && (tx.needs_compensation() || !tx.flow_state().can_invoke() || pending.is_empty())
            {
                break;
            }

            match pending.next().await {
                Some(Work::RetryDue(step_id)) => {
                    backoff.remove(&step_id);
                }
                Some(Work::Attempted { step_id, attempt }) => {
                    running -= 1;
                    if let Some(delay) = self.record_attempt(tx, &step_id, attempt)
                        && !delay.is_zero()
                    {
                        backoff.insert(step_id.clone());
                        if retries == Retries::Wait {
                            pending.push(retry_after(step_id, delay));
                        }
                    }
                    self.save(definition, tx).await?;
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Starts one attempt of a ready step.
    ///
    /// Returns `None` when a conditional step is skipped instead.
    fn dispatch(
        &self,
        definition: &WorkflowDefinition,
        tx: &mut DistributedTransaction,
        step_id: &str,
    ) -> Result<Option<BoxFuture<'static, Work>>> {
        let now = self.clock.now();
        let Some(binding) = self.binding(definition, tx, step_id) else {
            let error = StepErrorRecord::invoke(unbound(step_id), now).permanent();
            self.record_failure(tx, step_id, error);
            return Ok(None);
        };
        let input = tx.input_for(step_id);

        if let Some(when) = &binding.when
            && !when(&input)
        {
            tracing::info!(step_id, "condition not met, skipping step");
            tx.apply(TransactionEvent::step_skipped(step_id, now));
            return Ok(None);
        }

        let timeout = tx.graph().get(step_id).and_then(|d| d.timeout());
        tx.apply(TransactionEvent::step_invoked(
            step_id,
            serde_json::to_value(&input)?,
            now,
        ));
        metrics::counter!("workflow_step_invocations_total").increment(1);

        let ctx = self.context(tx, step_id, HandlerType::Invoke);
        tracing::debug!(step_id, attempt = ctx.attempt, "invoking step");

        let handler = binding.handler;
        let step_id = step_id.to_string();
        Ok(Some(Box::pin(async move {
            let call = AssertUnwindSafe(handler.invoke(input, ctx))
                .catch_unwind()
                .map(|result| {
                    result.unwrap_or_else(|_| Err(StepError::new("step handler panicked")))
                });
            let attempt = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => Attempt::Finished(result),
                    Err(_) => Attempt::TimedOut(limit),
                },
                None => Attempt::Finished(call.await),
            };
            Work::Attempted { step_id, attempt }
        })))
    }

    /// Applies the outcome of an attempt. Returns the retry delay if a
    /// retry was scheduled.
    fn record_attempt(
        &self,
        tx: &mut DistributedTransaction,
        step_id: &str,
        attempt: Attempt,
    ) -> Option<Duration> {
        let now = self.clock.now();
        let async_step = tx.graph().get(step_id).is_some_and(|d| d.async_step);

        match attempt {
            Attempt::Finished(Ok(StepResponse::Completed(output))) => {
                tracing::info!(step_id, "step completed");
                tx.apply(TransactionEvent::step_completed(step_id, output, now));
                None
            }
            Attempt::Finished(Ok(StepResponse::Suspended)) if async_step => {
                tracing::info!(step_id, "step suspended");
                tx.apply(TransactionEvent::step_suspended(step_id, now));
                None
            }
            Attempt::Finished(Ok(StepResponse::Suspended)) => {
                let error =
                    StepErrorRecord::invoke("step suspended but is not async", now).permanent();
                self.record_failure(tx, step_id, error)
            }
            Attempt::Finished(Err(err)) => {
                let mut error = StepErrorRecord::invoke(err.message, now);
                if err.permanent {
                    error = error.permanent();
                }
                self.record_failure(tx, step_id, error)
            }
            Attempt::TimedOut(limit) => {
                metrics::counter!("workflow_step_timeouts_total").increment(1);
                let message = format!("step timed out after {}s", limit.as_secs());
                let error = StepErrorRecord::invoke(message, now).timed_out();
                self.record_failure(tx, step_id, error)
            }
        }
    }

    /// Schedules a retry or fails the step for good, requesting
    /// compensation when the failure fails the transaction.
    fn record_failure(
        &self,
        tx: &mut DistributedTransaction,
        step_id: &str,
        error: StepErrorRecord,
    ) -> Option<Duration> {
        let step = tx.graph().get(step_id)?.clone();
        let attempts = tx.step(step_id).map_or(0, |s| s.attempts);
        let now = error.at;

        if !error.permanent && !tx.needs_compensation() && step.can_retry(attempts) {
            let delay = step.retry_delay(attempts);
            let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            tracing::warn!(
                step_id,
                attempts,
                error = %error.message,
                retry_in_ms = delay.as_millis() as u64,
                "step failed, retry scheduled"
            );
            metrics::counter!("workflow_step_retries_total").increment(1);
            tx.apply(TransactionEvent::step_retry_scheduled(step_id, error, retry_at));
            return Some(delay);
        }

        tracing::warn!(step_id, attempts, error = %error.message, "step failed");
        tx.apply(TransactionEvent::step_failed(step_id, error));
        if step.fails_transaction() && tx.flow_state() == FlowState::Invoking {
            tx.apply(TransactionEvent::compensation_requested(
                format!("step '{step_id}' failed"),
                now,
            ));
        }
        None
    }

    /// Runs compensate handlers, children before parents, then settles the
    /// transaction as reverted or failed.
    async fn compensate(
        &self,
        definition: &WorkflowDefinition,
        tx: &mut DistributedTransaction,
    ) -> Result<()> {
        if tx.flow_state() == FlowState::Invoking {
            tx.apply(TransactionEvent::compensation_requested(
                "compensation required",
                self.clock.now(),
            ));
        }
        if tx.flow_state() != FlowState::Compensating {
            tracing::info!(transaction_id = %tx.transaction_id(), "compensating transaction");
            tx.apply(TransactionEvent::compensation_started(self.clock.now()));
            self.save(definition, tx).await?;
        }

        for step_id in tx.compensation_order() {
            let Some(binding) = self.binding(definition, tx, &step_id) else {
                tracing::error!(step_id = %step_id, "no compensate handler bound");
                metrics::counter!("workflow_compensation_failures_total").increment(1);
                tx.apply(TransactionEvent::step_compensation_failed(
                    &step_id,
                    StepErrorRecord::compensate(unbound(&step_id), self.clock.now()),
                ));
                self.save(definition, tx).await?;
                continue;
            };
            let input = tx.input_for(&step_id);
            let output = tx
                .step(&step_id)
                .and_then(|s| s.output.clone())
                .unwrap_or(Value::Null);

            tx.apply(TransactionEvent::step_compensating(
                &step_id,
                serde_json::to_value(&input)?,
                self.clock.now(),
            ));
            self.save(definition, tx).await?;
            metrics::counter!("workflow_compensations_total").increment(1);

            let ctx = self.context(tx, &step_id, HandlerType::Compensate);
            let result = AssertUnwindSafe(binding.handler.compensate(input, output, ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(StepError::new("compensate handler panicked")));

            let now = self.clock.now();
            match result {
                Ok(()) => {
                    tracing::info!(step_id = %step_id, "step compensated");
                    tx.apply(TransactionEvent::step_compensated(&step_id, now));
                }
                Err(err) => {
                    tracing::error!(step_id = %step_id, error = %err, "step compensation failed");
                    metrics::counter!("workflow_compensation_failures_total").increment(1);
                    tx.apply(TransactionEvent::step_compensation_failed(
                        &step_id,
                        StepErrorRecord::compensate(err.message, now),
                    ));
                }
            }
            self.save(definition, tx).await?;
        }

        let now = self.clock.now();
        if tx.compensation_failed() {
            tracing::error!(transaction_id = %tx.transaction_id(), "transaction failed, compensation incomplete");
            tx.apply(TransactionEvent::transaction_failed(now));
        } else {
            tracing::info!(transaction_id = %tx.transaction_id(), "transaction reverted");
            tx.apply(TransactionEvent::transaction_reverted(now));
        }
        self.record_finished(tx);
        self.save(definition, tx).await
    }

    /// Looks up a step of the transaction's own graph in the current
    /// bindings.
    fn binding(
        &self,
        definition: &WorkflowDefinition,
        tx: &DistributedTransaction,
        step_id: &str,
    ) -> Option<StepBinding> {
        let step = tx.graph().get(step_id)?;
        definition.handlers.resolve(step)
    }

    fn context(
        &self,
        tx: &DistributedTransaction,
        step_id: &str,
        handler_type: HandlerType,
    ) -> ExecutionContext {
        ExecutionContext {
            workflow_id: tx.workflow_id().clone(),
            transaction_id: tx.transaction_id().clone(),
            step_id: step_id.to_string(),
            attempt: tx.step(step_id).map_or(0, |s| s.attempts),
            handler_type,
            metadata: Arc::new(tx.metadata().clone()),
            services: self.services.clone(),
        }
    }

    /// Builds the caller-facing result of a transaction.
    fn outcome(
        &self,
        definition: &WorkflowDefinition,
        tx: DistributedTransaction,
        throw_on_error: bool,
    ) -> Result<RunResult> {
        let mut result = tx.result(definition.options.result_step.as_deref());

        if tx.flow_state() == FlowState::Done
            && let Some(validator) = &definition.options.output_validator
        {
            result = validator
                .validate(result)
                .map_err(|issues| OrchestratorError::Validation {
                    workflow_id: definition.id.clone(),
                    stage: ValidationStage::Output,
                    issues,
                })?;
        }

        if throw_on_error
            && matches!(tx.flow_state(), FlowState::Reverted | FlowState::Failed)
            && let Some(failure) = tx.first_failure()
        {
            return Err(OrchestratorError::StepFailed {
                workflow_id: tx.workflow_id().clone(),
                transaction_id: tx.transaction_id().clone(),
                failure: failure.clone(),
                state: tx.flow_state(),
                compensation_errors: tx.compensation_errors(),
            });
        }

        Ok(RunResult {
            result,
            errors: tx.errors().to_vec(),
            transaction: tx,
        })
    }

    fn record_finished(&self, tx: &DistributedTransaction) {
        let elapsed = (self.clock.now() - tx.created_at())
            .to_std()
            .unwrap_or_default();
        metrics::counter!("workflow_runs_finished_total", "state" => tx.flow_state().as_str())
            .increment(1);
        metrics::histogram!("workflow_run_duration_seconds").record(elapsed.as_secs_f64());
    }

    async fn load(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<DistributedTransaction>> {
        let Some(checkpoint) = self
            .store
            .load_transaction(workflow_id, transaction_id)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(DistributedTransaction::from_checkpoint(&checkpoint)?))
    }

    async fn load_existing(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<DistributedTransaction> {
        self.load(workflow_id, transaction_id)
            .await?
            .ok_or_else(|| OrchestratorError::TransactionNotFound {
                workflow_id: workflow_id.clone(),
                transaction_id: transaction_id.clone(),
            })
    }

    /// Saves the transaction as its next version, or deletes it when it
    /// finished and the workflow does not retain finished runs.
    async fn save(
        &self,
        definition: &WorkflowDefinition,
        tx: &mut DistributedTransaction,
    ) -> Result<()> {
        let terminal = tx.flow_state().is_terminal();
        let expires_at = match definition.options.retention {
            Retention::Discard if terminal => {
                self.store
                    .delete_transaction(tx.workflow_id(), tx.transaction_id())
                    .await?;
                tracing::debug!(transaction_id = %tx.transaction_id(), "discarded finished transaction");
                return Ok(());
            }
            Retention::For(ttl) if terminal => chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| self.clock.now() + ttl),
            _ => None,
        };

        let checkpoint = tx.to_checkpoint(expires_at)?;
        let version = self
            .store
            .save_transaction(checkpoint, SaveOptions::expect_version(tx.version()))
            .await?;
        tx.set_version(version);
        Ok(())
    }
}

fn require_dormant(tx: &DistributedTransaction, step_id: &str) -> Result<()> {
    let step = tx
        .step(step_id)
        .ok_or_else(|| OrchestratorError::UnknownStep {
            workflow_id: tx.workflow_id().clone(),
            step: step_id.to_string(),
        })?;
    if step.invoke != StepState::Dormant {
        return Err(OrchestratorError::invalid_state(
            format!("step '{step_id}'"),
            StepState::Dormant.as_str(),
            step.invoke,
        ));
    }
    Ok(())
}

fn unbound(step_id: &str) -> String {
    format!("no handler bound for step '{step_id}'")
}

fn retry_after(step_id: String, delay: Duration) -> BoxFuture<'static, Work> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;
        Work::RetryDue(step_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowOptions;
    use crate::handler::step_fn;
    use serde_json::json;
    use transaction_store::InMemoryTransactionStore;
    use workflow::{StepDefinition, WorkflowBuilder};

    async fn orchestrator(
        definition: WorkflowDefinition,
    ) -> TransactionOrchestrator<InMemoryTransactionStore> {
        let manager = Arc::new(WorkflowManager::new());
        manager.register(definition).await.unwrap();
        TransactionOrchestrator::new(InMemoryTransactionStore::new(), manager)
    }

    fn single_step(step: StepDefinition) -> WorkflowDefinition {
        let graph = WorkflowBuilder::new().add_step(step).build().unwrap();
        WorkflowDefinition::new("single", graph)
            .options(WorkflowOptions::new().retention(Retention::Keep))
    }

    #[tokio::test]
    async fn test_interrupted_attempt_is_retried_on_resume() {
        let definition = single_step(StepDefinition::new("a").max_retries(1)).step(
            "a",
            step_fn(|_, _| async { Ok(StepResponse::Completed(json!("ok"))) }),
        );
        let orchestrator = orchestrator(definition.clone()).await;

        // Persist a transaction whose only step was left mid-attempt.
        let mut tx = DistributedTransaction::new("single".into(), "tx-1".into());
        let now = orchestrator.clock().now();
        tx.apply(TransactionEvent::transaction_started(
            definition.graph.clone(),
            json!({}),
            Default::default(),
            now,
        ));
        tx.apply(TransactionEvent::step_invoked("a", json!({}), now));
        orchestrator.save(&definition, &mut tx).await.unwrap();

        let result = orchestrator
            .resume(&"single".into(), &"tx-1".into())
            .await
            .unwrap();

        assert_eq!(result.state(), FlowState::Done);
        assert_eq!(result.transaction.step("a").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_suspending_non_async_step_fails_it() {
        let definition = single_step(StepDefinition::new("a"))
            .step("a", step_fn(|_, _| async { Ok(StepResponse::Suspended) }));
        let orchestrator = orchestrator(definition).await;

        let result = orchestrator
            .run(RunRequest::new("single", json!({})))
            .await
            .unwrap();

        assert_eq!(result.state(), FlowState::Reverted);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].error, "step suspended but is not async");
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_step() {
        let definition = single_step(StepDefinition::new("a")).step(
            "a",
            step_fn(|_, _| async {
                if true {
                    panic!("boom");
                }
                Ok(StepResponse::Suspended)
            }),
        );
        let orchestrator = orchestrator(definition).await;

        let result = orchestrator
            .run(RunRequest::new("single", json!({})))
            .await
            .unwrap();

        assert_eq!(result.state(), FlowState::Reverted);
        assert_eq!(result.errors[0].error, "step handler panicked");
    }

    #[tokio::test]
    async fn test_discard_retention_deletes_finished_run() {
        let graph = WorkflowBuilder::new()
            .add_step(StepDefinition::new("a"))
            .build()
            .unwrap();
        let definition = WorkflowDefinition::new("discard", graph).step(
            "a",
            step_fn(|_, _| async { Ok(StepResponse::Completed(json!(1))) }),
        );
        let orchestrator = orchestrator(definition).await;

        let result = orchestrator
            .run(RunRequest::new("discard", json!({})).transaction_id("tx-1"))
            .await
            .unwrap();

        assert!(result.is_done());
        let stored = orchestrator
            .get_transaction(&"discard".into(), &"tx-1".into())
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_signal_for_non_dormant_step_is_rejected() {
        let definition = single_step(StepDefinition::new("a")).step(
            "a",
            step_fn(|_, _| async { Ok(StepResponse::Completed(json!(1))) }),
        );
        let orchestrator = orchestrator(definition).await;
        orchestrator
            .run(RunRequest::new("single", json!({})).transaction_id("tx-1"))
            .await
            .unwrap();

        let err = orchestrator
            .set_step_success(&"single".into(), &"tx-1".into(), "a", json!(2))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));

        let err = orchestrator
            .set_step_success(&"single".into(), &"tx-1".into(), "zzz", json!(2))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownStep { .. }));
    }
}
