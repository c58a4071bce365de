//! The workflow engine: registry, orchestrator and background timers.

use std::sync::Arc;
use std::time::Duration;

use common::{TransactionId, WorkflowId};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use transaction_store::TransactionStore;
use workflow::DistributedTransaction;

use crate::clock::{Clock, SystemClock};
use crate::context::ServiceResolver;
use crate::definition::WorkflowDefinition;
use crate::error::Result;
use crate::handler::{StepError, StepHandler};
use crate::manager::WorkflowManager;
use crate::orchestrator::TransactionOrchestrator;
use crate::run::{RunRequest, RunResult};
use crate::scheduler::{FireFn, Scheduler};

/// Entry point for applications.
///
/// Registering a workflow with a schedule starts its timer; unregistering
/// stops it.
pub struct WorkflowEngine<S> {
    manager: Arc<WorkflowManager>,
    orchestrator: Arc<TransactionOrchestrator<S>>,
    scheduler: Scheduler,
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder<S> {
    store: S,
    clock: Option<Arc<dyn Clock>>,
    services: Option<ServiceResolver>,
}

impl<S: TransactionStore + 'static> WorkflowEngineBuilder<S> {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn services(mut self, services: ServiceResolver) -> Self {
        self.services = Some(services);
        self
    }

    pub fn build(self) -> WorkflowEngine<S> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let manager = Arc::new(WorkflowManager::new());
        let orchestrator = TransactionOrchestrator::new(self.store, manager.clone())
            .with_clock(clock.clone())
            .with_services(self.services.unwrap_or_default());

        WorkflowEngine {
            manager,
            orchestrator: Arc::new(orchestrator),
            scheduler: Scheduler::new(clock),
        }
    }
}

impl<S: TransactionStore + 'static> WorkflowEngine<S> {
    /// Creates an engine on the system clock with no services.
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: S) -> WorkflowEngineBuilder<S> {
        WorkflowEngineBuilder {
            store,
            clock: None,
            services: None,
        }
    }

    pub fn manager(&self) -> &Arc<WorkflowManager> {
        &self.manager
    }

    pub fn orchestrator(&self) -> &Arc<TransactionOrchestrator<S>> {
        &self.orchestrator
    }

    pub fn services(&self) -> &ServiceResolver {
        self.orchestrator.services()
    }

    pub async fn register(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let registered = self.manager.register(definition).await?;
        self.sync_schedule(&registered);
        Ok(registered)
    }

    pub async fn update(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let updated = self.manager.update(definition).await?;
        self.sync_schedule(&updated);
        Ok(updated)
    }

    pub async fn unregister(&self, workflow_id: &WorkflowId) -> bool {
        self.scheduler.unschedule(workflow_id);
        self.manager.unregister(workflow_id).await
    }

    pub async fn unregister_all(&self) {
        self.scheduler.unschedule_all();
        self.manager.unregister_all().await;
    }

    pub async fn register_hook<H: StepHandler + 'static>(
        &self,
        workflow_id: &WorkflowId,
        hook: &str,
        handler: H,
    ) -> Result<()> {
        self.manager.register_hook(workflow_id, hook, handler).await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowId> {
        self.manager.list().await
    }

    /// Returns true if the workflow has a live schedule timer.
    pub fn is_scheduled(&self, workflow_id: &WorkflowId) -> bool {
        self.scheduler.is_scheduled(workflow_id)
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        self.orchestrator.run(request).await
    }

    pub async fn set_step_success(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
        step_id: &str,
        response: Value,
    ) -> Result<RunResult> {
        self.orchestrator
            .set_step_success(workflow_id, transaction_id, step_id, response)
            .await
    }

    pub async fn set_step_failure(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
        step_id: &str,
        error: StepError,
    ) -> Result<RunResult> {
        self.orchestrator
            .set_step_failure(workflow_id, transaction_id, step_id, error)
            .await
    }

    pub async fn resume(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<RunResult> {
        self.orchestrator.resume(workflow_id, transaction_id).await
    }

    pub async fn cancel(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<RunResult> {
        self.orchestrator.cancel(workflow_id, transaction_id).await
    }

    pub async fn get_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<DistributedTransaction>> {
        self.orchestrator
            .get_transaction(workflow_id, transaction_id)
            .await
    }

    pub async fn expire_overdue(&self) -> Result<usize> {
        self.orchestrator.expire_overdue().await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.orchestrator.purge_expired().await
    }

    /// Starts a task that periodically expires overdue async steps, runs
    /// retries that signals left scheduled and purges finished transactions
    /// whose retention elapsed.
    pub fn spawn_timeout_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match orchestrator.expire_overdue().await {
                    Ok(0) => {}
                    Ok(expired) => tracing::info!(expired, "expired overdue async steps"),
                    Err(err) => tracing::error!(error = %err, "timeout sweep failed"),
                }
                if let Err(err) = orchestrator.purge_expired().await {
                    tracing::error!(error = %err, "purging expired transactions failed");
                }
            }
        })
    }

    fn sync_schedule(&self, definition: &WorkflowDefinition) {
        match &definition.options.schedule {
            Some(schedule) => {
                self.scheduler
                    .schedule(definition.id.clone(), schedule.clone(), self.fire_fn());
            }
            None => {
                self.scheduler.unschedule(&definition.id);
            }
        }
    }

    fn fire_fn(&self) -> FireFn {
        let orchestrator = self.orchestrator.clone();
        Arc::new(move |workflow_id, input| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                match orchestrator
                    .run(RunRequest::new(workflow_id.clone(), input))
                    .await
                {
                    Ok(result) => tracing::info!(
                        workflow_id = %workflow_id,
                        transaction_id = %result.transaction_id(),
                        state = %result.state(),
                        "scheduled run finished"
                    ),
                    Err(err) => tracing::error!(
                        workflow_id = %workflow_id,
                        error = %err,
                        "scheduled run failed"
                    ),
                }
            })
        })
    }
}
