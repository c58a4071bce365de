//! Timers for scheduled workflows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::WorkflowId;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::schedule::WorkflowSchedule;

/// Starts a run of a scheduled workflow with the given input.
pub type FireFn = Arc<dyn Fn(WorkflowId, Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Keeps one timer task per scheduled workflow.
///
/// Each fire is independent: a failed run never stops the timer.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    tasks: Mutex<HashMap<WorkflowId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the timer of a workflow.
    pub fn schedule(&self, workflow_id: WorkflowId, schedule: WorkflowSchedule, fire: FireFn) {
        let clock = self.clock.clone();
        let id = workflow_id.clone();

        let handle = tokio::spawn(async move {
            let mut runs = 0u32;
            let mut last = None;
            // Sleep on the runtime clock, measured from a fixed anchor
            let anchor = (tokio::time::Instant::now(), clock.now());

            loop {
                if schedule.max_runs.is_some_and(|max| runs >= max) {
                    break;
                }

                let now = clock.now();
                let after = match last {
                    Some(last) if last > now => last,
                    _ => now,
                };
                let Some(next) = schedule.schedule.next_after(after) else {
                    tracing::debug!(workflow_id = %id, "schedule exhausted");
                    break;
                };

                let offset = (next - anchor.1).to_std().unwrap_or_default();
                tokio::time::sleep_until(anchor.0 + offset).await;
                last = Some(next);

                metrics::counter!("workflow_scheduled_runs_total").increment(1);
                tracing::info!(workflow_id = %id, run = runs + 1, "scheduled run firing");
                fire(id.clone(), schedule.input.clone()).await;
                runs += 1;
            }
        });

        if let Some(previous) = self.tasks().insert(workflow_id, handle) {
            previous.abort();
        }
    }

    /// Stops the timer of a workflow. Returns false if it had none.
    pub fn unschedule(&self, workflow_id: &WorkflowId) -> bool {
        match self.tasks().remove(workflow_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stops every timer.
    pub fn unschedule_all(&self) {
        for (_, handle) in self.tasks().drain() {
            handle.abort();
        }
    }

    /// Returns true if the workflow has a live timer.
    pub fn is_scheduled(&self, workflow_id: &WorkflowId) -> bool {
        self.tasks()
            .get(workflow_id)
            .is_some_and(|h| !h.is_finished())
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<WorkflowId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.unschedule_all();
    }
}
