//! Step definitions: the immutable nodes of a workflow graph.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::Backoff;

/// Declarative description of a single workflow step.
///
/// Definitions carry no behavior; the handler that runs a step is bound
/// separately by step id when the workflow is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique id within the workflow.
    pub id: String,

    /// Ids of the steps that may start once this one has completed.
    #[serde(default)]
    pub next: Vec<String>,

    /// Number of retries after the first failed attempt. `None` means no retry.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Base delay between retries.
    #[serde(default)]
    pub retry_interval_seconds: Option<u64>,

    /// Maximum time the step may spend invoking or dormant.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub backoff: Backoff,

    /// Whether the step output is exposed to downstream steps and the result.
    #[serde(default = "default_true")]
    pub save_response: bool,

    /// Whether the invoke handler may suspend and complete out of band.
    #[serde(default)]
    pub async_step: bool,

    /// Whether a `when` predicate decides if the step runs.
    #[serde(default)]
    pub conditional: bool,

    /// The step has no side effects to undo.
    #[serde(default)]
    pub no_compensation: bool,

    /// A permanent failure is recorded but downstream steps still run.
    #[serde(default)]
    pub continue_on_permanent_failure: bool,

    /// A permanent failure skips this step and all of its descendants.
    #[serde(default)]
    pub skip_on_permanent_failure: bool,

    /// The step is a named hook whose handler is supplied externally.
    #[serde(default)]
    pub hook: bool,
}

fn default_true() -> bool {
    true
}

impl StepDefinition {
    /// Creates a definition with default policies.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: Vec::new(),
            max_retries: None,
            retry_interval_seconds: None,
            timeout_seconds: None,
            backoff: Backoff::Fixed,
            save_response: true,
            async_step: false,
            conditional: false,
            no_compensation: false,
            continue_on_permanent_failure: false,
            skip_on_permanent_failure: false,
            hook: false,
        }
    }

    /// Creates a hook placeholder step.
    pub fn hook(id: impl Into<String>) -> Self {
        Self {
            hook: true,
            ..Self::new(id)
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn retry_interval_seconds(mut self, seconds: u64) -> Self {
        self.retry_interval_seconds = Some(seconds);
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn save_response(mut self, save: bool) -> Self {
        self.save_response = save;
        self
    }

    /// Marks the step as asynchronous.
    pub fn async_step(mut self) -> Self {
        self.async_step = true;
        self
    }

    /// Marks the step as conditional on a `when` predicate.
    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    pub fn no_compensation(mut self) -> Self {
        self.no_compensation = true;
        self
    }

    pub fn continue_on_permanent_failure(mut self) -> Self {
        self.continue_on_permanent_failure = true;
        self
    }

    pub fn skip_on_permanent_failure(mut self) -> Self {
        self.skip_on_permanent_failure = true;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` attempts.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries.unwrap_or(0)
    }

    /// Delay before the retry following the given failed attempt.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .delay(self.retry_interval_seconds.unwrap_or(0), attempt)
    }

    /// The step timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Returns true if a permanent failure of this step triggers compensation.
    pub fn fails_transaction(&self) -> bool {
        !self.continue_on_permanent_failure && !self.skip_on_permanent_failure
    }
}
