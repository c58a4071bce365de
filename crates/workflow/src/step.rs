//! Runtime state of one step within a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a step's invoke or compensate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepState {
    #[default]
    NotStarted,
    Invoking,
    Done,
    Failed,
    Compensating,
    Reverted,
    /// Skipped by its condition or because an ancestor was skipped.
    Skipped,
    /// Failed permanently with `skip_on_permanent_failure` set.
    SkippedFailure,
    /// Async step waiting for an out-of-band completion signal.
    Dormant,
}

impl StepState {
    /// Returns true if the action will not change state again on its own.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            StepState::Done
                | StepState::Failed
                | StepState::Reverted
                | StepState::Skipped
                | StepState::SkippedFailure
        )
    }

    /// Returns true if children may treat this step as satisfied.
    pub fn unblocks_children(&self) -> bool {
        matches!(self, StepState::Done | StepState::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::NotStarted => "not_started",
            StepState::Invoking => "invoking",
            StepState::Done => "done",
            StepState::Failed => "failed",
            StepState::Compensating => "compensating",
            StepState::Reverted => "reverted",
            StepState::Skipped => "skipped",
            StepState::SkippedFailure => "skipped_failure",
            StepState::Dormant => "dormant",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which handler of a step produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    Invoke,
    Compensate,
}

impl HandlerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerType::Invoke => "invoke",
            HandlerType::Compensate => "compensate",
        }
    }
}

impl std::fmt::Display for HandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The last error captured for a step action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepErrorRecord {
    pub message: String,
    pub handler_type: HandlerType,
    /// The handler asked for no further retries.
    #[serde(default)]
    pub permanent: bool,
    /// The attempt exceeded the step timeout.
    #[serde(default)]
    pub timed_out: bool,
    pub at: DateTime<Utc>,
}

impl StepErrorRecord {
    pub fn invoke(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            handler_type: HandlerType::Invoke,
            permanent: false,
            timed_out: false,
            at,
        }
    }

    pub fn compensate(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            handler_type: HandlerType::Compensate,
            permanent: false,
            timed_out: false,
            at,
        }
    }

    /// Marks the error as permanent.
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Marks the error as a timeout.
    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }
}

/// Runtime state of one step definition for one transaction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStep {
    pub step_id: String,
    pub invoke: StepState,
    pub compensate: StepState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may start, when a retry is pending.
    pub retry_at: Option<DateTime<Utc>>,
    /// Time after which an invoking or dormant attempt is timed out.
    pub deadline: Option<DateTime<Utc>>,
    /// The invoke action reached `Done` at least once.
    pub invoked_once: bool,
    /// Output of the successful invocation, kept for compensation.
    pub output: Option<serde_json::Value>,
    pub error: Option<StepErrorRecord>,
    pub compensation_error: Option<StepErrorRecord>,
}

impl TransactionStep {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            invoke: StepState::NotStarted,
            compensate: StepState::NotStarted,
            attempts: 0,
            started_at: None,
            last_attempt_at: None,
            completed_at: None,
            retry_at: None,
            deadline: None,
            invoked_once: false,
            output: None,
            error: None,
            compensation_error: None,
        }
    }

    /// Returns true if this step has something to compensate.
    ///
    /// A compensation interrupted mid-flight is run again.
    pub fn needs_compensation(&self) -> bool {
        self.invoked_once
            && matches!(
                self.compensate,
                StepState::NotStarted | StepState::Compensating
            )
    }

    /// Returns true if an attempt is in flight or awaiting a signal.
    pub fn is_active(&self) -> bool {
        matches!(self.invoke, StepState::Invoking | StepState::Dormant)
    }
}
