//! Transaction events: the only way a distributed transaction changes state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builder::WorkflowGraph;
use crate::step::StepErrorRecord;

/// Events that can occur during a transaction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    /// The run started with a graph snapshot and its input.
    TransactionStarted(TransactionStartedData),

    /// An attempt of a step started.
    StepInvoked(StepInvokedData),

    /// A step completed with an output.
    StepCompleted(StepCompletedData),

    /// An async step suspended waiting for an external signal.
    StepSuspended(StepData),

    /// A failed attempt will be retried.
    StepRetryScheduled(StepRetryData),

    /// A step failed permanently.
    StepFailed(StepFailedData),

    /// A conditional step was skipped.
    StepSkipped(StepData),

    /// Compensation is needed; in-flight invocations drain first.
    CompensationRequested(CompensationRequestedData),

    /// The compensation sweep started.
    CompensationStarted(TimestampData),

    /// A step's compensate handler is running.
    StepCompensating(StepInvokedData),

    /// A step's compensate handler succeeded.
    StepCompensated(StepData),

    /// A step's compensate handler failed (the sweep continues).
    StepCompensationFailed(StepFailedData),

    /// Every reachable step completed.
    TransactionCompleted(TimestampData),

    /// Every completed step was compensated.
    TransactionReverted(TimestampData),

    /// Compensation finished with errors.
    TransactionFailed(TimestampData),

    /// The caller asked to roll the transaction back.
    TransactionCancelled(TimestampData),
}

impl TransactionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionStarted(_) => "TransactionStarted",
            TransactionEvent::StepInvoked(_) => "StepInvoked",
            TransactionEvent::StepCompleted(_) => "StepCompleted",
            TransactionEvent::StepSuspended(_) => "StepSuspended",
            TransactionEvent::StepRetryScheduled(_) => "StepRetryScheduled",
            TransactionEvent::StepFailed(_) => "StepFailed",
            TransactionEvent::StepSkipped(_) => "StepSkipped",
            TransactionEvent::CompensationRequested(_) => "CompensationRequested",
            TransactionEvent::CompensationStarted(_) => "CompensationStarted",
            TransactionEvent::StepCompensating(_) => "StepCompensating",
            TransactionEvent::StepCompensated(_) => "StepCompensated",
            TransactionEvent::StepCompensationFailed(_) => "StepCompensationFailed",
            TransactionEvent::TransactionCompleted(_) => "TransactionCompleted",
            TransactionEvent::TransactionReverted(_) => "TransactionReverted",
            TransactionEvent::TransactionFailed(_) => "TransactionFailed",
            TransactionEvent::TransactionCancelled(_) => "TransactionCancelled",
        }
    }

    /// When the event happened.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            TransactionEvent::TransactionStarted(d) => d.at,
            TransactionEvent::StepInvoked(d) | TransactionEvent::StepCompensating(d) => d.at,
            TransactionEvent::StepCompleted(d) => d.at,
            TransactionEvent::StepSuspended(d)
            | TransactionEvent::StepSkipped(d)
            | TransactionEvent::StepCompensated(d) => d.at,
            TransactionEvent::StepRetryScheduled(d) => d.error.at,
            TransactionEvent::StepFailed(d) | TransactionEvent::StepCompensationFailed(d) => {
                d.error.at
            }
            TransactionEvent::CompensationRequested(d) => d.at,
            TransactionEvent::CompensationStarted(d)
            | TransactionEvent::TransactionCompleted(d)
            | TransactionEvent::TransactionReverted(d)
            | TransactionEvent::TransactionFailed(d)
            | TransactionEvent::TransactionCancelled(d) => d.at,
        }
    }
}

/// Data for TransactionStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStartedData {
    pub graph: WorkflowGraph,
    pub input: Value,
    /// Caller-supplied correlation metadata passed to every step.
    pub metadata: BTreeMap<String, Value>,
    pub at: DateTime<Utc>,
}

/// Data for events that only name a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step_id: String,
    pub at: DateTime<Utc>,
}

/// Data for StepInvoked and StepCompensating events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInvokedData {
    pub step_id: String,
    /// The input handed to the handler.
    pub input: Value,
    pub at: DateTime<Utc>,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_id: String,
    pub output: Value,
    pub at: DateTime<Utc>,
}

/// Data for StepRetryScheduled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRetryData {
    pub step_id: String,
    pub error: StepErrorRecord,
    pub retry_at: DateTime<Utc>,
}

/// Data for StepFailed and StepCompensationFailed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_id: String,
    pub error: StepErrorRecord,
}

/// Data for CompensationRequested event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationRequestedData {
    /// Why compensation was requested (failing step or cancellation).
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Data for events that only carry a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampData {
    pub at: DateTime<Utc>,
}

// Convenience constructors
impl TransactionEvent {
    pub fn transaction_started(
        graph: WorkflowGraph,
        input: Value,
        metadata: BTreeMap<String, Value>,
        at: DateTime<Utc>,
    ) -> Self {
        TransactionEvent::TransactionStarted(TransactionStartedData {
            graph,
            input,
            metadata,
            at,
        })
    }

    pub fn step_invoked(step_id: impl Into<String>, input: Value, at: DateTime<Utc>) -> Self {
        TransactionEvent::StepInvoked(StepInvokedData {
            step_id: step_id.into(),
            input,
            at,
        })
    }

    pub fn step_completed(step_id: impl Into<String>, output: Value, at: DateTime<Utc>) -> Self {
        TransactionEvent::StepCompleted(StepCompletedData {
            step_id: step_id.into(),
            output,
            at,
        })
    }

    pub fn step_suspended(step_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        TransactionEvent::StepSuspended(StepData {
            step_id: step_id.into(),
            at,
        })
    }

    pub fn step_retry_scheduled(
        step_id: impl Into<String>,
        error: StepErrorRecord,
        retry_at: DateTime<Utc>,
    ) -> Self {
        TransactionEvent::StepRetryScheduled(StepRetryData {
            step_id: step_id.into(),
            error,
            retry_at,
        })
    }

    pub fn step_failed(step_id: impl Into<String>, error: StepErrorRecord) -> Self {
        TransactionEvent::StepFailed(StepFailedData {
            step_id: step_id.into(),
            error,
        })
    }

    pub fn step_skipped(step_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        TransactionEvent::StepSkipped(StepData {
            step_id: step_id.into(),
            at,
        })
    }

    pub fn compensation_requested(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        TransactionEvent::CompensationRequested(CompensationRequestedData {
            reason: reason.into(),
            at,
        })
    }

    pub fn compensation_started(at: DateTime<Utc>) -> Self {
        TransactionEvent::CompensationStarted(TimestampData { at })
    }

    pub fn step_compensating(step_id: impl Into<String>, input: Value, at: DateTime<Utc>) -> Self {
        TransactionEvent::StepCompensating(StepInvokedData {
            step_id: step_id.into(),
            input,
            at,
        })
    }

    pub fn step_compensated(step_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        TransactionEvent::StepCompensated(StepData {
            step_id: step_id.into(),
            at,
        })
    }

    pub fn step_compensation_failed(step_id: impl Into<String>, error: StepErrorRecord) -> Self {
        TransactionEvent::StepCompensationFailed(StepFailedData {
            step_id: step_id.into(),
            error,
        })
    }

    pub fn transaction_completed(at: DateTime<Utc>) -> Self {
        TransactionEvent::TransactionCompleted(TimestampData { at })
    }

    pub fn transaction_reverted(at: DateTime<Utc>) -> Self {
        TransactionEvent::TransactionReverted(TimestampData { at })
    }

    pub fn transaction_failed(at: DateTime<Utc>) -> Self {
        TransactionEvent::TransactionFailed(TimestampData { at })
    }

    pub fn transaction_cancelled(at: DateTime<Utc>) -> Self {
        TransactionEvent::TransactionCancelled(TimestampData { at })
    }
}
