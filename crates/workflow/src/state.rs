//! Transaction flow state machine.

use serde::{Deserialize, Serialize};

/// The flow state of a distributed transaction.
///
/// State transitions:
/// ```text
/// NotStarted ──► Invoking ──┬──► Done ─────────────────────────────┐ (cancel)
///                           └──► WaitingToCompensate ◄─────────────┘
///                                        │
///                                        ▼
///                                  Compensating ──┬──► Reverted
///                                                 └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FlowState {
    /// The transaction has been created but no step has run.
    #[default]
    NotStarted,

    /// Steps are being invoked, or async steps are dormant.
    Invoking,

    /// A step failed permanently; in-flight invocations are draining.
    WaitingToCompensate,

    /// Completed steps are being compensated in reverse order.
    Compensating,

    /// Every reachable step completed (terminal state).
    Done,

    /// Compensation left side effects behind (terminal state).
    Failed,

    /// Every completed step was compensated (terminal state).
    Reverted,
}

impl FlowState {
    /// Returns true if steps may be dispatched in this state.
    pub fn can_invoke(&self) -> bool {
        matches!(self, FlowState::NotStarted | FlowState::Invoking)
    }

    /// Returns true if compensation may be requested from this state.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            FlowState::NotStarted | FlowState::Invoking | FlowState::Done
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Done | FlowState::Failed | FlowState::Reverted
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::NotStarted => "not_started",
            FlowState::Invoking => "invoking",
            FlowState::WaitingToCompensate => "waiting_to_compensate",
            FlowState::Compensating => "compensating",
            FlowState::Done => "done",
            FlowState::Failed => "failed",
            FlowState::Reverted => "reverted",
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
