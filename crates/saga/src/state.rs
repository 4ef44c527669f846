//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga instance, tracked per transaction.
///
/// State transitions:
/// ```text
/// NotStarted ──► Initiated ──► LedgerPending ──┬──► Committed
///                    │                         └──► Compensating ──► Compensated
///                    └──────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Saga has not been started yet.
    #[default]
    NotStarted,
    /// Saga accepted the message and recorded its intent.
    Initiated,
    /// Ledger writes are in flight.
    LedgerPending,
    /// All steps succeeded.
    Committed,
    /// Rolling back after a ledger failure.
    Compensating,
    /// Compensation finished.
    Compensated,
}

impl SagaState {
    /// Returns true if ledger writes may be issued.
    pub fn can_write_ledger(&self) -> bool {
        matches!(self, SagaState::Initiated | SagaState::LedgerPending)
    }

    /// Returns true if compensation can begin (or continue) from this state.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaState::Initiated | SagaState::LedgerPending | SagaState::Compensating
        )
    }

    /// Returns true if the saga was interrupted before reaching a terminal state.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SagaState::Initiated | SagaState::LedgerPending | SagaState::Compensating
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::Compensated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NOT_STARTED",
            SagaState::Initiated => "INITIATED",
            SagaState::LedgerPending => "LEDGER_PENDING",
            SagaState::Committed => "COMMITTED",
            SagaState::Compensating => "COMPENSATING",
            SagaState::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
