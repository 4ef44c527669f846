//! Transfer state machine.

use serde::{Deserialize, Serialize};

/// The status of an ownership transfer.
///
/// ```text
/// Pending ──► Completed (immutable)
///    └──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    #[default]
    Pending,
    Completed,
    Cancelled,
}

impl TransferState {
    pub fn can_update(&self) -> bool {
        matches!(self, TransferState::Pending)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, TransferState::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, TransferState::Pending)
    }

    /// Completed transfers can never change again.
    pub fn is_immutable(&self) -> bool {
        matches!(self, TransferState::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Pending => "PENDING",
            TransferState::Completed => "COMPLETED",
            TransferState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
