//! Payment state machine.

use serde::{Deserialize, Serialize};

/// The status of a payment.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──┬──► Cancelled
///    │               └──► Failed
///    ├──────────────────► Cancelled
///    └──────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    #[default]
    Pending,
    Paid,
    Cancelled,
    Failed,
}

impl PaymentState {
    /// Returns true if payment details can still be edited.
    pub fn can_update(&self) -> bool {
        matches!(self, PaymentState::Pending)
    }

    pub fn can_confirm(&self) -> bool {
        matches!(self, PaymentState::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, PaymentState::Pending | PaymentState::Paid)
    }

    pub fn can_fail(&self) -> bool {
        matches!(self, PaymentState::Pending | PaymentState::Paid)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Cancelled | PaymentState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "PENDING",
            PaymentState::Paid => "PAID",
            PaymentState::Cancelled => "CANCELLED",
            PaymentState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
