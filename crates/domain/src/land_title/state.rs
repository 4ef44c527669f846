//! Land title state machine.

use serde::{Deserialize, Serialize};

/// The status of a land title.
///
/// State transitions:
/// ```text
///            activate / reactivate
/// Pending ─────────────────────────► Active ──► Cancelled (retire)
///    ▲                                  │
///    └──── cancel / revert to pending ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TitleState {
    /// Registered, waiting for a confirmed payment and a ledger write.
    #[default]
    Pending,

    /// Recorded on the ledger.
    Active,

    /// Retired from the register (terminal state).
    Cancelled,
}

impl TitleState {
    /// Returns true if a ledger hash can activate the title.
    pub fn can_activate(&self) -> bool {
        matches!(self, TitleState::Pending)
    }

    /// Returns true if an in-flight transaction can be rolled back.
    pub fn can_revert(&self) -> bool {
        matches!(self, TitleState::Active)
    }

    /// Returns true if the title can be cancelled back to pending.
    pub fn can_cancel(&self) -> bool {
        matches!(self, TitleState::Active)
    }

    /// Returns true if the title can be reactivated after a cancellation.
    pub fn can_reactivate(&self) -> bool {
        matches!(self, TitleState::Pending)
    }

    /// Returns true if ownership can change hands.
    pub fn can_transfer(&self) -> bool {
        matches!(self, TitleState::Active)
    }

    /// Returns true if the title can be retired.
    pub fn can_retire(&self) -> bool {
        matches!(self, TitleState::Active)
    }

    /// Returns the state name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TitleState::Pending => "PENDING",
            TitleState::Active => "ACTIVE",
            TitleState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TitleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
