//! Saga error types.

use common::AggregateId;
use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

use crate::services::{BusError, LedgerError};
use crate::state::SagaState;

/// Errors that can occur during saga operations.
///
/// Ledger failures inside a saga are compensated, not returned; `Ledger`
/// only surfaces from direct adapter calls such as startup connection.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: SagaState },

    /// The saga log references an entity that no longer exists.
    #[error("Saga {saga_id} is missing its {field}")]
    IncompleteLog {
        saga_id: AggregateId,
        field: &'static str,
    },

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Message bus error.
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true for errors a redelivery may resolve.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::Domain(e) => e.is_conflict(),
            SagaError::EventStore(e) => e.is_conflict(),
            SagaError::Ledger(_) | SagaError::Bus(BusError::Closed) => true,
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
