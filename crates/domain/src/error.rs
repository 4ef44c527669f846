//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::land_title::LandTitleError;
use crate::payment::PaymentError;
use crate::transfer::TransferError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A land title transition was rejected.
    #[error("Land title error: {0}")]
    LandTitle(#[from] LandTitleError),

    /// A payment transition was rejected.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// A transfer transition was rejected.
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true when a competing writer or a unique index rejected the write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
