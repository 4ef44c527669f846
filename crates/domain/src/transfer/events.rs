//! Transfer domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::land_title::OwnerDetails;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransferEvent {
    TransferCreated(TransferCreatedData),
    TransferUpdated(TransferUpdatedData),
    TransferCompleted(TransferCompletedData),
    TransferCancelled(TransferCancelledData),
}

impl DomainEvent for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "TransferCreated",
            TransferEvent::TransferUpdated(_) => "TransferUpdated",
            TransferEvent::TransferCompleted(_) => "TransferCompleted",
            TransferEvent::TransferCancelled(_) => "TransferCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCreatedData {
    pub transfer_id: AggregateId,
    pub land_title_id: AggregateId,
    pub title_number: String,
    /// Seller at the time the transfer was opened.
    pub from_owner: OwnerDetails,
    pub buyer: OwnerDetails,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferUpdatedData {
    pub buyer: OwnerDetails,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCompletedData {
    pub transaction_id: TransactionId,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCancelledData {
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn transfer_completed(transaction_id: TransactionId) -> Self {
        TransferEvent::TransferCompleted(TransferCompletedData {
            transaction_id,
            completed_at: Utc::now(),
        })
    }

    pub fn transfer_cancelled(reason: Option<String>) -> Self {
        TransferEvent::TransferCancelled(TransferCancelledData {
            reason,
            cancelled_at: Utc::now(),
        })
    }
}
