//! Land title domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{DocumentRef, OwnerDetails, RevertReason};

/// Events that can occur on a land title.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LandTitleEvent {
    /// Title was registered and is waiting for payment.
    TitleRegistered(TitleRegisteredData),

    /// A ledger write succeeded and the title went live.
    TitleActivated(TitleActivatedData),

    /// An in-flight transaction was rolled back.
    TitleRevertedToPending(TitleRevertedData),

    /// Title was cancelled back to pending.
    TitleCancelled(TitleCancelledData),

    /// A cancelled title was reactivated.
    TitleReactivated(TitleReactivatedData),

    /// Ownership moved from seller to buyer.
    OwnershipTransferred(OwnershipTransferredData),

    /// A failed transfer's ownership change was undone.
    OwnershipReverted(OwnershipRevertedData),

    /// Title was retired from the register.
    TitleRetired(TitleRetiredData),
}

impl DomainEvent for LandTitleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LandTitleEvent::TitleRegistered(_) => "TitleRegistered",
            LandTitleEvent::TitleActivated(_) => "TitleActivated",
            LandTitleEvent::TitleRevertedToPending(_) => "TitleRevertedToPending",
            LandTitleEvent::TitleCancelled(_) => "TitleCancelled",
            LandTitleEvent::TitleReactivated(_) => "TitleReactivated",
            LandTitleEvent::OwnershipTransferred(_) => "OwnershipTransferred",
            LandTitleEvent::OwnershipReverted(_) => "OwnershipReverted",
            LandTitleEvent::TitleRetired(_) => "TitleRetired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleRegisteredData {
    pub title_id: AggregateId,
    pub title_number: String,
    pub owner: OwnerDetails,
    pub property_location: String,
    pub documents: Vec<DocumentRef>,
    pub transaction_id: TransactionId,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleActivatedData {
    pub transaction_id: TransactionId,
    pub blockchain_hash: String,
    /// Hash that was current before this activation, if any.
    pub previous_hash: Option<String>,
    pub activated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleRevertedData {
    pub transaction_id: TransactionId,
    pub reason: RevertReason,
    /// True when the failed transaction produced the current hash.
    pub hash_rolled_back: bool,
    /// The hash in force after the revert.
    pub restored_hash: Option<String>,
    pub reverted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleCancelledData {
    pub transaction_id: TransactionId,
    pub cancellation_hash: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleReactivatedData {
    pub transaction_id: TransactionId,
    pub reactivation_hash: String,
    pub reactivated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipTransferredData {
    pub transfer_id: AggregateId,
    pub transaction_id: TransactionId,
    pub new_owner: OwnerDetails,
    pub previous_owner: OwnerDetails,
    pub seller_hash: String,
    pub buyer_hash: String,
    pub previous_seller_hash: Option<String>,
    pub previous_buyer_hash: Option<String>,
    pub transferred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipRevertedData {
    pub transfer_id: AggregateId,
    pub transaction_id: TransactionId,
    pub restored_owner: OwnerDetails,
    pub restored_seller_hash: Option<String>,
    pub restored_buyer_hash: Option<String>,
    pub reverted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleRetiredData {
    pub reason: String,
    pub retired_at: DateTime<Utc>,
}

impl LandTitleEvent {
    pub fn title_registered(
        title_id: AggregateId,
        title_number: String,
        owner: OwnerDetails,
        property_location: String,
        documents: Vec<DocumentRef>,
        transaction_id: TransactionId,
    ) -> Self {
        LandTitleEvent::TitleRegistered(TitleRegisteredData {
            title_id,
            title_number,
            owner,
            property_location,
            documents,
            transaction_id,
            registered_at: Utc::now(),
        })
    }

    pub fn title_activated(
        transaction_id: TransactionId,
        blockchain_hash: String,
        previous_hash: Option<String>,
    ) -> Self {
        LandTitleEvent::TitleActivated(TitleActivatedData {
            transaction_id,
            blockchain_hash,
            previous_hash,
            activated_at: Utc::now(),
        })
    }

    pub fn title_reverted(
        transaction_id: TransactionId,
        reason: RevertReason,
        hash_rolled_back: bool,
        restored_hash: Option<String>,
    ) -> Self {
        LandTitleEvent::TitleRevertedToPending(TitleRevertedData {
            transaction_id,
            reason,
            hash_rolled_back,
            restored_hash,
            reverted_at: Utc::now(),
        })
    }

    pub fn title_cancelled(transaction_id: TransactionId, cancellation_hash: String) -> Self {
        LandTitleEvent::TitleCancelled(TitleCancelledData {
            transaction_id,
            cancellation_hash,
            cancelled_at: Utc::now(),
        })
    }

    pub fn title_reactivated(transaction_id: TransactionId, reactivation_hash: String) -> Self {
        LandTitleEvent::TitleReactivated(TitleReactivatedData {
            transaction_id,
            reactivation_hash,
            reactivated_at: Utc::now(),
        })
    }

    pub fn title_retired(reason: impl Into<String>) -> Self {
        LandTitleEvent::TitleRetired(TitleRetiredData {
            reason: reason.into(),
            retired_at: Utc::now(),
        })
    }
}
