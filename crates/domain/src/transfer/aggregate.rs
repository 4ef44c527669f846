//! Transfer aggregate implementation.

use chrono::Utc;
use common::{AggregateId, TransactionId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::land_title::{OwnerDetails, TitleState};

use super::{
    TransferError, TransferEvent, TransferState,
    events::{TransferCreatedData, TransferUpdatedData},
};

/// Transfer aggregate root.
#[derive(Debug, Clone, Default)]
pub struct Transfer {
    id: Option<AggregateId>,
    version: Version,
    land_title_id: Option<AggregateId>,
    title_number: String,
    from_owner: OwnerDetails,
    buyer: OwnerDetails,
    state: TransferState,
    transaction_id: Option<TransactionId>,
    cancellation_reason: Option<String>,
}

impl Aggregate for Transfer {
    type Event = TransferEvent;
    type Error = TransferError;

    fn aggregate_type() -> &'static str {
        "Transfer"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            TransferEvent::TransferCreated(data) => {
                self.id = Some(data.transfer_id);
                self.land_title_id = Some(data.land_title_id);
                self.title_number = data.title_number;
                self.from_owner = data.from_owner;
                self.buyer = data.buyer;
                self.state = TransferState::Pending;
            }
            TransferEvent::TransferUpdated(data) => self.buyer = data.buyer,
            TransferEvent::TransferCompleted(data) => {
                self.state = TransferState::Completed;
                self.transaction_id = Some(data.transaction_id);
            }
            TransferEvent::TransferCancelled(data) => {
                self.state = TransferState::Cancelled;
                self.cancellation_reason = data.reason;
            }
        }
    }
}

// Query methods
impl Transfer {
    pub fn land_title_id(&self) -> Option<AggregateId> {
        self.land_title_id
    }

    pub fn title_number(&self) -> &str {
        &self.title_number
    }

    /// Seller snapshot taken when the transfer was opened.
    pub fn from_owner(&self) -> &OwnerDetails {
        &self.from_owner
    }

    pub fn buyer(&self) -> &OwnerDetails {
        &self.buyer
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    fn immutable(&self) -> TransferError {
        TransferError::ImmutableRecord {
            transfer_id: self.id.unwrap_or_default(),
        }
    }
}

fn validate_buyer(buyer: &OwnerDetails) -> Result<(), TransferError> {
    if buyer.name.trim().is_empty() {
        return Err(TransferError::Validation {
            missing: vec!["buyer_name"],
        });
    }
    Ok(())
}

// Command methods (return events)
impl Transfer {
    /// Opens a transfer. The referenced title must be ACTIVE right now.
    pub fn create(
        &self,
        transfer_id: AggregateId,
        land_title_id: AggregateId,
        title_number: &str,
        title_state: TitleState,
        from_owner: &OwnerDetails,
        buyer: &OwnerDetails,
    ) -> Result<Vec<TransferEvent>, TransferError> {
        if self.id.is_some() {
            return Err(TransferError::AlreadyCreated);
        }

        if title_state != TitleState::Active {
            return Err(TransferError::InvalidTitleState { state: title_state });
        }

        validate_buyer(buyer)?;

        Ok(vec![TransferEvent::TransferCreated(TransferCreatedData {
            transfer_id,
            land_title_id,
            title_number: title_number.to_string(),
            from_owner: from_owner.clone(),
            buyer: buyer.clone(),
            created_at: Utc::now(),
        })])
    }

    /// Replaces the buyer details.
    pub fn update(&self, buyer: &OwnerDetails) -> Result<Vec<TransferEvent>, TransferError> {
        if self.state.is_immutable() {
            return Err(self.immutable());
        }
        if !self.state.can_update() {
            return Err(TransferError::InvalidTransition {
                current_state: self.state,
                action: "update",
            });
        }

        validate_buyer(buyer)?;

        if buyer == &self.buyer {
            return Ok(vec![]);
        }

        Ok(vec![TransferEvent::TransferUpdated(TransferUpdatedData {
            buyer: buyer.clone(),
            updated_at: Utc::now(),
        })])
    }

    /// Cancels an open transfer. Cancelling twice is a no-op.
    pub fn cancel(&self, reason: Option<String>) -> Result<Vec<TransferEvent>, TransferError> {
        if self.state.is_immutable() {
            return Err(self.immutable());
        }
        if self.state == TransferState::Cancelled {
            return Ok(vec![]);
        }

        Ok(vec![TransferEvent::transfer_cancelled(reason)])
    }

    /// Completes the transfer under the fee payment's transaction.
    pub fn complete(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<TransferEvent>, TransferError> {
        if self.state.is_immutable() {
            return Err(self.immutable());
        }
        if !self.state.can_complete() {
            return Err(TransferError::InvalidTransition {
                current_state: self.state,
                action: "complete",
            });
        }

        Ok(vec![TransferEvent::transfer_completed(transaction_id.clone())])
    }
}
