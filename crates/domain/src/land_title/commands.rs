//! Land title commands.

use common::{AggregateId, TransactionId};

use crate::command::Command;

use super::{DocumentRef, LandTitle, OwnerDetails, RevertReason};

/// Command to register a new land title.
#[derive(Debug, Clone)]
pub struct RegisterTitle {
    pub title_id: AggregateId,
    pub title_number: String,
    pub owner: OwnerDetails,
    pub property_location: String,
    pub documents: Vec<DocumentRef>,
    /// Generated when not supplied.
    pub transaction_id: Option<TransactionId>,
}

impl RegisterTitle {
    /// Creates a registration with a generated title ID and no documents yet.
    pub fn new(
        title_number: impl Into<String>,
        owner: OwnerDetails,
        property_location: impl Into<String>,
    ) -> Self {
        Self {
            title_id: AggregateId::new(),
            title_number: title_number.into(),
            owner,
            property_location: property_location.into(),
            documents: Vec::new(),
            transaction_id: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<DocumentRef>) -> Self {
        self.documents.push(document.into());
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<TransactionId>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

impl Command for RegisterTitle {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to activate a title after a successful ledger write.
#[derive(Debug, Clone)]
pub struct ActivateTitle {
    pub title_id: AggregateId,
    pub transaction_id: TransactionId,
    pub blockchain_hash: String,
}

impl ActivateTitle {
    pub fn new(
        title_id: AggregateId,
        transaction_id: TransactionId,
        blockchain_hash: impl Into<String>,
    ) -> Self {
        Self {
            title_id,
            transaction_id,
            blockchain_hash: blockchain_hash.into(),
        }
    }
}

impl Command for ActivateTitle {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to roll a title back to PENDING.
#[derive(Debug, Clone)]
pub struct RevertTitleToPending {
    pub title_id: AggregateId,
    pub transaction_id: TransactionId,
    pub reason: RevertReason,
}

impl RevertTitleToPending {
    pub fn new(title_id: AggregateId, transaction_id: TransactionId, reason: RevertReason) -> Self {
        Self {
            title_id,
            transaction_id,
            reason,
        }
    }
}

impl Command for RevertTitleToPending {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to cancel an active title.
#[derive(Debug, Clone)]
pub struct CancelTitle {
    pub title_id: AggregateId,
    pub transaction_id: TransactionId,
    pub cancellation_hash: String,
}

impl CancelTitle {
    pub fn new(
        title_id: AggregateId,
        transaction_id: TransactionId,
        cancellation_hash: impl Into<String>,
    ) -> Self {
        Self {
            title_id,
            transaction_id,
            cancellation_hash: cancellation_hash.into(),
        }
    }
}

impl Command for CancelTitle {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to reactivate a cancelled title.
#[derive(Debug, Clone)]
pub struct ReactivateTitle {
    pub title_id: AggregateId,
    pub transaction_id: TransactionId,
    pub reactivation_hash: String,
}

impl ReactivateTitle {
    pub fn new(
        title_id: AggregateId,
        transaction_id: TransactionId,
        reactivation_hash: impl Into<String>,
    ) -> Self {
        Self {
            title_id,
            transaction_id,
            reactivation_hash: reactivation_hash.into(),
        }
    }
}

impl Command for ReactivateTitle {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to hand a title to a buyer.
#[derive(Debug, Clone)]
pub struct TransferOwnership {
    pub title_id: AggregateId,
    pub transfer_id: AggregateId,
    pub transaction_id: TransactionId,
    pub buyer: OwnerDetails,
    pub seller_hash: String,
    pub buyer_hash: String,
}

impl Command for TransferOwnership {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to undo the ownership change of a failed transfer.
#[derive(Debug, Clone)]
pub struct RevertOwnership {
    pub title_id: AggregateId,
    pub transaction_id: TransactionId,
}

impl RevertOwnership {
    pub fn new(title_id: AggregateId, transaction_id: TransactionId) -> Self {
        Self {
            title_id,
            transaction_id,
        }
    }
}

impl Command for RevertOwnership {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

/// Command to retire a title from the register.
#[derive(Debug, Clone)]
pub struct RetireTitle {
    pub title_id: AggregateId,
    pub reason: String,
}

impl RetireTitle {
    pub fn new(title_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            title_id,
            reason: reason.into(),
        }
    }
}

impl Command for RetireTitle {
    type Aggregate = LandTitle;

    fn aggregate_id(&self) -> AggregateId {
        self.title_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builder_collects_documents() {
        let cmd = RegisterTitle::new("TCT-2024-001", OwnerDetails::named("Maria"), "Lot 4")
            .with_document("deed.pdf")
            .with_document("tax-declaration.pdf")
            .with_transaction_id("TXN-1");

        assert_eq!(cmd.documents.len(), 2);
        assert_eq!(cmd.transaction_id, Some(TransactionId::new("TXN-1")));
        assert_eq!(cmd.aggregate_id(), cmd.title_id);
    }
}
