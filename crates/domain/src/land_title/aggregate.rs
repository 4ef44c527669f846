//! Land title aggregate implementation.

use common::{AggregateId, TransactionId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    DocumentRef, LandTitleError, LandTitleEvent, OwnerDetails, RevertReason, TitleState,
    events::{
        OwnershipRevertedData, OwnershipTransferredData, TitleActivatedData,
        TitleRegisteredData, TitleRevertedData,
    },
};

/// The most recent ownership change, kept so a failed transfer can be undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipChange {
    pub transfer_id: AggregateId,
    pub transaction_id: TransactionId,
    pub previous_owner: OwnerDetails,
    pub previous_seller_hash: Option<String>,
    pub previous_buyer_hash: Option<String>,
}

/// Land title aggregate root.
#[derive(Debug, Clone, Default)]
pub struct LandTitle {
    id: Option<AggregateId>,
    version: Version,

    title_number: String,
    owner: OwnerDetails,
    property_location: String,
    documents: Vec<DocumentRef>,
    state: TitleState,

    /// Transaction the title was registered under.
    transaction_id: Option<TransactionId>,
    last_transaction_id: Option<TransactionId>,

    blockchain_hash: Option<String>,
    /// Transaction whose ledger write produced `blockchain_hash`.
    hash_transaction_id: Option<TransactionId>,
    previous_hash: Option<String>,
    cancellation_hash: Option<String>,
    reactivation_hash: Option<String>,
    seller_hash: Option<String>,
    buyer_hash: Option<String>,

    last_transfer: Option<OwnershipChange>,
}

impl Aggregate for LandTitle {
    type Event = LandTitleEvent;
    type Error = LandTitleError;

    fn aggregate_type() -> &'static str {
        "LandTitle"
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
            LandTitleEvent::TitleRegistered(data) => self.apply_registered(data),
            LandTitleEvent::TitleActivated(data) => self.apply_activated(data),
            LandTitleEvent::TitleRevertedToPending(data) => self.apply_reverted(data),
            LandTitleEvent::TitleCancelled(data) => {
                self.state = TitleState::Pending;
                self.cancellation_hash = Some(data.cancellation_hash);
                self.last_transaction_id = Some(data.transaction_id);
            }
            LandTitleEvent::TitleReactivated(data) => {
                self.state = TitleState::Active;
                self.reactivation_hash = Some(data.reactivation_hash);
                self.last_transaction_id = Some(data.transaction_id);
            }
            LandTitleEvent::OwnershipTransferred(data) => self.apply_ownership_transferred(data),
            LandTitleEvent::OwnershipReverted(data) => self.apply_ownership_reverted(data),
            LandTitleEvent::TitleRetired(_) => {
                self.state = TitleState::Cancelled;
            }
        }
    }
}

// Query methods
impl LandTitle {
    pub fn title_number(&self) -> &str {
        &self.title_number
    }

    pub fn owner(&self) -> &OwnerDetails {
        &self.owner
    }

    pub fn owner_name(&self) -> &str {
        &self.owner.name
    }

    pub fn property_location(&self) -> &str {
        &self.property_location
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.documents
    }

    pub fn state(&self) -> TitleState {
        self.state
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn last_transaction_id(&self) -> Option<&TransactionId> {
        self.last_transaction_id.as_ref()
    }

    pub fn blockchain_hash(&self) -> Option<&str> {
        self.blockchain_hash.as_deref()
    }

    pub fn cancellation_hash(&self) -> Option<&str> {
        self.cancellation_hash.as_deref()
    }

    pub fn reactivation_hash(&self) -> Option<&str> {
        self.reactivation_hash.as_deref()
    }

    pub fn seller_hash(&self) -> Option<&str> {
        self.seller_hash.as_deref()
    }

    pub fn buyer_hash(&self) -> Option<&str> {
        self.buyer_hash.as_deref()
    }

    pub fn last_transfer(&self) -> Option<&OwnershipChange> {
        self.last_transfer.as_ref()
    }

    /// Returns true if the title is live under the given transaction.
    pub fn is_active_for(&self, transaction_id: &TransactionId) -> bool {
        self.state == TitleState::Active && self.last_transaction_id.as_ref() == Some(transaction_id)
    }

    /// Returns true if an ownership change for the transaction is still applied.
    pub fn has_ownership_change(&self, transaction_id: &TransactionId) -> bool {
        self.last_transfer
            .as_ref()
            .is_some_and(|change| &change.transaction_id == transaction_id)
    }
}

// Command methods (return events)
impl LandTitle {
    /// Registers a new title in PENDING status.
    ///
    /// Missing fields are reported together before documents are checked.
    pub fn register(
        &self,
        title_id: AggregateId,
        title_number: &str,
        owner: &OwnerDetails,
        property_location: &str,
        documents: &[DocumentRef],
        transaction_id: &TransactionId,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if self.id.is_some() {
            return Err(LandTitleError::AlreadyRegistered);
        }

        let mut missing = Vec::new();
        if title_number.trim().is_empty() {
            missing.push("title_number");
        }
        if owner.name.trim().is_empty() {
            missing.push("owner_name");
        }
        if property_location.trim().is_empty() {
            missing.push("property_location");
        }
        if !missing.is_empty() {
            return Err(LandTitleError::Validation { missing });
        }

        if documents.is_empty() {
            return Err(LandTitleError::MissingDocuments {
                title_number: title_number.to_string(),
            });
        }

        Ok(vec![LandTitleEvent::title_registered(
            title_id,
            title_number.trim().to_string(),
            owner.clone(),
            property_location.to_string(),
            documents.to_vec(),
            transaction_id.clone(),
        )])
    }

    /// Activates the title with the hash returned by a successful ledger write.
    ///
    /// A repeat activation is rejected rather than treated as a no-op.
    pub fn activate(
        &self,
        transaction_id: &TransactionId,
        blockchain_hash: &str,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if !self.state.can_activate() {
            return Err(LandTitleError::InvalidTransition {
                current_state: self.state,
                action: "activate",
            });
        }

        if blockchain_hash.is_empty() {
            return Err(LandTitleError::Validation {
                missing: vec!["blockchain_hash"],
            });
        }

        Ok(vec![LandTitleEvent::title_activated(
            transaction_id.clone(),
            blockchain_hash.to_string(),
            self.blockchain_hash.clone(),
        )])
    }

    /// Rolls the latest transaction back to PENDING.
    ///
    /// Existing hashes survive, except that a ledger failure on the
    /// transaction that produced the current hash restores the one before it.
    pub fn revert_to_pending(
        &self,
        transaction_id: &TransactionId,
        reason: RevertReason,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if !self.state.can_revert() {
            return Err(LandTitleError::InvalidTransition {
                current_state: self.state,
                action: "revert to pending",
            });
        }

        if self.last_transaction_id.as_ref() != Some(transaction_id) {
            return Err(LandTitleError::TransactionMismatch {
                expected: self.last_transaction_id.clone(),
                actual: transaction_id.clone(),
            });
        }

        let hash_rolled_back = reason == RevertReason::LedgerWriteFailed
            && self.hash_transaction_id.as_ref() == Some(transaction_id);
        let restored_hash = if hash_rolled_back {
            self.previous_hash.clone()
        } else {
            self.blockchain_hash.clone()
        };

        Ok(vec![LandTitleEvent::title_reverted(
            transaction_id.clone(),
            reason,
            hash_rolled_back,
            restored_hash,
        )])
    }

    /// Cancels an active title back to PENDING, keeping the cancellation hash.
    pub fn cancel(
        &self,
        transaction_id: &TransactionId,
        cancellation_hash: &str,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if !self.state.can_cancel() {
            return Err(LandTitleError::InvalidTransition {
                current_state: self.state,
                action: "cancel",
            });
        }

        Ok(vec![LandTitleEvent::title_cancelled(
            transaction_id.clone(),
            cancellation_hash.to_string(),
        )])
    }

    /// Reactivates a previously cancelled title.
    pub fn reactivate(
        &self,
        transaction_id: &TransactionId,
        reactivation_hash: &str,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if !self.state.can_reactivate() {
            return Err(LandTitleError::InvalidTransition {
                current_state: self.state,
                action: "reactivate",
            });
        }

        if self.cancellation_hash.is_none() {
            return Err(LandTitleError::NoPriorCancellation);
        }

        Ok(vec![LandTitleEvent::title_reactivated(
            transaction_id.clone(),
            reactivation_hash.to_string(),
        )])
    }

    /// Hands the title to the buyer. Status stays ACTIVE.
    pub fn transfer_ownership(
        &self,
        transfer_id: AggregateId,
        transaction_id: &TransactionId,
        buyer: &OwnerDetails,
        seller_hash: &str,
        buyer_hash: &str,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if !self.state.can_transfer() {
            return Err(LandTitleError::InvalidTransition {
                current_state: self.state,
                action: "transfer ownership of",
            });
        }

        Ok(vec![LandTitleEvent::OwnershipTransferred(
            OwnershipTransferredData {
                transfer_id,
                transaction_id: transaction_id.clone(),
                new_owner: buyer.clone(),
                previous_owner: self.owner.clone(),
                seller_hash: seller_hash.to_string(),
                buyer_hash: buyer_hash.to_string(),
                previous_seller_hash: self.seller_hash.clone(),
                previous_buyer_hash: self.buyer_hash.clone(),
                transferred_at: chrono::Utc::now(),
            },
        )])
    }

    /// Undoes the ownership change made under `transaction_id`.
    pub fn revert_ownership(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        let change = self
            .last_transfer
            .as_ref()
            .filter(|change| &change.transaction_id == transaction_id)
            .ok_or_else(|| LandTitleError::NoOwnershipChange {
                transaction_id: transaction_id.clone(),
            })?;

        Ok(vec![LandTitleEvent::OwnershipReverted(
            OwnershipRevertedData {
                transfer_id: change.transfer_id,
                transaction_id: transaction_id.clone(),
                restored_owner: change.previous_owner.clone(),
                restored_seller_hash: change.previous_seller_hash.clone(),
                restored_buyer_hash: change.previous_buyer_hash.clone(),
                reverted_at: chrono::Utc::now(),
            },
        )])
    }

    /// Retires an active title. No further transitions are possible.
    pub fn retire(&self, reason: &str) -> Result<Vec<LandTitleEvent>, LandTitleError> {
        if !self.state.can_retire() {
            return Err(LandTitleError::InvalidTransition {
                current_state: self.state,
                action: "retire",
            });
        }

        Ok(vec![LandTitleEvent::title_retired(reason)])
    }
}

// Apply event helpers
impl LandTitle {
    fn apply_registered(&mut self, data: TitleRegisteredData) {
        self.id = Some(data.title_id);
        self.title_number = data.title_number;
        self.owner = data.owner;
        self.property_location = data.property_location;
        self.documents = data.documents;
        self.state = TitleState::Pending;
        self.transaction_id = Some(data.transaction_id.clone());
        self.last_transaction_id = Some(data.transaction_id);
    }

    fn apply_activated(&mut self, data: TitleActivatedData) {
        self.state = TitleState::Active;
        self.previous_hash = data.previous_hash;
        self.blockchain_hash = Some(data.blockchain_hash);
        self.hash_transaction_id = Some(data.transaction_id.clone());
        self.last_transaction_id = Some(data.transaction_id);
    }

    fn apply_reverted(&mut self, data: TitleRevertedData) {
        self.state = TitleState::Pending;
        if data.hash_rolled_back {
            self.blockchain_hash = data.restored_hash;
            self.hash_transaction_id = None;
            self.previous_hash = None;
        }
    }

    fn apply_ownership_transferred(&mut self, data: OwnershipTransferredData) {
        self.last_transfer = Some(OwnershipChange {
            transfer_id: data.transfer_id,
            transaction_id: data.transaction_id.clone(),
            previous_owner: data.previous_owner,
            previous_seller_hash: data.previous_seller_hash,
            previous_buyer_hash: data.previous_buyer_hash,
        });
        self.owner = data.new_owner;
        self.seller_hash = Some(data.seller_hash);
        self.buyer_hash = Some(data.buyer_hash);
        self.last_transaction_id = Some(data.transaction_id);
    }

    fn apply_ownership_reverted(&mut self, data: OwnershipRevertedData) {
        self.owner = data.restored_owner;
        self.seller_hash = data.restored_seller_hash;
        self.buyer_hash = data.restored_buyer_hash;
        self.last_transfer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id)
    }

    fn registered() -> LandTitle {
        let mut title = LandTitle::default();
        let events = title
            .register(
                AggregateId::new(),
                "TCT-2024-001",
                &OwnerDetails::named("Maria Santos"),
                "Lot 4, Quezon City",
                &[DocumentRef::new("deed.pdf")],
                &tx("TXN-1"),
            )
            .unwrap();
        title.apply_events(events);
        title
    }

    fn active() -> LandTitle {
        let mut title = registered();
        let events = title.activate(&tx("TXN-1"), "hash-1").unwrap();
        title.apply_events(events);
        title
    }

    #[test]
    fn register_creates_pending_title() {
        let title = registered();
        assert_eq!(title.state(), TitleState::Pending);
        assert_eq!(title.title_number(), "TCT-2024-001");
        assert_eq!(title.transaction_id(), Some(&tx("TXN-1")));
        assert!(title.blockchain_hash().is_none());
    }

    #[test]
    fn register_without_documents_fails() {
        let result = LandTitle::default().register(
            AggregateId::new(),
            "TCT-2024-001",
            &OwnerDetails::named("Maria Santos"),
            "Lot 4",
            &[],
            &tx("TXN-1"),
        );
        assert!(matches!(
            result,
            Err(LandTitleError::MissingDocuments { ref title_number }) if title_number == "TCT-2024-001"
        ));
    }

    #[test]
    fn register_reports_every_missing_field() {
        let result = LandTitle::default().register(
            AggregateId::new(),
            " ",
            &OwnerDetails::default(),
            "",
            &[],
            &tx("TXN-1"),
        );
        match result {
            Err(LandTitleError::Validation { missing }) => assert_eq!(
                missing,
                vec!["title_number", "owner_name", "property_location"]
            ),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn register_twice_fails() {
        let title = registered();
        let result = title.register(
            AggregateId::new(),
            "TCT-2024-002",
            &OwnerDetails::named("Juan"),
            "Lot 5",
            &[DocumentRef::new("deed.pdf")],
            &tx("TXN-2"),
        );
        assert!(matches!(result, Err(LandTitleError::AlreadyRegistered)));
    }

    #[test]
    fn activate_sets_hash() {
        let title = active();
        assert_eq!(title.state(), TitleState::Active);
        assert_eq!(title.blockchain_hash(), Some("hash-1"));
        assert!(title.is_active_for(&tx("TXN-1")));
    }

    #[test]
    fn repeat_activation_is_rejected() {
        let title = active();
        let result = title.activate(&tx("TXN-1"), "hash-2");
        assert!(matches!(
            result,
            Err(LandTitleError::InvalidTransition {
                current_state: TitleState::Active,
                action: "activate"
            })
        ));
    }

    #[test]
    fn ledger_failure_revert_clears_hash_it_produced() {
        let mut title = active();
        let events = title
            .revert_to_pending(&tx("TXN-1"), RevertReason::LedgerWriteFailed)
            .unwrap();
        title.apply_events(events);

        assert_eq!(title.state(), TitleState::Pending);
        assert!(title.blockchain_hash().is_none());
    }

    #[test]
    fn payment_cancellation_revert_keeps_hash() {
        let mut title = active();
        let events = title
            .revert_to_pending(&tx("TXN-1"), RevertReason::PaymentCancelled)
            .unwrap();
        title.apply_events(events);

        assert_eq!(title.state(), TitleState::Pending);
        assert_eq!(title.blockchain_hash(), Some("hash-1"));
    }

    #[test]
    fn ledger_failure_revert_restores_previous_hash() {
        let mut title = active();
        let events = title
            .revert_to_pending(&tx("TXN-1"), RevertReason::PaymentCancelled)
            .unwrap();
        title.apply_events(events);

        let events = title.activate(&tx("TXN-2"), "hash-2").unwrap();
        title.apply_events(events);
        assert_eq!(title.blockchain_hash(), Some("hash-2"));

        let events = title
            .revert_to_pending(&tx("TXN-2"), RevertReason::LedgerWriteFailed)
            .unwrap();
        title.apply_events(events);
        assert_eq!(title.blockchain_hash(), Some("hash-1"));
    }

    #[test]
    fn revert_requires_latest_transaction() {
        let title = active();
        let result = title.revert_to_pending(&tx("TXN-9"), RevertReason::LedgerWriteFailed);
        assert!(matches!(result, Err(LandTitleError::TransactionMismatch { .. })));

        let result = registered().revert_to_pending(&tx("TXN-1"), RevertReason::LedgerWriteFailed);
        assert!(matches!(result, Err(LandTitleError::InvalidTransition { .. })));
    }

    #[test]
    fn cancel_then_reactivate_keeps_three_hashes() {
        let mut title = active();

        let events = title.cancel(&tx("TXN-C"), "hash-cancel").unwrap();
        title.apply_events(events);
        assert_eq!(title.state(), TitleState::Pending);

        let events = title.reactivate(&tx("TXN-R"), "hash-react").unwrap();
        title.apply_events(events);

        assert_eq!(title.state(), TitleState::Active);
        assert_eq!(title.blockchain_hash(), Some("hash-1"));
        assert_eq!(title.cancellation_hash(), Some("hash-cancel"));
        assert_eq!(title.reactivation_hash(), Some("hash-react"));
    }

    #[test]
    fn reactivate_requires_prior_cancellation() {
        let result = registered().reactivate(&tx("TXN-R"), "hash-react");
        assert!(matches!(result, Err(LandTitleError::NoPriorCancellation)));
    }

    #[test]
    fn transfer_and_revert_ownership() {
        let mut title = active();
        let transfer_id = AggregateId::new();
        let buyer = OwnerDetails::named("Jose Rizal").with_email("jose@example.com");

        let events = title
            .transfer_ownership(transfer_id, &tx("TXN-T"), &buyer, "seller-h", "buyer-h")
            .unwrap();
        title.apply_events(events);

        assert_eq!(title.state(), TitleState::Active);
        assert_eq!(title.owner(), &buyer);
        assert_eq!(title.seller_hash(), Some("seller-h"));
        assert!(title.has_ownership_change(&tx("TXN-T")));

        let events = title.revert_ownership(&tx("TXN-T")).unwrap();
        title.apply_events(events);

        assert_eq!(title.owner_name(), "Maria Santos");
        assert!(title.seller_hash().is_none());
        assert!(title.buyer_hash().is_none());
        assert!(!title.has_ownership_change(&tx("TXN-T")));
        assert_eq!(title.blockchain_hash(), Some("hash-1"));
    }

    #[test]
    fn transfer_requires_active_title() {
        let result = registered().transfer_ownership(
            AggregateId::new(),
            &tx("TXN-T"),
            &OwnerDetails::named("Jose"),
            "s",
            "b",
        );
        assert!(matches!(result, Err(LandTitleError::InvalidTransition { .. })));
    }

    #[test]
    fn revert_ownership_without_change_fails() {
        let result = active().revert_ownership(&tx("TXN-T"));
        assert!(matches!(result, Err(LandTitleError::NoOwnershipChange { .. })));
    }

    #[test]
    fn retire_is_terminal() {
        let mut title = active();
        let events = title.retire("subdivided").unwrap();
        title.apply_events(events);

        assert_eq!(title.state(), TitleState::Cancelled);
        assert!(title.cancel(&tx("TXN-C"), "h").is_err());
        assert!(title.activate(&tx("TXN-2"), "h").is_err());
    }
}
