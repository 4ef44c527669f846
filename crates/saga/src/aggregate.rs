//! Saga instance aggregate.

use common::{AggregateId, TransactionId};
use domain::Aggregate;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::flows::SagaFlow;
use crate::state::SagaState;

/// A ledger receipt kept in the saga log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceiptRecord {
    pub key: String,
    pub ledger_transaction_id: String,
    pub hash: String,
}

/// An event-sourced saga instance.
///
/// The log records which ledger writes returned a receipt and which
/// notifications went out, so a redelivered message can resume an
/// interrupted saga without repeating either.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<AggregateId>,
    version: Version,
    flow: Option<SagaFlow>,
    transaction_id: Option<TransactionId>,
    land_title_id: Option<AggregateId>,
    transfer_id: Option<AggregateId>,
    state: SagaState,
    ledger_keys: Vec<String>,
    receipts: Vec<LedgerReceiptRecord>,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    notifications: Vec<String>,
    /// Reason for failure, if any.
    failure_reason: Option<String>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "LandRegistrySaga"
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
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.flow = Some(data.flow);
                self.transaction_id = Some(data.transaction_id);
                self.land_title_id = Some(data.land_title_id);
                self.transfer_id = data.transfer_id;
                self.state = SagaState::Initiated;
            }
            SagaEvent::LedgerWriteStarted(data) => {
                self.ledger_keys = data.keys;
                self.state = SagaState::LedgerPending;
            }
            SagaEvent::LedgerWriteSucceeded(data) => {
                self.receipts.push(LedgerReceiptRecord {
                    key: data.key,
                    ledger_transaction_id: data.ledger_transaction_id,
                    hash: data.hash,
                });
            }
            SagaEvent::LedgerWriteFailed(data) => {
                self.failure_reason = Some(data.error);
            }
            SagaEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step_name);
            }
            SagaEvent::CompensationStarted(data) => {
                self.state = SagaState::Compensating;
                self.failure_reason.get_or_insert(data.reason);
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensated_steps.push(data.step_name);
            }
            SagaEvent::NotificationPublished(data) => {
                self.notifications.push(data.notification);
            }
            SagaEvent::SagaCommitted(_) => {
                self.state = SagaState::Committed;
            }
            SagaEvent::SagaCompensated(data) => {
                self.state = SagaState::Compensated;
                self.failure_reason.get_or_insert(data.reason);
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn flow(&self) -> Option<SagaFlow> {
        self.flow
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn land_title_id(&self) -> Option<AggregateId> {
        self.land_title_id
    }

    pub fn transfer_id(&self) -> Option<AggregateId> {
        self.transfer_id
    }

    /// Ledger keys the saga must write before it can commit.
    pub fn ledger_keys(&self) -> &[String] {
        &self.ledger_keys
    }

    pub fn receipts(&self) -> &[LedgerReceiptRecord] {
        &self.receipts
    }

    /// Returns the hash recorded for a ledger key, if the write succeeded.
    pub fn ledger_hash(&self, key: &str) -> Option<&str> {
        self.receipts
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.hash.as_str())
    }

    /// Returns true once every planned ledger key has a receipt.
    pub fn ledger_writes_complete(&self) -> bool {
        !self.ledger_keys.is_empty()
            && self
                .ledger_keys
                .iter()
                .all(|key| self.ledger_hash(key).is_some())
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    /// Returns true if a notification of this type was already published.
    pub fn has_published(&self, notification: &str) -> bool {
        self.notifications.iter().any(|n| n == notification)
    }

    pub fn notifications(&self) -> &[String] {
        &self.notifications
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows;

    fn started(flow: SagaFlow) -> SagaInstance {
        let mut saga = SagaInstance::default();
        saga.apply(SagaEvent::saga_started(
            AggregateId::new(),
            flow,
            TransactionId::new("TXN-1"),
            AggregateId::new(),
            None,
        ));
        saga
    }

    #[test]
    fn default_saga_instance() {
        let saga = SagaInstance::default();
        assert!(saga.id().is_none());
        assert_eq!(saga.state(), SagaState::NotStarted);
        assert!(saga.completed_steps().is_empty());
    }

    #[test]
    fn started_saga_is_initiated() {
        let saga = started(SagaFlow::Registration);
        assert!(saga.id().is_some());
        assert_eq!(saga.flow(), Some(SagaFlow::Registration));
        assert_eq!(saga.transaction_id().unwrap().as_str(), "TXN-1");
        assert_eq!(saga.state(), SagaState::Initiated);
    }

    #[test]
    fn commit_path() {
        let mut saga = started(SagaFlow::Registration);
        saga.apply(SagaEvent::ledger_write_started(vec!["TCT-1".into()]));
        assert_eq!(saga.state(), SagaState::LedgerPending);
        assert!(!saga.ledger_writes_complete());

        saga.apply(SagaEvent::ledger_write_succeeded("TCT-1", "LTX-1", "abc"));
        assert!(saga.ledger_writes_complete());
        assert_eq!(saga.ledger_hash("TCT-1"), Some("abc"));

        saga.apply(SagaEvent::step_completed(flows::STEP_ACTIVATE_TITLE));
        saga.apply(SagaEvent::notification_published("RegistrationCommitted"));
        saga.apply(SagaEvent::saga_committed());

        assert_eq!(saga.state(), SagaState::Committed);
        assert_eq!(saga.completed_steps(), &["activate_title"]);
        assert!(saga.has_published("RegistrationCommitted"));
    }

    #[test]
    fn partial_transfer_writes_are_incomplete() {
        let mut saga = started(SagaFlow::Transfer);
        let transfer_id = AggregateId::new();
        let seller = flows::seller_key("TCT-1", transfer_id);
        saga.apply(SagaEvent::ledger_write_started(vec![
            seller.clone(),
            flows::buyer_key("TCT-1", transfer_id),
        ]));
        saga.apply(SagaEvent::ledger_write_succeeded(seller, "LTX-1", "s"));
        assert!(!saga.ledger_writes_complete());
    }

    #[test]
    fn compensation_path_keeps_first_failure() {
        let mut saga = started(SagaFlow::Registration);
        saga.apply(SagaEvent::ledger_write_started(vec!["TCT-1".into()]));
        saga.apply(SagaEvent::ledger_write_failed("TCT-1", "ledger unavailable"));
        saga.apply(SagaEvent::compensation_started("ledger write failed"));
        assert_eq!(saga.state(), SagaState::Compensating);

        saga.apply(SagaEvent::compensation_step_completed(flows::STEP_FAIL_PAYMENT));
        saga.apply(SagaEvent::saga_compensated("ledger write failed"));

        assert_eq!(saga.state(), SagaState::Compensated);
        assert_eq!(saga.failure_reason(), Some("ledger unavailable"));
        assert_eq!(saga.compensated_steps(), &["fail_payment"]);
    }
}
