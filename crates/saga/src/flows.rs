//! Saga flow identifiers and step names.

use common::AggregateId;
use serde::{Deserialize, Serialize};

/// Index that maps `"{flow}:{transaction_id}"` to a saga instance.
pub const SAGA_CORRELATION_INDEX: &str = "saga.correlation";

/// Step name: write the title record(s) to the ledger.
pub const STEP_LEDGER_WRITE: &str = "ledger_write";

/// Step name: activate the title with the ledger hash.
pub const STEP_ACTIVATE_TITLE: &str = "activate_title";

/// Step name: hand the title to the buyer.
pub const STEP_TRANSFER_OWNERSHIP: &str = "transfer_ownership";

/// Step name: mark the transfer completed.
pub const STEP_COMPLETE_TRANSFER: &str = "complete_transfer";

/// Step name: cancel the title.
pub const STEP_CANCEL_TITLE: &str = "cancel_title";

/// Step name: reactivate the title.
pub const STEP_REACTIVATE_TITLE: &str = "reactivate_title";

/// Compensation step: roll the title back to PENDING.
pub const STEP_REVERT_TITLE: &str = "revert_title";

/// Compensation step: restore the previous owner.
pub const STEP_REVERT_OWNERSHIP: &str = "revert_ownership";

/// Compensation step: mark the payment FAILED.
pub const STEP_FAIL_PAYMENT: &str = "fail_payment";

/// The business transaction a saga drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaFlow {
    /// Payment confirmed for a new title: ledger record, then activation.
    Registration,
    /// Transfer fee paid: seller and buyer ledger entries, then ownership change.
    Transfer,
    /// Title cancellation: ledger update, then cancel.
    TitleCancellation,
    /// Title reactivation: ledger update, then reactivate.
    TitleReactivation,
}

impl SagaFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaFlow::Registration => "registration",
            SagaFlow::Transfer => "transfer",
            SagaFlow::TitleCancellation => "title_cancellation",
            SagaFlow::TitleReactivation => "title_reactivation",
        }
    }

    /// Returns true for flows triggered by a payment, which report back to
    /// the payment service.
    pub fn is_payment_flow(&self) -> bool {
        matches!(self, SagaFlow::Registration | SagaFlow::Transfer)
    }

    /// Builds the unique correlation key for a transaction in this flow.
    pub fn correlation_key(&self, transaction_id: &str) -> String {
        format!("{}:{}", self.as_str(), transaction_id)
    }
}

impl std::fmt::Display for SagaFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger key of the seller entry written by a transfer.
pub fn seller_key(title_number: &str, transfer_id: AggregateId) -> String {
    format!("{title_number}#{transfer_id}#seller")
}

/// Ledger key of the buyer entry written by a transfer.
pub fn buyer_key(title_number: &str, transfer_id: AggregateId) -> String {
    format!("{title_number}#{transfer_id}#buyer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_key_includes_flow() {
        assert_eq!(
            SagaFlow::Registration.correlation_key("TXN-1"),
            "registration:TXN-1"
        );
        assert_ne!(
            SagaFlow::Transfer.correlation_key("TXN-1"),
            SagaFlow::Registration.correlation_key("TXN-1")
        );
    }

    #[test]
    fn transfer_keys_are_scoped_to_the_transfer() {
        let transfer_id = AggregateId::new();
        assert_eq!(
            seller_key("TCT-1", transfer_id),
            format!("TCT-1#{transfer_id}#seller")
        );
        assert!(buyer_key("TCT-1", transfer_id).ends_with("#buyer"));
        assert_ne!(
            seller_key("TCT-1", transfer_id),
            seller_key("TCT-1", AggregateId::new())
        );
    }

    #[test]
    fn only_payment_flows_notify() {
        assert!(SagaFlow::Registration.is_payment_flow());
        assert!(SagaFlow::Transfer.is_payment_flow());
        assert!(!SagaFlow::TitleCancellation.is_payment_flow());
    }
}
