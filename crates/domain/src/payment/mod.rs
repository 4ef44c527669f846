//! Payment aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Payment;
pub use commands::*;
pub use events::{
    PaymentCancelledData, PaymentConfirmedData, PaymentCreatedData, PaymentEvent,
    PaymentFailedData, PaymentUpdatedData,
};
pub use service::{PAYMENT_TRANSACTION_INDEX, PaymentService};
pub use state::PaymentState;
pub use value_objects::{Money, PaymentPurpose};

use common::TransactionId;
use thiserror::Error;

/// Errors raised by payment transitions.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Required fields are missing (all of them are listed).
    #[error("Missing required fields: {}", .missing_fields.join(", "))]
    Validation { missing_fields: Vec<&'static str> },

    /// Amounts must be positive.
    #[error("Invalid amount: {cents} cents (must be greater than 0)")]
    InvalidAmount { cents: i64 },

    /// The payment is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} a payment with {current_state} status")]
    InvalidTransition {
        current_state: PaymentState,
        action: &'static str,
    },

    /// Another payment already uses this transaction id.
    #[error("Payment for transaction {transaction_id} already exists")]
    DuplicateTransaction { transaction_id: TransactionId },

    /// The payment stream already holds a payment.
    #[error("Payment already created")]
    AlreadyCreated,
}
