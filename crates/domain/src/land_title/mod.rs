//! Land title aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::{LandTitle, OwnershipChange};
pub use commands::*;
pub use events::{
    LandTitleEvent, OwnershipRevertedData, OwnershipTransferredData, TitleActivatedData,
    TitleCancelledData, TitleReactivatedData, TitleRegisteredData, TitleRetiredData,
    TitleRevertedData,
};
pub use service::{LandTitleService, TITLE_NUMBER_INDEX, TITLE_TRANSACTION_INDEX};
pub use state::TitleState;
pub use value_objects::{DocumentRef, OwnerDetails, RevertReason};

use common::TransactionId;
use thiserror::Error;

/// Errors raised by land title transitions.
#[derive(Debug, Error)]
pub enum LandTitleError {
    /// Another title already uses this title number.
    #[error("Land title {title_number} already exists")]
    DuplicateTitle { title_number: String },

    /// Another title was registered under the same transaction id.
    #[error("Transaction {transaction_id} is already bound to a land title")]
    DuplicateTransaction { transaction_id: TransactionId },

    /// Registration needs at least one supporting document.
    #[error("Land title {title_number} requires at least one supporting document")]
    MissingDocuments { title_number: String },

    /// Required registration fields are missing (all of them are listed).
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    /// The title is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} a land title with {current_state} status")]
    InvalidTransition {
        current_state: TitleState,
        action: &'static str,
    },

    /// Reactivation requires a prior cancellation.
    #[error("Land title has no prior cancellation to reactivate from")]
    NoPriorCancellation,

    /// A rollback named a transaction that is not the title's latest.
    #[error("Transaction {actual} is not the latest transaction on this title (latest: {expected:?})")]
    TransactionMismatch {
        expected: Option<TransactionId>,
        actual: TransactionId,
    },

    /// No ownership change exists for the transaction being rolled back.
    #[error("No ownership change recorded for transaction {transaction_id}")]
    NoOwnershipChange { transaction_id: TransactionId },

    /// The title stream already holds a registration.
    #[error("Land title already registered")]
    AlreadyRegistered,
}
