//! Transfer aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;

pub use aggregate::Transfer;
pub use commands::*;
pub use events::{
    TransferCancelledData, TransferCompletedData, TransferCreatedData, TransferEvent,
    TransferUpdatedData,
};
pub use service::TransferService;
pub use state::TransferState;

use common::AggregateId;
use thiserror::Error;

use crate::land_title::TitleState;

/// Errors raised by transfer transitions.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transfers can only start from an ACTIVE title.
    #[error("Cannot transfer land title with {state} status")]
    InvalidTitleState { state: TitleState },

    /// Completed transfers are immutable.
    #[error("Transfer {transfer_id} is completed and can no longer be modified")]
    ImmutableRecord { transfer_id: AggregateId },

    /// The transfer is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} a transfer with {current_state} status")]
    InvalidTransition {
        current_state: TransferState,
        action: &'static str,
    },

    /// Required buyer fields are missing.
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    /// The transfer stream already holds a transfer.
    #[error("Transfer already created")]
    AlreadyCreated,
}
