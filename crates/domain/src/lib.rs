//! Domain layer for the land registry.
//!
//! This crate provides the event-sourcing abstractions and the three entity
//! state machines the registry saga drives:
//! - Aggregate trait for event-sourced entities
//! - Command trait and CommandHandler for command processing
//! - LandTitle, Payment and Transfer aggregates with their services

pub mod aggregate;
pub mod command;
pub mod error;
pub mod land_title;
pub mod payment;
pub mod transfer;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandOptions, CommandResult};
pub use error::DomainError;
pub use land_title::{
    ActivateTitle, CancelTitle, DocumentRef, LandTitle, LandTitleError, LandTitleEvent,
    LandTitleService, OwnerDetails, ReactivateTitle, RegisterTitle, RetireTitle, RevertOwnership,
    RevertReason, RevertTitleToPending, TitleState, TransferOwnership,
};
pub use payment::{
    CancelPayment, ConfirmPayment, CreatePayment, MarkPaymentFailed, Money, Payment, PaymentError,
    PaymentEvent, PaymentPurpose, PaymentService, PaymentState, UpdatePayment,
};
pub use transfer::{
    CancelTransfer, CompleteTransfer, CreateTransfer, Transfer, TransferError, TransferEvent,
    TransferService, TransferState, UpdateTransfer,
};
