//! Saga orchestration for the land registry.
//!
//! A confirmed payment or a title change request arrives on the bus. The
//! coordinator writes the matching record to the external ledger, then
//! drives the land title, payment and transfer state machines forward. If
//! any ledger write fails or times out it compensates instead:
//! 1. Revert whatever the saga already changed on the title
//! 2. Mark the payment failed
//! 3. Publish a `PaymentFailed` notification
//!
//! Progress is recorded as an event-sourced saga log keyed by flow and
//! transaction id, so redelivered messages are idempotent.

pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod flows;
pub mod gateway;
pub mod messages;
pub mod services;
pub mod state;
pub mod worker;

pub use aggregate::SagaInstance;
pub use config::SagaConfig;
pub use coordinator::{SagaCoordinator, SagaOutcome};
pub use error::SagaError;
pub use events::SagaEvent;
pub use flows::SagaFlow;
pub use gateway::RegistryGateway;
pub use messages::{
    NotificationData, PAYMENT_QUEUE, PaymentEventData, PaymentNotification, REGISTRY_QUEUE,
    RegistryMessage, TitleChangeData,
};
pub use services::{
    BusError, Delivery, InMemoryLedger, InMemoryMessageBus, LedgerEntry, LedgerError,
    LedgerReceipt, LedgerService, MessageBus, MessageBusExt,
};
pub use state::SagaState;
pub use worker::SagaWorker;
