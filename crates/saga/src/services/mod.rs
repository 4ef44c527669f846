//! External collaborators the coordinator drives: the ledger and the bus.

pub mod bus;
pub mod ledger;

pub use bus::{BusError, Delivery, InMemoryMessageBus, MessageBus, MessageBusExt};
pub use ledger::{
    InMemoryLedger, LedgerEntry, LedgerError, LedgerHistory, LedgerReceipt, LedgerService,
};
