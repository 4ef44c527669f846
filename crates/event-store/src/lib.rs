//! Persistence for the land registry entities.
//!
//! Every entity (land title, payment, transfer, saga instance) is stored as an
//! append-only stream of events. Appends are guarded by optimistic versions
//! and by unique indexes, which is how duplicate title numbers and duplicate
//! transaction ids surface as typed conflicts.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::{AggregateId, TransactionId};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, UniqueKey};
