//! Shared identifier types used across the land registry crates.

mod types;

pub use types::{AggregateId, TransactionId};
