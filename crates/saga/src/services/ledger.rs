//! Ledger adapter trait and in-memory implementation.
//!
//! The ledger is an append-only store keyed by title number. Every write
//! returns a content hash and a ledger transaction id; a key's history is
//! readable as a finite stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors returned by a ledger service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ledger rejected the write: {0}")]
    Rejected(String),

    #[error("Ledger key not found: {0}")]
    NotFound(String),
}

/// Receipt for a successful ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction_id: String,
    pub hash: String,
}

/// One entry in a key's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub hash: String,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub is_delete: bool,
}

/// Stream over a key's history, oldest first.
pub type LedgerHistory = Pin<Box<dyn Stream<Item = LedgerEntry> + Send>>;

/// Operations against the external immutable ledger.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Opens the connection. Writes fail with `Unavailable` until connected.
    async fn connect(&self) -> Result<(), LedgerError>;

    /// Closes the connection.
    async fn close(&self);

    fn is_connected(&self) -> bool;

    /// Records a new key. Fails with `Rejected` if the key already exists.
    async fn record(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Appends a new version of an existing key.
    async fn update(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Appends a delete marker for an existing key.
    async fn delete(&self, key: &str) -> Result<LedgerReceipt, LedgerError>;

    /// Returns the latest payload of a live key.
    async fn query(&self, key: &str) -> Result<serde_json::Value, LedgerError>;

    /// Returns the full history of a key. Each call starts a fresh stream.
    async fn history(&self, key: &str) -> Result<LedgerHistory, LedgerError>;
}

#[derive(Debug, Default)]
struct InMemoryLedgerState {
    connected: bool,
    entries: HashMap<String, Vec<LedgerEntry>>,
    next_tx: u64,
    writes: usize,
    unavailable: bool,
    fail_after: Option<usize>,
    latency: Duration,
}

enum WriteKind<'a> {
    Record(&'a serde_json::Value),
    Update(&'a serde_json::Value),
    Delete,
}

/// In-memory ledger with a SHA-256 hash chain per key.
///
/// Supports failure injection for tests: permanent unavailability, failure
/// after a number of successful writes, and artificial latency.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<InMemoryLedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that is already connected.
    pub fn connected() -> Self {
        let ledger = Self::new();
        ledger.lock().connected = true;
        ledger
    }

    /// Makes every subsequent write fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Lets `writes` more writes succeed, then fails the rest.
    pub fn fail_after(&self, writes: usize) {
        let mut state = self.lock();
        state.fail_after = Some(state.writes + writes);
    }

    /// Delays every write by `latency` before it is applied.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryLedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write(&self, key: &str, kind: WriteKind<'_>) -> Result<LedgerReceipt, LedgerError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if !state.connected {
            return Err(LedgerError::Unavailable("not connected".to_string()));
        }
        if state.unavailable {
            return Err(LedgerError::Unavailable("ledger peer unreachable".to_string()));
        }
        if state.fail_after.is_some_and(|limit| state.writes >= limit) {
            return Err(LedgerError::Unavailable("ledger peer unreachable".to_string()));
        }

        let live = state
            .entries
            .get(key)
            .and_then(|history| history.last())
            .is_some_and(|entry| !entry.is_delete);
        let previous_hash = state
            .entries
            .get(key)
            .and_then(|history| history.last())
            .map(|entry| entry.hash.clone())
            .unwrap_or_default();

        let (payload, is_delete) = match kind {
            WriteKind::Record(payload) => {
                if live {
                    return Err(LedgerError::Rejected(format!("{key} already exists")));
                }
                (payload.clone(), false)
            }
            WriteKind::Update(payload) => {
                if !live {
                    return Err(LedgerError::NotFound(key.to_string()));
                }
                (payload.clone(), false)
            }
            WriteKind::Delete => {
                if !live {
                    return Err(LedgerError::NotFound(key.to_string()));
                }
                (serde_json::Value::Null, true)
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(previous_hash.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(payload.to_string().as_bytes());
        let hash = hex::encode(hasher.finalize());

        state.next_tx += 1;
        let transaction_id = format!("LTX-{:06}", state.next_tx);
        state.writes += 1;

        state
            .entries
            .entry(key.to_string())
            .or_default()
            .push(LedgerEntry {
                hash: hash.clone(),
                transaction_id: transaction_id.clone(),
                timestamp: Utc::now(),
                payload,
                is_delete,
            });

        tracing::trace!(key, %hash, "ledger write applied");
        Ok(LedgerReceipt {
            transaction_id,
            hash,
        })
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn connect(&self) -> Result<(), LedgerError> {
        self.lock().connected = true;
        tracing::info!("ledger connected");
        Ok(())
    }

    async fn close(&self) {
        self.lock().connected = false;
        tracing::info!("ledger closed");
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn record(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.write(key, WriteKind::Record(payload)).await
    }

    async fn update(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.write(key, WriteKind::Update(payload)).await
    }

    async fn delete(&self, key: &str) -> Result<LedgerReceipt, LedgerError> {
        self.write(key, WriteKind::Delete).await
    }

    async fn query(&self, key: &str) -> Result<serde_json::Value, LedgerError> {
        let state = self.lock();
        state
            .entries
            .get(key)
            .and_then(|history| history.last())
            .filter(|entry| !entry.is_delete)
            .map(|entry| entry.payload.clone())
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))
    }

    async fn history(&self, key: &str) -> Result<LedgerHistory, LedgerError> {
        use futures_util::stream;

        let entries = self
            .lock()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
        Ok(Box::pin(stream::iter(entries)))
    }
}
