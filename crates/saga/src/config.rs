//! Saga runtime configuration.

use std::time::Duration;

/// Tunables for the coordinator and its bus worker.
///
/// Reads from environment variables:
/// - `LEDGER_TIMEOUT_MS` — ledger write timeout (default: `5000`)
/// - `SAGA_WORKER_CONCURRENCY` — messages processed in parallel (default: `4`)
/// - `SAGA_MAX_DELIVERIES` — deliveries before a message is dropped (default: `5`)
/// - `SAGA_REDELIVERY_DELAY_MS` — pause before a nack (default: `100`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub ledger_timeout: Duration,
    pub worker_concurrency: usize,
    pub max_deliveries: u32,
    pub redelivery_delay: Duration,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ledger_timeout: env_parse("LEDGER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ledger_timeout),
            worker_concurrency: env_parse("SAGA_WORKER_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_concurrency),
            max_deliveries: env_parse("SAGA_MAX_DELIVERIES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_deliveries),
            redelivery_delay: env_parse("SAGA_REDELIVERY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.redelivery_delay),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            ledger_timeout: Duration::from_millis(5000),
            worker_concurrency: 4,
            max_deliveries: 5,
            redelivery_delay: Duration::from_millis(100),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
