//! Saga domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, TransactionId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::flows::SagaFlow;

/// Events recorded in the saga log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga accepted a message for a transaction.
    SagaStarted(SagaStartedData),

    /// Ledger writes for the listed keys are about to be issued.
    LedgerWriteStarted(LedgerWriteStartedData),

    /// A ledger write returned a receipt.
    LedgerWriteSucceeded(LedgerWriteSucceededData),

    /// A ledger write failed or timed out.
    LedgerWriteFailed(LedgerWriteFailedData),

    /// A forward step completed.
    StepCompleted(StepData),

    /// Compensation started after a ledger failure.
    CompensationStarted(CompensationData),

    /// A compensation step completed.
    CompensationStepCompleted(StepData),

    /// A notification was published to the payment service.
    NotificationPublished(NotificationData),

    /// Saga committed.
    SagaCommitted(SagaCommittedData),

    /// Saga compensated.
    SagaCompensated(SagaCompensatedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::LedgerWriteStarted(_) => "LedgerWriteStarted",
            SagaEvent::LedgerWriteSucceeded(_) => "LedgerWriteSucceeded",
            SagaEvent::LedgerWriteFailed(_) => "LedgerWriteFailed",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::NotificationPublished(_) => "NotificationPublished",
            SagaEvent::SagaCommitted(_) => "SagaCommitted",
            SagaEvent::SagaCompensated(_) => "SagaCompensated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: AggregateId,
    pub flow: SagaFlow,
    pub transaction_id: TransactionId,
    pub land_title_id: AggregateId,
    /// Set for transfer sagas only.
    pub transfer_id: Option<AggregateId>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerWriteStartedData {
    /// Every ledger key the saga must write before it can commit.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerWriteSucceededData {
    pub key: String,
    pub ledger_transaction_id: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerWriteFailedData {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationData {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationData {
    /// Message type of the published notification (e.g. `PaymentFailed`).
    pub notification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCommittedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompensatedData {
    pub reason: String,
    pub compensated_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        saga_id: AggregateId,
        flow: SagaFlow,
        transaction_id: TransactionId,
        land_title_id: AggregateId,
        transfer_id: Option<AggregateId>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            flow,
            transaction_id,
            land_title_id,
            transfer_id,
            started_at: Utc::now(),
        })
    }

    pub fn ledger_write_started(keys: Vec<String>) -> Self {
        SagaEvent::LedgerWriteStarted(LedgerWriteStartedData { keys })
    }

    pub fn ledger_write_succeeded(
        key: impl Into<String>,
        ledger_transaction_id: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        SagaEvent::LedgerWriteSucceeded(LedgerWriteSucceededData {
            key: key.into(),
            ledger_transaction_id: ledger_transaction_id.into(),
            hash: hash.into(),
        })
    }

    pub fn ledger_write_failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::LedgerWriteFailed(LedgerWriteFailedData {
            key: key.into(),
            error: error.into(),
        })
    }

    pub fn step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::StepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn compensation_started(reason: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            reason: reason.into(),
        })
    }

    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn notification_published(notification: impl Into<String>) -> Self {
        SagaEvent::NotificationPublished(NotificationData {
            notification: notification.into(),
        })
    }

    pub fn saga_committed() -> Self {
        SagaEvent::SagaCommitted(SagaCommittedData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_compensated(reason: impl Into<String>) -> Self {
        SagaEvent::SagaCompensated(SagaCompensatedData {
            reason: reason.into(),
            compensated_at: Utc::now(),
        })
    }
}
