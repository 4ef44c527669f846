//! Payment domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Money, PaymentPurpose};

/// Events that can occur on a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreatedData),
    PaymentUpdated(PaymentUpdatedData),
    PaymentConfirmed(PaymentConfirmedData),
    PaymentCancelled(PaymentCancelledData),
    PaymentFailed(PaymentFailedData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "PaymentCreated",
            PaymentEvent::PaymentUpdated(_) => "PaymentUpdated",
            PaymentEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            PaymentEvent::PaymentCancelled(_) => "PaymentCancelled",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreatedData {
    pub payment_id: AggregateId,
    pub transaction_id: TransactionId,
    pub land_title_id: AggregateId,
    pub amount: Money,
    pub payer_name: String,
    pub payment_method: String,
    pub purpose: PaymentPurpose,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentUpdatedData {
    pub amount: Option<Money>,
    pub payer_name: Option<String>,
    pub payment_method: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCancelledData {
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn payment_confirmed() -> Self {
        PaymentEvent::PaymentConfirmed(PaymentConfirmedData {
            confirmed_at: Utc::now(),
        })
    }

    pub fn payment_cancelled(reason: Option<String>) -> Self {
        PaymentEvent::PaymentCancelled(PaymentCancelledData {
            reason,
            cancelled_at: Utc::now(),
        })
    }

    pub fn payment_failed(reason: impl Into<String>) -> Self {
        PaymentEvent::PaymentFailed(PaymentFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
