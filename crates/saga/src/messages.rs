//! Messages exchanged over the bus.
//!
//! Inbound messages drive the coordinator; outbound notifications tell the
//! payment service how a saga ended. Both are tagged unions so consumers
//! dispatch with an exhaustive match.

use common::{AggregateId, TransactionId};
use domain::{Money, OwnerDetails, PaymentState, TitleState};
use serde::{Deserialize, Serialize};

/// Queue consumed by the registry coordinator.
pub const REGISTRY_QUEUE: &str = "land_registry.events";

/// Queue consumed by the payment service.
pub const PAYMENT_QUEUE: &str = "payment.notifications";

/// Messages consumed by the registry coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RegistryMessage {
    PaymentConfirmed(PaymentEventData),
    PaymentCancelled(PaymentEventData),
    TitleCancellationRequested(TitleChangeData),
    TitleReactivationRequested(TitleChangeData),
}

impl RegistryMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            RegistryMessage::PaymentConfirmed(_) => "PaymentConfirmed",
            RegistryMessage::PaymentCancelled(_) => "PaymentCancelled",
            RegistryMessage::TitleCancellationRequested(_) => "TitleCancellationRequested",
            RegistryMessage::TitleReactivationRequested(_) => "TitleReactivationRequested",
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            RegistryMessage::PaymentConfirmed(data) | RegistryMessage::PaymentCancelled(data) => {
                &data.transaction_id
            }
            RegistryMessage::TitleCancellationRequested(data)
            | RegistryMessage::TitleReactivationRequested(data) => &data.transaction_id,
        }
    }
}

/// A payment status change reported by the payment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEventData {
    pub transaction_id: TransactionId,
    pub land_title_id: AggregateId,
    /// Title status at the time the payment changed.
    pub status: TitleState,
    pub payment_status: PaymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<AggregateId>,
    #[serde(
        rename = "transferFee",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transfer_fee: Option<Money>,
    #[serde(rename = "toOwner", default, skip_serializing_if = "Option::is_none")]
    pub to_owner: Option<OwnerDetails>,
    #[serde(rename = "fromOwner", default, skip_serializing_if = "Option::is_none")]
    pub from_owner: Option<OwnerDetails>,
}

/// A request to cancel or reactivate a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleChangeData {
    pub transaction_id: TransactionId,
    pub land_title_id: AggregateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Notifications published to the payment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentNotification {
    RegistrationCommitted(NotificationData),
    TransferCommitted(NotificationData),
    /// Compensating event: the ledger write failed and the payment was failed.
    PaymentFailed(NotificationData),
}

impl PaymentNotification {
    pub fn message_type(&self) -> &'static str {
        match self {
            PaymentNotification::RegistrationCommitted(_) => "RegistrationCommitted",
            PaymentNotification::TransferCommitted(_) => "TransferCommitted",
            PaymentNotification::PaymentFailed(_) => "PaymentFailed",
        }
    }

    pub fn data(&self) -> &NotificationData {
        match self {
            PaymentNotification::RegistrationCommitted(data)
            | PaymentNotification::TransferCommitted(data)
            | PaymentNotification::PaymentFailed(data) => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub transaction_id: TransactionId,
    pub land_title_id: AggregateId,
    pub status: TitleState,
    pub payment_status: PaymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockchain_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(
        rename = "transferFee",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transfer_fee: Option<Money>,
    #[serde(rename = "toOwner", default, skip_serializing_if = "Option::is_none")]
    pub to_owner: Option<OwnerDetails>,
    #[serde(rename = "fromOwner", default, skip_serializing_if = "Option::is_none")]
    pub from_owner: Option<OwnerDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payment_confirmed_wire_shape() {
        let title_id = AggregateId::new();
        let message = RegistryMessage::PaymentConfirmed(PaymentEventData {
            transaction_id: TransactionId::new("TXN-7"),
            land_title_id: title_id,
            status: TitleState::Active,
            payment_status: PaymentState::Paid,
            transfer_id: None,
            transfer_fee: Some(Money::from_cents(250_000)),
            to_owner: Some(OwnerDetails::named("Jose Rizal")),
            from_owner: Some(OwnerDetails::named("Maria Santos")),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "PaymentConfirmed");
        assert_eq!(value["data"]["transaction_id"], "TXN-7");
        assert_eq!(value["data"]["status"], "ACTIVE");
        assert_eq!(value["data"]["payment_status"], "PAID");
        assert_eq!(value["data"]["transferFee"], 250_000);
        assert_eq!(value["data"]["toOwner"]["name"], "Jose Rizal");
        assert_eq!(value["data"]["fromOwner"]["name"], "Maria Santos");
        assert!(value["data"].get("transfer_id").is_none());
    }

    #[test]
    fn decodes_minimal_payload() {
        let title_id = AggregateId::new();
        let value = json!({
            "type": "PaymentCancelled",
            "data": {
                "transaction_id": "TXN-1",
                "land_title_id": title_id,
                "status": "ACTIVE",
                "payment_status": "CANCELLED"
            }
        });

        let message: RegistryMessage = serde_json::from_value(value).unwrap();
        assert_eq!(message.message_type(), "PaymentCancelled");
        assert_eq!(message.transaction_id().as_str(), "TXN-1");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let value = json!({"type": "TitleSubdivided", "data": {}});
        assert!(serde_json::from_value::<RegistryMessage>(value).is_err());
    }
}
