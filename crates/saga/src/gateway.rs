//! Entry points that turn user actions into registry messages.
//!
//! The gateway applies the payment-side transition synchronously and leaves
//! everything that touches the ledger to the coordinator.

use common::{AggregateId, TransactionId};
use domain::{
    Aggregate, CancelPayment, ConfirmPayment, DomainError, LandTitleError, LandTitleService, Payment,
    PaymentPurpose, PaymentService, TransferService,
};
use event_store::EventStore;

use crate::error::SagaError;
use crate::messages::{PaymentEventData, REGISTRY_QUEUE, RegistryMessage, TitleChangeData};
use crate::services::{MessageBus, MessageBusExt};

pub struct RegistryGateway<S: EventStore, B: MessageBus> {
    titles: LandTitleService<S>,
    payments: PaymentService<S>,
    transfers: TransferService<S>,
    bus: B,
}

impl<S, B> RegistryGateway<S, B>
where
    S: EventStore + Clone,
    B: MessageBus,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            titles: LandTitleService::new(store.clone()),
            payments: PaymentService::new(store.clone()),
            transfers: TransferService::new(store),
            bus,
        }
    }

    /// Confirms a payment and hands it to the registry.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, payment_id: AggregateId) -> Result<Payment, SagaError> {
        let payment = self
            .payments
            .confirm(ConfirmPayment::new(payment_id))
            .await?
            .aggregate;

        let data = self.payment_event_data(&payment).await?;
        self.bus
            .publish_message(REGISTRY_QUEUE, &RegistryMessage::PaymentConfirmed(data))
            .await?;
        Ok(payment)
    }

    /// Cancels a payment; an already activated title is reverted by the
    /// coordinator.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_payment(
        &self,
        payment_id: AggregateId,
        reason: Option<String>,
    ) -> Result<Payment, SagaError> {
        let payment = self
            .payments
            .cancel(CancelPayment::new(payment_id, reason))
            .await?
            .aggregate;

        let data = self.payment_event_data(&payment).await?;
        self.bus
            .publish_message(REGISTRY_QUEUE, &RegistryMessage::PaymentCancelled(data))
            .await?;
        Ok(payment)
    }

    /// Requests cancellation of an active title. Returns the transaction id
    /// the cancellation saga will run under.
    #[tracing::instrument(skip(self))]
    pub async fn request_title_cancellation(
        &self,
        title_id: AggregateId,
        reason: Option<String>,
    ) -> Result<TransactionId, SagaError> {
        let title = self.titles.handler().load_required(title_id).await?;
        if !title.state().can_cancel() {
            return Err(DomainError::from(LandTitleError::InvalidTransition {
                current_state: title.state(),
                action: "cancel",
            })
            .into());
        }

        let transaction_id = TransactionId::generate();
        let message = RegistryMessage::TitleCancellationRequested(TitleChangeData {
            transaction_id: transaction_id.clone(),
            land_title_id: title_id,
            reason,
        });
        self.bus.publish_message(REGISTRY_QUEUE, &message).await?;
        Ok(transaction_id)
    }

    /// Requests reactivation of a cancelled title.
    #[tracing::instrument(skip(self))]
    pub async fn request_title_reactivation(
        &self,
        title_id: AggregateId,
    ) -> Result<TransactionId, SagaError> {
        let title = self.titles.handler().load_required(title_id).await?;
        if !title.state().can_reactivate() {
            return Err(DomainError::from(LandTitleError::InvalidTransition {
                current_state: title.state(),
                action: "reactivate",
            })
            .into());
        }
        if title.cancellation_hash().is_none() {
            return Err(DomainError::from(LandTitleError::NoPriorCancellation).into());
        }

        let transaction_id = TransactionId::generate();
        let message = RegistryMessage::TitleReactivationRequested(TitleChangeData {
            transaction_id: transaction_id.clone(),
            land_title_id: title_id,
            reason: None,
        });
        self.bus.publish_message(REGISTRY_QUEUE, &message).await?;
        Ok(transaction_id)
    }

    async fn payment_event_data(&self, payment: &Payment) -> Result<PaymentEventData, SagaError> {
        let payment_id = payment.id().unwrap_or_default();
        let transaction_id = payment
            .transaction_id()
            .cloned()
            .ok_or(DomainError::AggregateNotFound {
                aggregate_type: "Payment",
                aggregate_id: payment_id.to_string(),
            })?;
        let land_title_id = payment.land_title_id().ok_or(DomainError::AggregateNotFound {
            aggregate_type: "LandTitle",
            aggregate_id: payment_id.to_string(),
        })?;
        let title = self.titles.handler().load_required(land_title_id).await?;

        let mut data = PaymentEventData {
            transaction_id,
            land_title_id,
            status: title.state(),
            payment_status: payment.state(),
            transfer_id: None,
            transfer_fee: None,
            to_owner: None,
            from_owner: None,
        };

        if let PaymentPurpose::Transfer { transfer_id } = payment.purpose() {
            let transfer = self.transfers.handler().load_required(transfer_id).await?;
            data.transfer_id = Some(transfer_id);
            data.transfer_fee = Some(payment.amount());
            data.to_owner = Some(transfer.buyer().clone());
            data.from_owner = Some(transfer.from_owner().clone());
        }

        Ok(data)
    }
}
