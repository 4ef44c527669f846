//! Payment service.

use common::{AggregateId, TransactionId};
use event_store::{EventStore, EventStoreError};

use crate::command::{CommandHandler, CommandOptions, CommandResult};
use crate::error::DomainError;

use super::{
    CancelPayment, ConfirmPayment, CreatePayment, MarkPaymentFailed, Payment, PaymentError,
    UpdatePayment,
};

/// Unique index over payment transaction ids.
pub const PAYMENT_TRANSACTION_INDEX: &str = "payment.transaction_id";

/// Service for managing payments.
pub struct PaymentService<S: EventStore> {
    handler: CommandHandler<S, Payment>,
}

impl<S: EventStore + Clone> Clone for PaymentService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<S: EventStore> PaymentService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Payment> {
        &self.handler
    }

    /// Creates a PENDING payment. Transaction ids are unique across payments.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, cmd: CreatePayment) -> Result<CommandResult<Payment>, DomainError> {
        let mut options = CommandOptions::default();
        if let Some(tx) = &cmd.transaction_id {
            options = CommandOptions::correlated(tx.clone())
                .with_unique_key(PAYMENT_TRANSACTION_INDEX, tx.as_str());
        }

        let result = self
            .handler
            .execute_with(cmd.payment_id, options, |payment| payment.create(&cmd))
            .await;

        match result {
            Err(DomainError::EventStore(EventStoreError::UniqueViolation { value, .. })) => {
                Err(PaymentError::DuplicateTransaction {
                    transaction_id: TransactionId::new(value),
                }
                .into())
            }
            other => other,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn update(&self, cmd: UpdatePayment) -> Result<CommandResult<Payment>, DomainError> {
        let options = self.correlation(cmd.payment_id).await?;
        self.handler
            .execute_with(cmd.payment_id, options, |payment| payment.update(&cmd))
            .await
    }

    /// Confirms a payment. The title is not touched here; the saga reacts to
    /// the confirmation message.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, cmd: ConfirmPayment) -> Result<CommandResult<Payment>, DomainError> {
        let options = self.correlation(cmd.payment_id).await?;
        let result = self
            .handler
            .execute_with(cmd.payment_id, options, |payment| payment.confirm())
            .await?;
        metrics::counter!("payments_confirmed_total").increment(1);
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, cmd: CancelPayment) -> Result<CommandResult<Payment>, DomainError> {
        let options = self.correlation(cmd.payment_id).await?;
        self.handler
            .execute_with(cmd.payment_id, options, |payment| {
                payment.cancel(cmd.reason.clone())
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_failed(
        &self,
        cmd: MarkPaymentFailed,
    ) -> Result<CommandResult<Payment>, DomainError> {
        let options = self.correlation(cmd.payment_id).await?;
        self.handler
            .execute_with(cmd.payment_id, options, |payment| {
                payment.mark_failed(&cmd.reason)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: AggregateId) -> Result<Option<Payment>, DomainError> {
        self.handler.load_existing(payment_id).await
    }

    pub async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Payment>, DomainError> {
        self.handler
            .find_by_unique(PAYMENT_TRANSACTION_INDEX, transaction_id.as_str())
            .await
    }

    async fn correlation(&self, payment_id: AggregateId) -> Result<CommandOptions, DomainError> {
        let payment = self.handler.load_required(payment_id).await?;
        Ok(payment
            .transaction_id()
            .cloned()
            .map(CommandOptions::correlated)
            .unwrap_or_default())
    }
}
