//! Payment commands.

use common::{AggregateId, TransactionId};

use crate::command::Command;

use super::{Money, Payment, PaymentPurpose};

/// Command to create a payment.
///
/// Fields are optional so that every missing one can be reported at once.
#[derive(Debug, Clone, Default)]
pub struct CreatePayment {
    pub payment_id: AggregateId,
    pub land_title_id: AggregateId,
    pub purpose: PaymentPurpose,
    pub transaction_id: Option<TransactionId>,
    pub amount: Option<Money>,
    pub payer_name: Option<String>,
    pub payment_method: Option<String>,
}

impl CreatePayment {
    /// Creates a fully populated registration payment.
    pub fn registration(
        land_title_id: AggregateId,
        transaction_id: TransactionId,
        amount: Money,
        payer_name: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            payment_id: AggregateId::new(),
            land_title_id,
            purpose: PaymentPurpose::Registration,
            transaction_id: Some(transaction_id),
            amount: Some(amount),
            payer_name: Some(payer_name.into()),
            payment_method: Some(payment_method.into()),
        }
    }

    /// Creates a fully populated transfer-fee payment.
    pub fn transfer_fee(
        land_title_id: AggregateId,
        transfer_id: AggregateId,
        transaction_id: TransactionId,
        amount: Money,
        payer_name: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            purpose: PaymentPurpose::Transfer { transfer_id },
            ..Self::registration(land_title_id, transaction_id, amount, payer_name, payment_method)
        }
    }
}

impl Command for CreatePayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to edit a pending payment. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdatePayment {
    pub payment_id: AggregateId,
    pub amount: Option<Money>,
    pub payer_name: Option<String>,
    pub payment_method: Option<String>,
}

impl Command for UpdatePayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to confirm a payment.
#[derive(Debug, Clone)]
pub struct ConfirmPayment {
    pub payment_id: AggregateId,
}

impl ConfirmPayment {
    pub fn new(payment_id: AggregateId) -> Self {
        Self { payment_id }
    }
}

impl Command for ConfirmPayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to cancel a payment.
#[derive(Debug, Clone)]
pub struct CancelPayment {
    pub payment_id: AggregateId,
    pub reason: Option<String>,
}

impl CancelPayment {
    pub fn new(payment_id: AggregateId, reason: Option<String>) -> Self {
        Self { payment_id, reason }
    }
}

impl Command for CancelPayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to mark a payment failed after a saga compensation.
#[derive(Debug, Clone)]
pub struct MarkPaymentFailed {
    pub payment_id: AggregateId,
    pub reason: String,
}

impl MarkPaymentFailed {
    pub fn new(payment_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            payment_id,
            reason: reason.into(),
        }
    }
}

impl Command for MarkPaymentFailed {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}
