//! Payment aggregate implementation.

use chrono::Utc;
use common::{AggregateId, TransactionId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    CreatePayment, Money, PaymentError, PaymentEvent, PaymentPurpose, PaymentState,
    UpdatePayment,
    events::{PaymentCreatedData, PaymentUpdatedData},
};

/// Payment aggregate root.
///
/// References a land title but does not own it: confirming a payment never
/// touches the title directly.
#[derive(Debug, Clone, Default)]
pub struct Payment {
    id: Option<AggregateId>,
    version: Version,
    transaction_id: Option<TransactionId>,
    land_title_id: Option<AggregateId>,
    amount: Money,
    payer_name: String,
    payment_method: String,
    purpose: PaymentPurpose,
    state: PaymentState,
    failure_reason: Option<String>,
    cancellation_reason: Option<String>,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PaymentEvent::PaymentCreated(data) => self.apply_created(data),
            PaymentEvent::PaymentUpdated(data) => self.apply_updated(data),
            PaymentEvent::PaymentConfirmed(_) => self.state = PaymentState::Paid,
            PaymentEvent::PaymentCancelled(data) => {
                self.state = PaymentState::Cancelled;
                self.cancellation_reason = data.reason;
            }
            PaymentEvent::PaymentFailed(data) => {
                self.state = PaymentState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl Payment {
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn land_title_id(&self) -> Option<AggregateId> {
        self.land_title_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn payer_name(&self) -> &str {
        &self.payer_name
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn purpose(&self) -> PaymentPurpose {
        self.purpose
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// Command methods (return events)
impl Payment {
    /// Creates a PENDING payment, reporting every missing required field.
    pub fn create(&self, cmd: &CreatePayment) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyCreated);
        }

        let transaction_id = cmd
            .transaction_id
            .as_ref()
            .filter(|tx| !tx.as_str().trim().is_empty());
        let payer_name = present(&cmd.payer_name);
        let payment_method = present(&cmd.payment_method);

        let mut missing_fields = Vec::new();
        if transaction_id.is_none() {
            missing_fields.push("transaction_id");
        }
        if cmd.amount.is_none() {
            missing_fields.push("amount");
        }
        if payer_name.is_none() {
            missing_fields.push("payer_name");
        }
        if payment_method.is_none() {
            missing_fields.push("payment_method");
        }

        let (Some(transaction_id), Some(amount), Some(payer_name), Some(payment_method)) =
            (transaction_id, cmd.amount, payer_name, payment_method)
        else {
            return Err(PaymentError::Validation { missing_fields });
        };

        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount {
                cents: amount.cents(),
            });
        }

        Ok(vec![PaymentEvent::PaymentCreated(PaymentCreatedData {
            payment_id: cmd.payment_id,
            transaction_id: transaction_id.clone(),
            land_title_id: cmd.land_title_id,
            amount,
            payer_name: payer_name.to_string(),
            payment_method: payment_method.to_string(),
            purpose: cmd.purpose,
            created_at: Utc::now(),
        })])
    }

    /// Edits a PENDING payment. An update that changes nothing emits no event.
    pub fn update(&self, cmd: &UpdatePayment) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.state.can_update() {
            return Err(PaymentError::InvalidTransition {
                current_state: self.state,
                action: "update",
            });
        }

        if let Some(amount) = cmd.amount
            && !amount.is_positive()
        {
            return Err(PaymentError::InvalidAmount {
                cents: amount.cents(),
            });
        }

        let payer_name = present(&cmd.payer_name).map(str::to_string);
        let payment_method = present(&cmd.payment_method).map(str::to_string);
        if cmd.amount.is_none() && payer_name.is_none() && payment_method.is_none() {
            return Ok(vec![]);
        }

        Ok(vec![PaymentEvent::PaymentUpdated(PaymentUpdatedData {
            amount: cmd.amount,
            payer_name,
            payment_method,
            updated_at: Utc::now(),
        })])
    }

    /// Confirms a PENDING payment.
    pub fn confirm(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.state.can_confirm() {
            return Err(PaymentError::InvalidTransition {
                current_state: self.state,
                action: "confirm",
            });
        }

        Ok(vec![PaymentEvent::payment_confirmed()])
    }

    /// Cancels a PENDING or PAID payment.
    pub fn cancel(&self, reason: Option<String>) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.state.can_cancel() {
            return Err(PaymentError::InvalidTransition {
                current_state: self.state,
                action: "cancel",
            });
        }

        Ok(vec![PaymentEvent::payment_cancelled(reason)])
    }

    /// Marks a PENDING or PAID payment as FAILED.
    pub fn mark_failed(&self, reason: &str) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.state.can_fail() {
            return Err(PaymentError::InvalidTransition {
                current_state: self.state,
                action: "mark failed",
            });
        }

        Ok(vec![PaymentEvent::payment_failed(reason)])
    }
}

// Apply event helpers
impl Payment {
    fn apply_created(&mut self, data: PaymentCreatedData) {
        self.id = Some(data.payment_id);
        self.transaction_id = Some(data.transaction_id);
        self.land_title_id = Some(data.land_title_id);
        self.amount = data.amount;
        self.payer_name = data.payer_name;
        self.payment_method = data.payment_method;
        self.purpose = data.purpose;
        self.state = PaymentState::Pending;
    }

    fn apply_updated(&mut self, data: PaymentUpdatedData) {
        if let Some(amount) = data.amount {
            self.amount = amount;
        }
        if let Some(payer_name) = data.payer_name {
            self.payer_name = payer_name;
        }
        if let Some(payment_method) = data.payment_method {
            self.payment_method = payment_method;
        }
    }
}
