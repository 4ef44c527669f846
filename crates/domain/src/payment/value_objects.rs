//! Value objects for the payment domain.

use common::AggregateId;
use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from a whole-unit value.
    pub fn from_units(units: i64) -> Self {
        Self { cents: units * 100 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole-unit portion.
    pub fn units(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after whole units).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.units().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.units(), self.cents_part())
        }
    }
}

/// What a payment pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Registration fee; confirmation activates the title.
    #[default]
    Registration,
    /// Transfer fee; confirmation completes the transfer.
    Transfer { transfer_id: AggregateId },
}

impl PaymentPurpose {
    pub fn transfer_id(&self) -> Option<AggregateId> {
        match self {
            PaymentPurpose::Registration => None,
            PaymentPurpose::Transfer { transfer_id } => Some(*transfer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(150_000).to_string(), "1500.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
        assert_eq!(Money::from_units(25).cents(), 2500);
    }

    #[test]
    fn money_serializes_as_cents() {
        assert_eq!(serde_json::to_string(&Money::from_cents(999)).unwrap(), "999");
    }

    #[test]
    fn purpose_round_trips_with_kind_tag() {
        let transfer_id = AggregateId::new();
        let purpose = PaymentPurpose::Transfer { transfer_id };
        let json = serde_json::to_value(purpose).unwrap();
        assert_eq!(json["kind"], "transfer");
        let back: PaymentPurpose = serde_json::from_value(json).unwrap();
        assert_eq!(back.transfer_id(), Some(transfer_id));
        assert_eq!(PaymentPurpose::default().transfer_id(), None);
    }
}
