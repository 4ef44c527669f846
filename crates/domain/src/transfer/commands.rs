//! Transfer commands.

use common::{AggregateId, TransactionId};

use crate::command::Command;
use crate::land_title::OwnerDetails;

use super::Transfer;

/// Command to open a transfer of an ACTIVE title to a buyer.
#[derive(Debug, Clone)]
pub struct CreateTransfer {
    pub transfer_id: AggregateId,
    pub land_title_id: AggregateId,
    pub buyer: OwnerDetails,
}

impl CreateTransfer {
    pub fn new(land_title_id: AggregateId, buyer: OwnerDetails) -> Self {
        Self {
            transfer_id: AggregateId::new(),
            land_title_id,
            buyer,
        }
    }
}

impl Command for CreateTransfer {
    type Aggregate = Transfer;

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }
}

/// Command to replace the buyer details of an open transfer.
#[derive(Debug, Clone)]
pub struct UpdateTransfer {
    pub transfer_id: AggregateId,
    pub buyer: OwnerDetails,
}

impl Command for UpdateTransfer {
    type Aggregate = Transfer;

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }
}

/// Command to complete a transfer once its fee is paid.
#[derive(Debug, Clone)]
pub struct CompleteTransfer {
    pub transfer_id: AggregateId,
    pub transaction_id: TransactionId,
}

impl Command for CompleteTransfer {
    type Aggregate = Transfer;

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }
}

/// Command to cancel an open transfer.
#[derive(Debug, Clone)]
pub struct CancelTransfer {
    pub transfer_id: AggregateId,
    pub reason: Option<String>,
}

impl Command for CancelTransfer {
    type Aggregate = Transfer;

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }
}
