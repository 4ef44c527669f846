//! Land title service.

use common::{AggregateId, TransactionId};
use event_store::{EventStore, EventStoreError};

use crate::command::{CommandHandler, CommandOptions, CommandResult};
use crate::error::DomainError;

use super::{
    ActivateTitle, CancelTitle, LandTitle, LandTitleError, ReactivateTitle, RegisterTitle,
    RetireTitle, RevertOwnership, RevertTitleToPending, TransferOwnership,
};

/// Unique index over title numbers.
pub const TITLE_NUMBER_INDEX: &str = "land_title.title_number";

/// Unique index over registration transaction ids.
pub const TITLE_TRANSACTION_INDEX: &str = "land_title.transaction_id";

/// Service for managing land titles.
pub struct LandTitleService<S: EventStore> {
    handler: CommandHandler<S, LandTitle>,
}

impl<S: EventStore + Clone> Clone for LandTitleService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<S: EventStore> LandTitleService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, LandTitle> {
        &self.handler
    }

    /// Registers a title in PENDING status.
    ///
    /// A title number or transaction id already in use is reported as a
    /// duplicate and nothing is persisted.
    #[tracing::instrument(skip(self, cmd), fields(title_number = %cmd.title_number))]
    pub async fn register(
        &self,
        cmd: RegisterTitle,
    ) -> Result<CommandResult<LandTitle>, DomainError> {
        let title_id = cmd.title_id;
        let transaction_id = cmd.transaction_id.clone().unwrap_or_else(TransactionId::generate);
        let options = CommandOptions::correlated(transaction_id.clone())
            .with_unique_key(TITLE_NUMBER_INDEX, cmd.title_number.trim())
            .with_unique_key(TITLE_TRANSACTION_INDEX, transaction_id.as_str());

        let result = self
            .handler
            .execute_with(title_id, options, |title| {
                title.register(
                    title_id,
                    &cmd.title_number,
                    &cmd.owner,
                    &cmd.property_location,
                    &cmd.documents,
                    &transaction_id,
                )
            })
            .await;

        match result {
            Err(DomainError::EventStore(EventStoreError::UniqueViolation { index, value, .. })) => {
                if index == TITLE_NUMBER_INDEX {
                    Err(LandTitleError::DuplicateTitle {
                        title_number: value,
                    }
                    .into())
                } else {
                    Err(LandTitleError::DuplicateTransaction {
                        transaction_id: TransactionId::new(value),
                    }
                    .into())
                }
            }
            other => {
                if other.is_ok() {
                    metrics::counter!("land_titles_registered_total").increment(1);
                }
                other
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn activate(&self, cmd: ActivateTitle) -> Result<CommandResult<LandTitle>, DomainError> {
        let tx = cmd.transaction_id.clone();
        self.handler
            .execute_with(cmd.title_id, CommandOptions::correlated(tx), |title| {
                title.activate(&cmd.transaction_id, &cmd.blockchain_hash)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn revert_to_pending(
        &self,
        cmd: RevertTitleToPending,
    ) -> Result<CommandResult<LandTitle>, DomainError> {
        let tx = cmd.transaction_id.clone();
        self.handler
            .execute_with(cmd.title_id, CommandOptions::correlated(tx), |title| {
                title.revert_to_pending(&cmd.transaction_id, cmd.reason)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, cmd: CancelTitle) -> Result<CommandResult<LandTitle>, DomainError> {
        let tx = cmd.transaction_id.clone();
        self.handler
            .execute_with(cmd.title_id, CommandOptions::correlated(tx), |title| {
                title.cancel(&cmd.transaction_id, &cmd.cancellation_hash)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reactivate(
        &self,
        cmd: ReactivateTitle,
    ) -> Result<CommandResult<LandTitle>, DomainError> {
        let tx = cmd.transaction_id.clone();
        self.handler
            .execute_with(cmd.title_id, CommandOptions::correlated(tx), |title| {
                title.reactivate(&cmd.transaction_id, &cmd.reactivation_hash)
            })
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(title_id = %cmd.title_id, transaction_id = %cmd.transaction_id))]
    pub async fn transfer_ownership(
        &self,
        cmd: TransferOwnership,
    ) -> Result<CommandResult<LandTitle>, DomainError> {
        let tx = cmd.transaction_id.clone();
        self.handler
            .execute_with(cmd.title_id, CommandOptions::correlated(tx), |title| {
                title.transfer_ownership(
                    cmd.transfer_id,
                    &cmd.transaction_id,
                    &cmd.buyer,
                    &cmd.seller_hash,
                    &cmd.buyer_hash,
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn revert_ownership(
        &self,
        cmd: RevertOwnership,
    ) -> Result<CommandResult<LandTitle>, DomainError> {
        let tx = cmd.transaction_id.clone();
        self.handler
            .execute_with(cmd.title_id, CommandOptions::correlated(tx), |title| {
                title.revert_ownership(&cmd.transaction_id)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn retire(&self, cmd: RetireTitle) -> Result<CommandResult<LandTitle>, DomainError> {
        self.handler
            .execute(cmd.title_id, |title| title.retire(&cmd.reason))
            .await
    }

    /// Loads a title by ID. Returns None if it doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_title(&self, title_id: AggregateId) -> Result<Option<LandTitle>, DomainError> {
        self.handler.load_existing(title_id).await
    }

    pub async fn find_by_title_number(
        &self,
        title_number: &str,
    ) -> Result<Option<LandTitle>, DomainError> {
        self.handler
            .find_by_unique(TITLE_NUMBER_INDEX, title_number)
            .await
    }

    /// Finds the title registered under a transaction id.
    pub async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<LandTitle>, DomainError> {
        self.handler
            .find_by_unique(TITLE_TRANSACTION_INDEX, transaction_id.as_str())
            .await
    }
}
