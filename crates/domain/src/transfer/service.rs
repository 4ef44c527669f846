//! Transfer service.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandOptions, CommandResult};
use crate::error::DomainError;
use crate::land_title::LandTitle;

use super::{CancelTransfer, CompleteTransfer, CreateTransfer, Transfer, UpdateTransfer};

/// Service for managing ownership transfers.
///
/// Reads titles through its own handler to check the title state at creation
/// time; it never writes to a title.
pub struct TransferService<S: EventStore> {
    handler: CommandHandler<S, Transfer>,
    titles: CommandHandler<S, LandTitle>,
}

impl<S: EventStore + Clone> Clone for TransferService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            titles: self.titles.clone(),
        }
    }
}

impl<S: EventStore + Clone> TransferService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store.clone()),
            titles: CommandHandler::new(store),
        }
    }
}

impl<S: EventStore> TransferService<S> {
    pub fn handler(&self) -> &CommandHandler<S, Transfer> {
        &self.handler
    }

    /// Opens a transfer for an ACTIVE title.
    #[tracing::instrument(skip(self, cmd), fields(title_id = %cmd.land_title_id))]
    pub async fn create(&self, cmd: CreateTransfer) -> Result<CommandResult<Transfer>, DomainError> {
        let title = self.titles.load_required(cmd.land_title_id).await?;

        self.handler
            .execute(cmd.transfer_id, |transfer| {
                transfer.create(
                    cmd.transfer_id,
                    cmd.land_title_id,
                    title.title_number(),
                    title.state(),
                    title.owner(),
                    &cmd.buyer,
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update(&self, cmd: UpdateTransfer) -> Result<CommandResult<Transfer>, DomainError> {
        self.handler
            .execute(cmd.transfer_id, |transfer| transfer.update(&cmd.buyer))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(
        &self,
        cmd: CompleteTransfer,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        let options = CommandOptions::correlated(cmd.transaction_id.clone());
        self.handler
            .execute_with(cmd.transfer_id, options, |transfer| {
                transfer.complete(&cmd.transaction_id)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, cmd: CancelTransfer) -> Result<CommandResult<Transfer>, DomainError> {
        self.handler
            .execute(cmd.transfer_id, |transfer| transfer.cancel(cmd.reason.clone()))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_transfer(
        &self,
        transfer_id: AggregateId,
    ) -> Result<Option<Transfer>, DomainError> {
        self.handler.load_existing(transfer_id).await
    }
}
