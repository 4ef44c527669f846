//! Saga coordinator for the land registry flows.
//!
//! Every flow has the same shape: validate the entities, record the saga
//! start, write to the ledger, then either commit the state-machine
//! transitions or compensate. The saga log is event-sourced so a redelivered
//! message finds the saga again and either discards itself or resumes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use common::{AggregateId, TransactionId};
use domain::{
    ActivateTitle, Aggregate, CancelTitle, CancelTransfer, CompleteTransfer, DomainError,
    DomainEvent, LandTitle, LandTitleService, MarkPaymentFailed, OwnerDetails, Payment,
    PaymentPurpose, PaymentService, PaymentState, ReactivateTitle, RevertOwnership, RevertReason,
    RevertTitleToPending, TitleState, Transfer, TransferOwnership, TransferService, TransferState,
};
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreError, UniqueKey, Version};
use serde_json::json;
use tokio::sync::OwnedMutexGuard;

use crate::aggregate::SagaInstance;
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::flows::{self, SagaFlow};
use crate::messages::{
    NotificationData, PAYMENT_QUEUE, PaymentEventData, PaymentNotification, RegistryMessage,
    TitleChangeData,
};
use crate::services::{LedgerError, LedgerReceipt, LedgerService, MessageBus, MessageBusExt};
use crate::state::SagaState;

/// Default bound on a single ledger write.
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(5);

/// What handling a message amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Ledger writes succeeded and every transition was applied.
    Committed { saga_id: AggregateId },
    /// A ledger write failed and the saga rolled back.
    Compensated { saga_id: AggregateId, reason: String },
    /// A transition was applied without a saga (payment cancellation).
    Applied,
    /// Preconditions did not hold; the message is a no-op.
    Discarded { reason: String },
    /// The message arrived before its preconditions can hold; redeliver later.
    Deferred { reason: String },
}

impl SagaOutcome {
    fn discarded(reason: impl Into<String>) -> Self {
        SagaOutcome::Discarded {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LedgerWrite {
    Record,
    Update,
}

struct LedgerStep {
    key: String,
    kind: LedgerWrite,
    payload: serde_json::Value,
}

/// One async mutex per title; concurrent messages for a title run in order.
///
/// An entry lives only while someone holds or waits for it.
#[derive(Debug, Default)]
struct TitleLocks {
    locks: Mutex<HashMap<AggregateId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TitleLocks {
    async fn acquire(&self, title_id: AggregateId) -> TitleGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(title_id)
            .or_default()
            .clone();
        TitleGuard {
            locks: self,
            title_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct TitleGuard<'a> {
    locks: &'a TitleLocks,
    title_id: AggregateId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TitleGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The map's own handle is the last one left: nobody holds or awaits it.
        let idle = locks
            .get(&self.title_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.title_id);
        }
    }
}

/// Orchestrates registration, transfer, cancellation and reactivation sagas.
///
/// The coordinator never writes entity fields itself; it only invokes the
/// state-machine services and records its own progress in the saga log.
pub struct SagaCoordinator<S, L, B>
where
    S: EventStore,
    L: LedgerService,
    B: MessageBus,
{
    store: S,
    titles: LandTitleService<S>,
    payments: PaymentService<S>,
    transfers: TransferService<S>,
    ledger: L,
    bus: B,
    ledger_timeout: Duration,
    locks: TitleLocks,
}

impl<S, L, B> SagaCoordinator<S, L, B>
where
    S: EventStore + Clone,
    L: LedgerService,
    B: MessageBus,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, ledger: L, bus: B) -> Self {
        Self {
            titles: LandTitleService::new(store.clone()),
            payments: PaymentService::new(store.clone()),
            transfers: TransferService::new(store.clone()),
            store,
            ledger,
            bus,
            ledger_timeout: DEFAULT_LEDGER_TIMEOUT,
            locks: TitleLocks::default(),
        }
    }

    /// Bounds every ledger write; an elapsed timeout compensates like any
    /// other ledger failure.
    pub fn with_ledger_timeout(mut self, timeout: Duration) -> Self {
        self.ledger_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Handles one inbound message.
    ///
    /// Precondition mismatches are returned as `Discarded`, never as errors;
    /// errors are reserved for infrastructure failures.
    #[tracing::instrument(
        skip(self, message),
        fields(message_type = message.message_type(), transaction_id = %message.transaction_id())
    )]
    pub async fn handle(&self, message: RegistryMessage) -> Result<SagaOutcome, SagaError> {
        let outcome = match message {
            RegistryMessage::PaymentConfirmed(data) => self.on_payment_confirmed(data).await?,
            RegistryMessage::PaymentCancelled(data) => self.on_payment_cancelled(data).await?,
            RegistryMessage::TitleCancellationRequested(data) => {
                self.run_title_change(SagaFlow::TitleCancellation, data)
                    .await?
            }
            RegistryMessage::TitleReactivationRequested(data) => {
                self.run_title_change(SagaFlow::TitleReactivation, data)
                    .await?
            }
        };

        match &outcome {
            SagaOutcome::Discarded { reason } => {
                metrics::counter!("saga_discarded_total").increment(1);
                tracing::info!(%reason, "message discarded");
            }
            SagaOutcome::Deferred { reason } => {
                tracing::info!(%reason, "message deferred");
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Gives up on a message that can no longer be handled.
    ///
    /// A confirmed payment whose saga never committed is compensated: the
    /// payment is marked FAILED and `PaymentFailed` is published, with a saga
    /// log recorded even if no saga had started. A title change with an
    /// unfinished saga is compensated too. Anything else is discarded.
    #[tracing::instrument(
        skip(self, message),
        fields(message_type = message.message_type(), transaction_id = %message.transaction_id())
    )]
    pub async fn reject(
        &self,
        message: RegistryMessage,
        reason: &str,
    ) -> Result<SagaOutcome, SagaError> {
        metrics::counter!("saga_rejected_total").increment(1);
        tracing::warn!(%reason, "rejecting message");

        match message {
            RegistryMessage::PaymentConfirmed(data) => {
                self.reject_payment(&data.transaction_id, reason).await
            }
            RegistryMessage::TitleCancellationRequested(data) => {
                self.reject_title_change(SagaFlow::TitleCancellation, data, reason)
                    .await
            }
            RegistryMessage::TitleReactivationRequested(data) => {
                self.reject_title_change(SagaFlow::TitleReactivation, data, reason)
                    .await
            }
            RegistryMessage::PaymentCancelled(_) => {
                Ok(SagaOutcome::discarded("payment cancellation has nothing to roll back"))
            }
        }
    }

    /// Cancels a transfer under its title's lock, so the cancellation cannot
    /// land in the middle of a transfer saga's commit.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_transfer(&self, cmd: CancelTransfer) -> Result<Transfer, SagaError> {
        let transfer = self.transfers.handler().load_required(cmd.transfer_id).await?;
        let title_id = transfer
            .land_title_id()
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: "LandTitle",
                aggregate_id: cmd.transfer_id.to_string(),
            })?;

        let _guard = self.locks.acquire(title_id).await;
        Ok(self.transfers.cancel(cmd).await?.aggregate)
    }

    async fn reject_payment(
        &self,
        tx: &TransactionId,
        reason: &str,
    ) -> Result<SagaOutcome, SagaError> {
        let Some(payment) = self.payments.find_by_transaction(tx).await? else {
            return Ok(SagaOutcome::discarded("no payment for transaction"));
        };
        let Some(title_id) = payment.land_title_id() else {
            return Ok(SagaOutcome::discarded("payment has no land title"));
        };
        let (flow, transfer_id) = match payment.purpose() {
            PaymentPurpose::Registration => (SagaFlow::Registration, None),
            PaymentPurpose::Transfer { transfer_id } => (SagaFlow::Transfer, Some(transfer_id)),
        };

        let _guard = self.locks.acquire(title_id).await;

        let saga = match self.find_saga(flow, tx).await? {
            Some(saga) => saga,
            None => {
                let state = self
                    .payments
                    .find_by_transaction(tx)
                    .await?
                    .map(|payment| payment.state())
                    .unwrap_or_default();
                if state.is_terminal() {
                    return Ok(SagaOutcome::discarded(format!("payment is {state}")));
                }
                match self.start_saga(flow, tx, title_id, transfer_id).await? {
                    Some(saga) => saga,
                    None => return Ok(SagaOutcome::discarded("saga already started")),
                }
            }
        };

        self.abandon(saga, reason).await
    }

    async fn reject_title_change(
        &self,
        flow: SagaFlow,
        data: TitleChangeData,
        reason: &str,
    ) -> Result<SagaOutcome, SagaError> {
        let _guard = self.locks.acquire(data.land_title_id).await;

        match self.find_saga(flow, &data.transaction_id).await? {
            Some(saga) => self.abandon(saga, reason).await,
            None => Ok(SagaOutcome::discarded("no saga to roll back")),
        }
    }

    /// Compensates a saga that has not reached a terminal state.
    async fn abandon(
        &self,
        mut saga: SagaInstance,
        reason: &str,
    ) -> Result<SagaOutcome, SagaError> {
        if !saga.state().is_in_flight() {
            return Ok(SagaOutcome::discarded(format!(
                "saga already {}",
                saga.state()
            )));
        }
        let reason = saga.failure_reason().unwrap_or(reason).to_string();
        self.compensate(&mut saga, &reason).await
    }

    async fn on_payment_confirmed(&self, data: PaymentEventData) -> Result<SagaOutcome, SagaError> {
        let tx = data.transaction_id;
        let Some(payment) = self.payments.find_by_transaction(&tx).await? else {
            return Ok(SagaOutcome::discarded("no payment for transaction"));
        };

        match payment.purpose() {
            PaymentPurpose::Registration => {
                let Some(title_id) = payment.land_title_id() else {
                    return Ok(SagaOutcome::discarded("payment has no land title"));
                };
                self.run_registration(&tx, title_id).await
            }
            PaymentPurpose::Transfer { transfer_id } => self.run_transfer(&tx, transfer_id).await,
        }
    }

    /// Reverts a title activated under the cancelled payment.
    async fn on_payment_cancelled(&self, data: PaymentEventData) -> Result<SagaOutcome, SagaError> {
        let tx = data.transaction_id;
        let Some(payment) = self.payments.find_by_transaction(&tx).await? else {
            return Ok(SagaOutcome::discarded("no payment for transaction"));
        };
        if payment.purpose() != PaymentPurpose::Registration {
            return Ok(SagaOutcome::discarded(
                "transfer fee cancellation leaves the title unchanged",
            ));
        }
        let Some(title_id) = payment.land_title_id() else {
            return Ok(SagaOutcome::discarded("payment has no land title"));
        };

        let _guard = self.locks.acquire(title_id).await;

        let Some(title) = self.titles.get_title(title_id).await? else {
            return Ok(SagaOutcome::discarded("land title not found"));
        };
        if !title.is_active_for(&tx) {
            return Ok(SagaOutcome::discarded(format!(
                "title is {} and not active under {tx}",
                title.state()
            )));
        }

        self.titles
            .revert_to_pending(RevertTitleToPending::new(
                title_id,
                tx,
                RevertReason::PaymentCancelled,
            ))
            .await?;
        tracing::info!(%title_id, "title reverted after payment cancellation");

        Ok(SagaOutcome::Applied)
    }

    /// Activates the payment's title. The title may have been registered
    /// under this transaction or, after a rollback, under an earlier one.
    async fn run_registration(
        &self,
        tx: &TransactionId,
        title_id: AggregateId,
    ) -> Result<SagaOutcome, SagaError> {
        if let Some(registered) = self.titles.find_by_transaction(tx).await? {
            if registered.id() != Some(title_id) {
                return Ok(SagaOutcome::discarded(
                    "payment and registration name different titles",
                ));
            }
        }

        let _guard = self.locks.acquire(title_id).await;

        if let Some(saga) = self.find_saga(SagaFlow::Registration, tx).await? {
            return self.resume(saga).await;
        }

        match self.payments.find_by_transaction(tx).await? {
            Some(payment) if payment.state() == PaymentState::Paid => {}
            Some(payment) => {
                return Ok(SagaOutcome::discarded(format!(
                    "payment is {}",
                    payment.state()
                )));
            }
            None => return Ok(SagaOutcome::discarded("no payment for transaction")),
        }

        let Some(title) = self.titles.get_title(title_id).await? else {
            return Ok(SagaOutcome::discarded("land title not found"));
        };
        if title.state() != TitleState::Pending {
            return Ok(SagaOutcome::discarded(format!("title is {}", title.state())));
        }

        match self
            .start_saga(SagaFlow::Registration, tx, title_id, None)
            .await?
        {
            Some(saga) => self.execute(saga).await,
            None => Ok(SagaOutcome::discarded("saga already started")),
        }
    }

    async fn run_transfer(
        &self,
        tx: &TransactionId,
        transfer_id: AggregateId,
    ) -> Result<SagaOutcome, SagaError> {
        let Some(title_id) = self
            .transfers
            .get_transfer(transfer_id)
            .await?
            .and_then(|transfer| transfer.land_title_id())
        else {
            return Ok(SagaOutcome::discarded("transfer not found"));
        };

        let _guard = self.locks.acquire(title_id).await;

        if let Some(saga) = self.find_saga(SagaFlow::Transfer, tx).await? {
            return self.resume(saga).await;
        }

        match self.payments.find_by_transaction(tx).await? {
            Some(payment) if payment.state() == PaymentState::Paid => {}
            Some(payment) => {
                return Ok(SagaOutcome::discarded(format!(
                    "payment is {}",
                    payment.state()
                )));
            }
            None => return Ok(SagaOutcome::discarded("no payment for transaction")),
        }

        let transfer = self.transfers.handler().load_required(transfer_id).await?;
        if transfer.state() != TransferState::Pending {
            return Ok(SagaOutcome::discarded(format!(
                "transfer is {}",
                transfer.state()
            )));
        }

        let title = self.titles.handler().load_required(title_id).await?;
        if title.state() != TitleState::Active {
            return Ok(SagaOutcome::Deferred {
                reason: format!("title is {}", title.state()),
            });
        }

        match self
            .start_saga(SagaFlow::Transfer, tx, title_id, Some(transfer_id))
            .await?
        {
            Some(saga) => self.execute(saga).await,
            None => Ok(SagaOutcome::discarded("saga already started")),
        }
    }

    async fn run_title_change(
        &self,
        flow: SagaFlow,
        data: TitleChangeData,
    ) -> Result<SagaOutcome, SagaError> {
        let tx = data.transaction_id;
        let title_id = data.land_title_id;

        let _guard = self.locks.acquire(title_id).await;

        if let Some(saga) = self.find_saga(flow, &tx).await? {
            return self.resume(saga).await;
        }

        let Some(title) = self.titles.get_title(title_id).await? else {
            return Ok(SagaOutcome::discarded("land title not found"));
        };
        let allowed = match flow {
            SagaFlow::TitleCancellation => title.state().can_cancel(),
            SagaFlow::TitleReactivation => {
                title.state().can_reactivate() && title.cancellation_hash().is_some()
            }
            SagaFlow::Registration | SagaFlow::Transfer => false,
        };
        if !allowed {
            return Ok(SagaOutcome::discarded(format!(
                "{flow} not allowed for {} title",
                title.state()
            )));
        }

        match self.start_saga(flow, &tx, title_id, None).await? {
            Some(saga) => self.execute(saga).await,
            None => Ok(SagaOutcome::discarded("saga already started")),
        }
    }

    /// Picks up a saga found in the log for a redelivered message.
    async fn resume(&self, mut saga: SagaInstance) -> Result<SagaOutcome, SagaError> {
        let state = saga.state();
        tracing::info!(saga_id = ?saga.id(), %state, "found existing saga");

        match state {
            _ if state.is_terminal() => {
                Ok(SagaOutcome::discarded(format!("saga already {state}")))
            }
            SagaState::NotStarted | SagaState::Initiated => self.execute(saga).await,
            SagaState::LedgerPending if saga.ledger_writes_complete() => {
                self.commit(&mut saga).await
            }
            SagaState::LedgerPending => {
                self.compensate(&mut saga, "saga interrupted before ledger writes completed")
                    .await
            }
            _ => {
                let reason = saga
                    .failure_reason()
                    .unwrap_or("compensation interrupted")
                    .to_string();
                self.compensate(&mut saga, &reason).await
            }
        }
    }

    /// Issues the ledger writes, then commits or compensates.
    #[tracing::instrument(skip(self, saga), fields(saga_id = ?saga.id(), flow = ?saga.flow()))]
    async fn execute(&self, mut saga: SagaInstance) -> Result<SagaOutcome, SagaError> {
        let started = Instant::now();
        let (flow, _, _) = saga_context(&saga)?;
        if !saga.state().can_write_ledger() {
            return Err(SagaError::InvalidState {
                expected: "INITIATED or LEDGER_PENDING".to_string(),
                actual: saga.state(),
            });
        }

        let plan = self.ledger_plan(&saga).await?;
        let keys = plan.iter().map(|step| step.key.clone()).collect();
        self.record(&mut saga, SagaEvent::ledger_write_started(keys))
            .await?;

        for step in &plan {
            tracing::info!(step = flows::STEP_LEDGER_WRITE, key = %step.key, "saga step started");
            match self.ledger_write(step).await {
                Ok(receipt) => {
                    self.record(
                        &mut saga,
                        SagaEvent::ledger_write_succeeded(
                            &step.key,
                            receipt.transaction_id,
                            receipt.hash,
                        ),
                    )
                    .await?;
                }
                Err(e) => {
                    self.record(&mut saga, SagaEvent::ledger_write_failed(&step.key, e.to_string()))
                        .await?;
                    let outcome = self
                        .compensate(&mut saga, &format!("ledger write failed: {e}"))
                        .await?;
                    metrics::histogram!("saga_duration_seconds", "flow" => flow.as_str())
                        .record(started.elapsed().as_secs_f64());
                    return Ok(outcome);
                }
            }
        }
        self.record(&mut saga, SagaEvent::step_completed(flows::STEP_LEDGER_WRITE))
            .await?;

        let outcome = self.commit(&mut saga).await?;
        metrics::histogram!("saga_duration_seconds", "flow" => flow.as_str())
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn ledger_plan(&self, saga: &SagaInstance) -> Result<Vec<LedgerStep>, SagaError> {
        let (flow, tx, title_id) = saga_context(saga)?;
        let title = self.titles.handler().load_required(title_id).await?;

        let plan = match flow {
            SagaFlow::Registration => {
                let key = title.title_number().to_string();
                // A title rolled back after payment cancellation is still live.
                let live = tokio::time::timeout(self.ledger_timeout, self.ledger.query(&key)).await;
                let kind = match live {
                    Ok(Ok(_)) => LedgerWrite::Update,
                    _ => LedgerWrite::Record,
                };
                vec![LedgerStep {
                    key,
                    kind,
                    payload: title_record(&title, &tx, TitleState::Active),
                }]
            }
            SagaFlow::Transfer => {
                let transfer_id = saga
                    .transfer_id()
                    .ok_or_else(|| incomplete(saga, "transfer"))?;
                let transfer = self.transfers.handler().load_required(transfer_id).await?;
                vec![
                    LedgerStep {
                        key: flows::seller_key(title.title_number(), transfer_id),
                        kind: LedgerWrite::Record,
                        payload: transfer_record(&transfer, transfer_id, &tx, "seller", transfer.from_owner()),
                    },
                    LedgerStep {
                        key: flows::buyer_key(title.title_number(), transfer_id),
                        kind: LedgerWrite::Record,
                        payload: transfer_record(&transfer, transfer_id, &tx, "buyer", transfer.buyer()),
                    },
                ]
            }
            SagaFlow::TitleCancellation => vec![LedgerStep {
                key: title.title_number().to_string(),
                kind: LedgerWrite::Update,
                payload: title_record(&title, &tx, TitleState::Pending),
            }],
            SagaFlow::TitleReactivation => vec![LedgerStep {
                key: title.title_number().to_string(),
                kind: LedgerWrite::Update,
                payload: title_record(&title, &tx, TitleState::Active),
            }],
        };
        Ok(plan)
    }

    /// Applies the state-machine transitions once every ledger write
    /// succeeded. Each step checks whether it already happened, so a resumed
    /// saga rolls forward without repeating work.
    async fn commit(&self, saga: &mut SagaInstance) -> Result<SagaOutcome, SagaError> {
        let (flow, tx, title_id) = saga_context(saga)?;
        let saga_id = saga.id().ok_or_else(|| incomplete(saga, "id"))?;

        match flow {
            SagaFlow::Registration => {
                let hash = receipt_hash(saga, 0)?;
                let title = self.titles.handler().load_required(title_id).await?;
                if !title.is_active_for(&tx) {
                    self.titles
                        .activate(ActivateTitle::new(title_id, tx.clone(), hash))
                        .await?;
                    self.record(saga, SagaEvent::step_completed(flows::STEP_ACTIVATE_TITLE))
                        .await?;
                }
                let data = self.notification_data(saga, None).await?;
                self.notify(saga, PaymentNotification::RegistrationCommitted(data))
                    .await?;
            }
            SagaFlow::Transfer => {
                let transfer_id = saga
                    .transfer_id()
                    .ok_or_else(|| incomplete(saga, "transfer"))?;
                let seller_hash = receipt_hash(saga, 0)?;
                let buyer_hash = receipt_hash(saga, 1)?;
                let transfer = self.transfers.handler().load_required(transfer_id).await?;

                match transfer.state() {
                    TransferState::Cancelled => {
                        return self
                            .compensate(saga, "transfer cancelled before completion")
                            .await;
                    }
                    TransferState::Pending => {
                        let title = self.titles.handler().load_required(title_id).await?;
                        if !title.has_ownership_change(&tx) {
                            self.titles
                                .transfer_ownership(TransferOwnership {
                                    title_id,
                                    transfer_id,
                                    transaction_id: tx.clone(),
                                    buyer: transfer.buyer().clone(),
                                    seller_hash,
                                    buyer_hash,
                                })
                                .await?;
                            self.record(
                                saga,
                                SagaEvent::step_completed(flows::STEP_TRANSFER_OWNERSHIP),
                            )
                            .await?;
                        }
                        let completed = self
                            .transfers
                            .complete(CompleteTransfer {
                                transfer_id,
                                transaction_id: tx.clone(),
                            })
                            .await;
                        match completed {
                            Ok(_) => {}
                            Err(e) if e.is_conflict() => return Err(e.into()),
                            // Ownership and completion roll back together.
                            Err(e) => {
                                return self
                                    .compensate(saga, &format!("transfer could not complete: {e}"))
                                    .await;
                            }
                        }
                        self.record(saga, SagaEvent::step_completed(flows::STEP_COMPLETE_TRANSFER))
                            .await?;
                    }
                    TransferState::Completed => {}
                }

                let data = self.notification_data(saga, None).await?;
                self.notify(saga, PaymentNotification::TransferCommitted(data))
                    .await?;
            }
            SagaFlow::TitleCancellation => {
                let hash = receipt_hash(saga, 0)?;
                let title = self.titles.handler().load_required(title_id).await?;
                if title.cancellation_hash() != Some(hash.as_str()) {
                    self.titles
                        .cancel(CancelTitle::new(title_id, tx.clone(), hash))
                        .await?;
                    self.record(saga, SagaEvent::step_completed(flows::STEP_CANCEL_TITLE))
                        .await?;
                }
            }
            SagaFlow::TitleReactivation => {
                let hash = receipt_hash(saga, 0)?;
                let title = self.titles.handler().load_required(title_id).await?;
                if title.reactivation_hash() != Some(hash.as_str()) {
                    self.titles
                        .reactivate(ReactivateTitle::new(title_id, tx.clone(), hash))
                        .await?;
                    self.record(saga, SagaEvent::step_completed(flows::STEP_REACTIVATE_TITLE))
                        .await?;
                }
            }
        }

        self.record(saga, SagaEvent::saga_committed()).await?;
        metrics::counter!("saga_committed_total", "flow" => flow.as_str()).increment(1);
        tracing::info!(%saga_id, %flow, "saga committed");

        Ok(SagaOutcome::Committed { saga_id })
    }

    /// Rolls back whatever the saga changed and reports the failure.
    ///
    /// Safe to re-run: every step checks whether it is still needed.
    #[tracing::instrument(skip(self, saga), fields(saga_id = ?saga.id()))]
    async fn compensate(
        &self,
        saga: &mut SagaInstance,
        reason: &str,
    ) -> Result<SagaOutcome, SagaError> {
        let (flow, tx, title_id) = saga_context(saga)?;
        let saga_id = saga.id().ok_or_else(|| incomplete(saga, "id"))?;
        if !saga.state().can_compensate() {
            return Err(SagaError::InvalidState {
                expected: "a saga that has not finished".to_string(),
                actual: saga.state(),
            });
        }

        if saga.state() != SagaState::Compensating {
            self.record(saga, SagaEvent::compensation_started(reason))
                .await?;
        }

        let title = self.titles.handler().load_required(title_id).await?;
        match flow {
            SagaFlow::Registration if title.is_active_for(&tx) => {
                self.titles
                    .revert_to_pending(RevertTitleToPending::new(
                        title_id,
                        tx.clone(),
                        RevertReason::LedgerWriteFailed,
                    ))
                    .await?;
                self.record(saga, SagaEvent::compensation_step_completed(flows::STEP_REVERT_TITLE))
                    .await?;
            }
            SagaFlow::Transfer if title.has_ownership_change(&tx) => {
                self.titles
                    .revert_ownership(RevertOwnership::new(title_id, tx.clone()))
                    .await?;
                self.record(
                    saga,
                    SagaEvent::compensation_step_completed(flows::STEP_REVERT_OWNERSHIP),
                )
                .await?;
            }
            _ => {}
        }

        if flow.is_payment_flow() {
            let payment = self.payments.find_by_transaction(&tx).await?;
            if let Some(payment) = payment.filter(|p| p.state().can_fail()) {
                let payment_id = payment.id().ok_or_else(|| incomplete(saga, "payment"))?;
                self.payments
                    .mark_failed(MarkPaymentFailed::new(payment_id, reason))
                    .await?;
                self.record(saga, SagaEvent::compensation_step_completed(flows::STEP_FAIL_PAYMENT))
                    .await?;
            }

            let data = self
                .notification_data(saga, Some(reason.to_string()))
                .await?;
            self.notify(saga, PaymentNotification::PaymentFailed(data))
                .await?;
        }

        self.record(saga, SagaEvent::saga_compensated(reason))
            .await?;

        metrics::counter!("saga_compensated_total", "flow" => flow.as_str()).increment(1);
        tracing::warn!(%saga_id, %flow, transaction_id = %tx, %reason, "saga compensated");

        Ok(SagaOutcome::Compensated {
            saga_id,
            reason: reason.to_string(),
        })
    }

    /// Runs one ledger write under the configured timeout.
    async fn ledger_write(&self, step: &LedgerStep) -> Result<LedgerReceipt, LedgerError> {
        let started = Instant::now();
        let write = async {
            match step.kind {
                LedgerWrite::Record => self.ledger.record(&step.key, &step.payload).await,
                LedgerWrite::Update => self.ledger.update(&step.key, &step.payload).await,
            }
        };

        let result = match tokio::time::timeout(self.ledger_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.ledger_timeout)),
        };

        metrics::counter!("ledger_writes_total").increment(1);
        metrics::histogram!("ledger_write_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!("ledger_write_failures_total").increment(1);
            tracing::warn!(key = %step.key, error = %e, "ledger write failed");
        }

        result
    }

    /// Publishes a notification unless the saga log shows it already went out.
    async fn notify(
        &self,
        saga: &mut SagaInstance,
        notification: PaymentNotification,
    ) -> Result<(), SagaError> {
        let kind = notification.message_type();
        if saga.has_published(kind) {
            return Ok(());
        }

        self.bus
            .publish_message(PAYMENT_QUEUE, &notification)
            .await?;
        self.record(saga, SagaEvent::notification_published(kind))
            .await
    }

    async fn notification_data(
        &self,
        saga: &SagaInstance,
        reason: Option<String>,
    ) -> Result<NotificationData, SagaError> {
        let (_, tx, title_id) = saga_context(saga)?;
        let title = self.titles.handler().load_required(title_id).await?;
        let payment: Option<Payment> = self.payments.find_by_transaction(&tx).await?;
        let transfer: Option<Transfer> = match saga.transfer_id() {
            Some(transfer_id) => self.transfers.get_transfer(transfer_id).await?,
            None => None,
        };

        Ok(NotificationData {
            transaction_id: tx,
            land_title_id: title_id,
            status: title.state(),
            payment_status: payment.as_ref().map(Payment::state).unwrap_or_default(),
            blockchain_hash: title.blockchain_hash().map(str::to_string),
            reason,
            transfer_fee: transfer
                .as_ref()
                .and(payment.as_ref())
                .map(Payment::amount),
            to_owner: transfer.as_ref().map(|t| t.buyer().clone()),
            from_owner: transfer.as_ref().map(|t| t.from_owner().clone()),
        })
    }

    /// Records the start of a saga, claiming its correlation key.
    ///
    /// Returns `None` if another saga already owns the key.
    async fn start_saga(
        &self,
        flow: SagaFlow,
        tx: &TransactionId,
        title_id: AggregateId,
        transfer_id: Option<AggregateId>,
    ) -> Result<Option<SagaInstance>, SagaError> {
        let saga_id = AggregateId::new();
        let started = SagaEvent::saga_started(saga_id, flow, tx.clone(), title_id, transfer_id);
        let options = AppendOptions::expect_new().with_unique_key(UniqueKey::new(
            flows::SAGA_CORRELATION_INDEX,
            flow.correlation_key(tx.as_str()),
        ));

        let version = match self
            .append_saga_event(saga_id, Version::initial(), Some(tx), &started, options)
            .await
        {
            Ok(version) => version,
            Err(SagaError::EventStore(EventStoreError::UniqueViolation { .. })) => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut saga = SagaInstance::default();
        saga.apply(started);
        saga.set_version(version);

        metrics::counter!("saga_started_total", "flow" => flow.as_str()).increment(1);
        tracing::info!(%saga_id, %flow, transaction_id = %tx, "saga started");

        Ok(Some(saga))
    }

    /// Appends an event to a started saga and folds it in.
    async fn record(&self, saga: &mut SagaInstance, event: SagaEvent) -> Result<(), SagaError> {
        let saga_id = saga.id().ok_or(SagaError::InvalidState {
            expected: "a started saga".to_string(),
            actual: saga.state(),
        })?;
        let current = saga.version();
        let correlation = saga.transaction_id().cloned();

        let version = self
            .append_saga_event(
                saga_id,
                current,
                correlation.as_ref(),
                &event,
                AppendOptions::expect_version(current),
            )
            .await?;

        saga.apply(event);
        saga.set_version(version);
        Ok(())
    }

    /// Loads a saga instance by ID from the event store.
    pub async fn get_saga(&self, saga_id: AggregateId) -> Result<Option<SagaInstance>, SagaError> {
        let events = self.store.get_events_for_aggregate(saga_id).await?;

        if events.is_empty() {
            return Ok(None);
        }

        let mut saga = SagaInstance::default();
        for envelope in events {
            let event: SagaEvent = serde_json::from_value(envelope.payload)?;
            saga.apply(event);
            saga.set_version(envelope.version);
        }
        Ok(Some(saga))
    }

    /// Finds the saga a flow started for a transaction.
    pub async fn find_saga(
        &self,
        flow: SagaFlow,
        transaction_id: &TransactionId,
    ) -> Result<Option<SagaInstance>, SagaError> {
        let key = flow.correlation_key(transaction_id.as_str());
        match self
            .store
            .lookup_unique(flows::SAGA_CORRELATION_INDEX, &key)
            .await?
        {
            Some(saga_id) => self.get_saga(saga_id).await,
            None => Ok(None),
        }
    }

    /// Appends a single saga event to the event store.
    async fn append_saga_event(
        &self,
        saga_id: AggregateId,
        current_version: Version,
        correlation_id: Option<&TransactionId>,
        event: &SagaEvent,
        options: AppendOptions,
    ) -> Result<Version, SagaError> {
        let envelope = EventEnvelope::builder()
            .event_type(event.event_type())
            .aggregate_id(saga_id)
            .aggregate_type(SagaInstance::aggregate_type())
            .version(current_version.next())
            .correlation_id(correlation_id.cloned())
            .payload(event)?
            .build()?;

        let new_version = self.store.append(vec![envelope], options).await?;
        Ok(new_version)
    }
}

fn saga_context(saga: &SagaInstance) -> Result<(SagaFlow, TransactionId, AggregateId), SagaError> {
    let flow = saga.flow().ok_or_else(|| incomplete(saga, "flow"))?;
    let tx = saga
        .transaction_id()
        .cloned()
        .ok_or_else(|| incomplete(saga, "transaction id"))?;
    let title_id = saga
        .land_title_id()
        .ok_or_else(|| incomplete(saga, "land title"))?;
    Ok((flow, tx, title_id))
}

/// Hash of the `index`-th planned ledger write.
fn receipt_hash(saga: &SagaInstance, index: usize) -> Result<String, SagaError> {
    saga.ledger_keys()
        .get(index)
        .and_then(|key| saga.ledger_hash(key))
        .map(str::to_string)
        .ok_or_else(|| incomplete(saga, "ledger receipt"))
}

fn incomplete(saga: &SagaInstance, field: &'static str) -> SagaError {
    SagaError::IncompleteLog {
        saga_id: saga.id().unwrap_or_default(),
        field,
    }
}

fn title_record(title: &LandTitle, tx: &TransactionId, status: TitleState) -> serde_json::Value {
    json!({
        "title_number": title.title_number(),
        "owner": title.owner(),
        "property_location": title.property_location(),
        "documents": title.documents(),
        "status": status,
        "transaction_id": tx,
    })
}

fn transfer_record(
    transfer: &Transfer,
    transfer_id: AggregateId,
    tx: &TransactionId,
    role: &str,
    party: &OwnerDetails,
) -> serde_json::Value {
    json!({
        "title_number": transfer.title_number(),
        "transfer_id": transfer_id,
        "role": role,
        "party": party,
        "transaction_id": tx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PaymentEventData;
    use crate::services::{InMemoryLedger, InMemoryMessageBus};
    use domain::{ConfirmPayment, CreatePayment, CreateTransfer, Money, RegisterTitle};
    use event_store::InMemoryEventStore;

    type TestCoordinator = SagaCoordinator<InMemoryEventStore, InMemoryLedger, InMemoryMessageBus>;

    struct Setup {
        coordinator: TestCoordinator,
        titles: LandTitleService<InMemoryEventStore>,
        payments: PaymentService<InMemoryEventStore>,
        transfers: TransferService<InMemoryEventStore>,
        ledger: InMemoryLedger,
        bus: InMemoryMessageBus,
    }

    fn setup() -> Setup {
        let store = InMemoryEventStore::new();
        let ledger = InMemoryLedger::connected();
        let bus = InMemoryMessageBus::new();
        Setup {
            coordinator: SagaCoordinator::new(store.clone(), ledger.clone(), bus.clone()),
            titles: LandTitleService::new(store.clone()),
            payments: PaymentService::new(store.clone()),
            transfers: TransferService::new(store),
            ledger,
            bus,
        }
    }

    async fn paid_registration(setup: &Setup, tx: &str) -> (AggregateId, RegistryMessage) {
        let title = setup
            .titles
            .register(
                RegisterTitle::new(format!("TCT-{tx}"), OwnerDetails::named("Maria"), "Lot 4")
                    .with_document("deed.pdf")
                    .with_transaction_id(tx),
            )
            .await
            .unwrap()
            .aggregate;
        let title_id = title.id().unwrap();
        let payment = setup
            .payments
            .create(CreatePayment::registration(
                title_id,
                TransactionId::new(tx),
                Money::from_units(1500),
                "Maria",
                "GCASH",
            ))
            .await
            .unwrap()
            .aggregate;
        setup
            .payments
            .confirm(ConfirmPayment::new(payment.id().unwrap()))
            .await
            .unwrap();

        let message = RegistryMessage::PaymentConfirmed(PaymentEventData {
            transaction_id: TransactionId::new(tx),
            land_title_id: title_id,
            status: TitleState::Pending,
            payment_status: PaymentState::Paid,
            transfer_id: None,
            transfer_fee: None,
            to_owner: None,
            from_owner: None,
        });
        (title_id, message)
    }

    #[tokio::test]
    async fn test_registration_commits() {
        let setup = setup();
        let (title_id, message) = paid_registration(&setup, "TXN-1").await;

        let outcome = setup.coordinator.handle(message).await.unwrap();
        let SagaOutcome::Committed { saga_id } = outcome else {
            panic!("expected commit, got {outcome:?}");
        };

        let saga = setup.coordinator.get_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.state(), SagaState::Committed);
        assert_eq!(saga.completed_steps(), &["ledger_write", "activate_title"]);

        let title = setup.titles.get_title(title_id).await.unwrap().unwrap();
        assert_eq!(title.state(), TitleState::Active);
        assert_eq!(title.blockchain_hash(), saga.ledger_hash("TCT-TXN-1"));
        assert_eq!(setup.bus.published(PAYMENT_QUEUE).len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_failure_compensates() {
        let setup = setup();
        let (title_id, message) = paid_registration(&setup, "TXN-1").await;
        setup.ledger.set_unavailable(true);

        let outcome = setup.coordinator.handle(message).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Compensated { .. }));

        let title = setup.titles.get_title(title_id).await.unwrap().unwrap();
        assert_eq!(title.state(), TitleState::Pending);
        assert!(title.blockchain_hash().is_none());

        let saga = setup
            .coordinator
            .find_saga(SagaFlow::Registration, &TransactionId::new("TXN-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saga.state(), SagaState::Compensated);
        assert_eq!(saga.compensated_steps(), &["fail_payment"]);
        assert!(saga.has_published("PaymentFailed"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_ledger_failure() {
        let setup = setup();
        let coordinator = SagaCoordinator::new(
            setup.titles.handler().store().clone(),
            setup.ledger.clone(),
            setup.bus.clone(),
        )
        .with_ledger_timeout(Duration::from_millis(20));
        let (_, message) = paid_registration(&setup, "TXN-1").await;
        setup.ledger.set_latency(Duration::from_millis(500));

        let outcome = coordinator.handle(message).await.unwrap();
        let SagaOutcome::Compensated { reason, .. } = outcome else {
            panic!("expected compensation, got {outcome:?}");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(setup.ledger.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_discarded() {
        let setup = setup();
        let message = RegistryMessage::PaymentConfirmed(PaymentEventData {
            transaction_id: TransactionId::new("TXN-404"),
            land_title_id: AggregateId::new(),
            status: TitleState::Pending,
            payment_status: PaymentState::Paid,
            transfer_id: None,
            transfer_fee: None,
            to_owner: None,
            from_owner: None,
        });

        let outcome = setup.coordinator.handle(message).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Discarded { .. }));
        assert_eq!(setup.ledger.write_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_rolls_forward_after_recorded_receipt() {
        let setup = setup();
        let (title_id, message) = paid_registration(&setup, "TXN-1").await;
        let tx = TransactionId::new("TXN-1");

        // Simulate a crash right after the ledger receipt was logged.
        let c = &setup.coordinator;
        let mut saga = c
            .start_saga(SagaFlow::Registration, &tx, title_id, None)
            .await
            .unwrap()
            .unwrap();
        c.record(&mut saga, SagaEvent::ledger_write_started(vec!["TCT-TXN-1".into()]))
            .await
            .unwrap();
        c.record(&mut saga, SagaEvent::ledger_write_succeeded("TCT-TXN-1", "LTX-9", "h-9"))
            .await
            .unwrap();

        let outcome = c.handle(message).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Committed { .. }));
        assert_eq!(setup.ledger.write_count(), 0);

        let title = setup.titles.get_title(title_id).await.unwrap().unwrap();
        assert_eq!(title.blockchain_hash(), Some("h-9"));
    }

    #[tokio::test]
    async fn test_resume_compensates_without_receipt() {
        let setup = setup();
        let (title_id, message) = paid_registration(&setup, "TXN-1").await;
        let tx = TransactionId::new("TXN-1");

        let c = &setup.coordinator;
        let mut saga = c
            .start_saga(SagaFlow::Registration, &tx, title_id, None)
            .await
            .unwrap()
            .unwrap();
        c.record(&mut saga, SagaEvent::ledger_write_started(vec!["TCT-TXN-1".into()]))
            .await
            .unwrap();

        let outcome = c.handle(message).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Compensated { .. }));

        let payment = setup.payments.find_by_transaction(&tx).await.unwrap().unwrap();
        assert_eq!(payment.state(), PaymentState::Failed);
    }

    #[tokio::test]
    async fn test_saga_events_carry_transaction() {
        let setup = setup();
        let (_, message) = paid_registration(&setup, "TXN-1").await;
        setup.coordinator.handle(message).await.unwrap();

        let events = setup
            .titles
            .handler()
            .store()
            .get_events_by_correlation(&TransactionId::new("TXN-1"))
            .await
            .unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"SagaStarted"));
        assert!(types.contains(&"TitleActivated"));
        assert!(types.contains(&"SagaCommitted"));
    }

    #[tokio::test]
    async fn test_resumed_transfer_rolls_forward() {
        let setup = setup();
        let (title_id, message) = paid_registration(&setup, "TXN-1").await;
        setup.coordinator.handle(message).await.unwrap();

        let transfer = CreateTransfer::new(title_id, OwnerDetails::named("Jose"));
        let transfer_id = transfer.transfer_id;
        setup.transfers.create(transfer).await.unwrap();
        let fee = setup
            .payments
            .create(CreatePayment::transfer_fee(
                title_id,
                transfer_id,
                TransactionId::new("TXN-2"),
                Money::from_units(2500),
                "Jose",
                "BANK",
            ))
            .await
            .unwrap()
            .aggregate;
        setup
            .payments
            .confirm(ConfirmPayment::new(fee.id().unwrap()))
            .await
            .unwrap();

        // Crash after both transfer entries reached the ledger.
        let tx = TransactionId::new("TXN-2");
        let seller = flows::seller_key("TCT-TXN-1", transfer_id);
        let buyer = flows::buyer_key("TCT-TXN-1", transfer_id);
        let c = &setup.coordinator;
        let mut saga = c
            .start_saga(SagaFlow::Transfer, &tx, title_id, Some(transfer_id))
            .await
            .unwrap()
            .unwrap();
        c.record(&mut saga, SagaEvent::ledger_write_started(vec![seller.clone(), buyer.clone()]))
            .await
            .unwrap();
        c.record(&mut saga, SagaEvent::ledger_write_succeeded(&seller, "LTX-8", "h-seller"))
            .await
            .unwrap();
        c.record(&mut saga, SagaEvent::ledger_write_succeeded(&buyer, "LTX-9", "h-buyer"))
            .await
            .unwrap();

        let message = RegistryMessage::PaymentConfirmed(PaymentEventData {
            transaction_id: tx.clone(),
            land_title_id: title_id,
            status: TitleState::Active,
            payment_status: PaymentState::Paid,
            transfer_id: Some(transfer_id),
            transfer_fee: None,
            to_owner: None,
            from_owner: None,
        });
        let outcome = c.handle(message).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Committed { .. }));
        // Only the registration write; the transfer entries were not repeated.
        assert_eq!(setup.ledger.write_count(), 1);

        let title = setup.titles.get_title(title_id).await.unwrap().unwrap();
        assert_eq!(title.owner_name(), "Jose");
        assert_eq!(title.seller_hash(), Some("h-seller"));
        assert_eq!(title.buyer_hash(), Some("h-buyer"));
        let transfer = setup.transfers.get_transfer(transfer_id).await.unwrap().unwrap();
        assert_eq!(transfer.state(), TransferState::Completed);
    }

    #[tokio::test]
    async fn test_compensate_refuses_a_finished_saga() {
        let setup = setup();
        let (_, message) = paid_registration(&setup, "TXN-1").await;
        setup.coordinator.handle(message).await.unwrap();

        let mut saga = setup
            .coordinator
            .find_saga(SagaFlow::Registration, &TransactionId::new("TXN-1"))
            .await
            .unwrap()
            .unwrap();
        let err = setup
            .coordinator
            .compensate(&mut saga, "late failure")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SagaError::InvalidState {
                actual: SagaState::Committed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_title_locks_are_released() {
        let setup = setup();
        let (first, message) = paid_registration(&setup, "TXN-1").await;
        let (_, other) = paid_registration(&setup, "TXN-2").await;

        let (a, b) = tokio::join!(
            setup.coordinator.handle(message.clone()),
            setup.coordinator.handle(message)
        );
        a.unwrap();
        b.unwrap();
        setup.coordinator.handle(other).await.unwrap();

        assert_eq!(setup.coordinator.locks.len(), 0);

        let guard = setup.coordinator.locks.acquire(first).await;
        assert_eq!(setup.coordinator.locks.len(), 1);
        drop(guard);
        assert_eq!(setup.coordinator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_nonexistent_saga() {
        let setup = setup();
        let result = setup.coordinator.get_saga(AggregateId::new()).await.unwrap();
        assert!(result.is_none());
    }
}
