//! Bus consumer that feeds the coordinator.

use std::sync::Arc;

use event_store::EventStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::SagaConfig;
use crate::coordinator::{SagaCoordinator, SagaOutcome};
use crate::messages::{REGISTRY_QUEUE, RegistryMessage};
use crate::services::{Delivery, LedgerService, MessageBus};

/// What the worker does with a delivery once the coordinator is done.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    Ack,
    Retry(String),
    /// Give up and let the coordinator roll back, then ack.
    Reject(String),
}

/// Consumes the registry queue and runs each message through the coordinator.
///
/// Up to `worker_concurrency` messages are handled at once; messages for the
/// same title still run one at a time because the coordinator serializes
/// them. Deferred messages and retryable failures are redelivered until
/// `max_deliveries`; after that, or on a failure that retrying cannot fix,
/// the message is handed to [`SagaCoordinator::reject`] and acked. `run`
/// returns once the bus is closed and drained and every in-flight message
/// has been settled.
pub struct SagaWorker<S, L, B>
where
    S: EventStore,
    L: LedgerService,
    B: MessageBus,
{
    coordinator: Arc<SagaCoordinator<S, L, B>>,
    bus: B,
    config: SagaConfig,
}

impl<S, L, B> SagaWorker<S, L, B>
where
    S: EventStore + Clone + 'static,
    L: LedgerService + 'static,
    B: MessageBus + Clone + 'static,
{
    pub fn new(coordinator: Arc<SagaCoordinator<S, L, B>>, bus: B, config: SagaConfig) -> Self {
        Self {
            coordinator,
            bus,
            config,
        }
    }

    pub async fn run(self) {
        let permits = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        tracing::info!(
            queue = REGISTRY_QUEUE,
            concurrency = self.config.worker_concurrency,
            "saga worker started"
        );

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(delivery) = self.bus.receive(REGISTRY_QUEUE).await else {
                break;
            };

            let coordinator = self.coordinator.clone();
            let bus = self.bus.clone();
            let config = self.config.clone();
            tasks.spawn(async move {
                process(&coordinator, &bus, &config, delivery).await;
                drop(permit);
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "saga worker task panicked");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "saga worker task panicked");
            }
        }
        tracing::info!("saga worker stopped");
    }
}

#[tracing::instrument(skip_all, fields(delivery_id = delivery.delivery_id, attempt = delivery.attempt))]
async fn process<S, L, B>(
    coordinator: &SagaCoordinator<S, L, B>,
    bus: &B,
    config: &SagaConfig,
    delivery: Delivery,
) where
    S: EventStore + Clone,
    L: LedgerService,
    B: MessageBus,
{
    let message = match serde_json::from_value::<RegistryMessage>(delivery.payload.clone()) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(error = %e, "undecodable message dropped");
            metrics::counter!("saga_messages_dropped_total", "reason" => "decode").increment(1);
            settle(bus, &delivery, false).await;
            return;
        }
    };

    let disposition = match coordinator.handle(message.clone()).await {
        Ok(SagaOutcome::Deferred { reason }) => Disposition::Retry(reason),
        Ok(_) => Disposition::Ack,
        Err(e) if e.is_retryable() => {
            tracing::warn!(error = %e, "retryable saga failure");
            Disposition::Retry(e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "saga failed");
            metrics::counter!("saga_messages_dropped_total", "reason" => "error").increment(1);
            Disposition::Reject(e.to_string())
        }
    };

    let disposition = match disposition {
        Disposition::Retry(reason) if delivery.attempt >= config.max_deliveries => {
            tracing::error!(
                max_deliveries = config.max_deliveries,
                %reason,
                "message exhausted its deliveries"
            );
            metrics::counter!("saga_messages_dropped_total", "reason" => "exhausted")
                .increment(1);
            Disposition::Reject(format!(
                "gave up after {} deliveries: {reason}",
                delivery.attempt
            ))
        }
        other => other,
    };

    match disposition {
        Disposition::Ack => settle(bus, &delivery, false).await,
        Disposition::Retry(_) => {
            tokio::time::sleep(config.redelivery_delay).await;
            settle(bus, &delivery, true).await;
        }
        Disposition::Reject(reason) => {
            match coordinator.reject(message, &reason).await {
                Ok(outcome) => tracing::info!(?outcome, "rejected message rolled back"),
                Err(e) => tracing::error!(error = %e, "rollback of rejected message failed"),
            }
            settle(bus, &delivery, false).await;
        }
    }
}

async fn settle<B: MessageBus>(bus: &B, delivery: &Delivery, redeliver: bool) {
    let settled = if redeliver {
        bus.nack(delivery).await
    } else {
        bus.ack(delivery).await
    };
    if let Err(e) = settled {
        tracing::error!(error = %e, "failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryLedger, InMemoryMessageBus, MessageBusExt};
    use event_store::InMemoryEventStore;
    use serde_json::json;
    use std::time::Duration;

    fn worker(
        bus: &InMemoryMessageBus,
        config: SagaConfig,
    ) -> SagaWorker<InMemoryEventStore, InMemoryLedger, InMemoryMessageBus> {
        let coordinator = SagaCoordinator::new(
            InMemoryEventStore::new(),
            InMemoryLedger::connected(),
            bus.clone(),
        );
        SagaWorker::new(Arc::new(coordinator), bus.clone(), config)
    }

    #[tokio::test]
    async fn garbage_is_acked_and_dropped() {
        let bus = InMemoryMessageBus::new();
        bus.publish(REGISTRY_QUEUE, json!({"type": "Nonsense"}))
            .await
            .unwrap();
        bus.close().await;

        worker(&bus, SagaConfig::default()).run().await;

        assert_eq!(bus.pending(REGISTRY_QUEUE), 0);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn discarded_messages_are_acked() {
        let bus = InMemoryMessageBus::new();
        let message = RegistryMessage::TitleCancellationRequested(crate::messages::TitleChangeData {
            transaction_id: "TXN-1".into(),
            land_title_id: common::AggregateId::new(),
            reason: None,
        });
        bus.publish_message(REGISTRY_QUEUE, &message).await.unwrap();
        bus.close().await;

        let config = SagaConfig {
            redelivery_delay: Duration::from_millis(1),
            ..SagaConfig::default()
        };
        worker(&bus, config).run().await;

        assert_eq!(bus.pending(REGISTRY_QUEUE), 0);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn deferred_message_is_rejected_after_max_deliveries() {
        use crate::messages::{PAYMENT_QUEUE, PaymentEventData, TitleChangeData};
        use common::TransactionId;
        use domain::{
            Aggregate, ConfirmPayment, CreatePayment, CreateTransfer, LandTitleService, Money,
            OwnerDetails, PaymentService, PaymentState, RegisterTitle, TitleState,
            TransferService,
        };

        let store = InMemoryEventStore::new();
        let bus = InMemoryMessageBus::new();
        let coordinator = Arc::new(SagaCoordinator::new(
            store.clone(),
            InMemoryLedger::connected(),
            bus.clone(),
        ));
        let titles = LandTitleService::new(store.clone());
        let payments = PaymentService::new(store.clone());
        let transfers = TransferService::new(store);

        let confirmed = |tx: &str, land_title_id| {
            RegistryMessage::PaymentConfirmed(PaymentEventData {
                transaction_id: TransactionId::new(tx),
                land_title_id,
                status: TitleState::Pending,
                payment_status: PaymentState::Paid,
                transfer_id: None,
                transfer_fee: None,
                to_owner: None,
                from_owner: None,
            })
        };

        // An ACTIVE title, then cancelled back to PENDING.
        let title_id = titles
            .register(
                RegisterTitle::new("TCT-77", OwnerDetails::named("Maria"), "Lot 7")
                    .with_document("deed.pdf")
                    .with_transaction_id("TXN-1"),
            )
            .await
            .unwrap()
            .aggregate
            .id()
            .unwrap();
        let registration = payments
            .create(CreatePayment::registration(
                title_id,
                TransactionId::new("TXN-1"),
                Money::from_units(1500),
                "Maria",
                "GCASH",
            ))
            .await
            .unwrap()
            .aggregate;
        payments
            .confirm(ConfirmPayment::new(registration.id().unwrap()))
            .await
            .unwrap();
        coordinator.handle(confirmed("TXN-1", title_id)).await.unwrap();

        let transfer = CreateTransfer::new(title_id, OwnerDetails::named("Jose"));
        let transfer_id = transfer.transfer_id;
        transfers.create(transfer).await.unwrap();

        coordinator
            .handle(RegistryMessage::TitleCancellationRequested(TitleChangeData {
                transaction_id: "TXN-C".into(),
                land_title_id: title_id,
                reason: None,
            }))
            .await
            .unwrap();

        let fee = payments
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
        let fee_id = fee.id().unwrap();
        payments.confirm(ConfirmPayment::new(fee_id)).await.unwrap();

        let config = SagaConfig {
            max_deliveries: 3,
            redelivery_delay: Duration::from_millis(1),
            ..SagaConfig::default()
        };
        let handle = tokio::spawn(SagaWorker::new(coordinator, bus.clone(), config).run());
        bus.publish_message(REGISTRY_QUEUE, &confirmed("TXN-2", title_id))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.published(PAYMENT_QUEUE).len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        bus.close().await;
        handle.await.unwrap();

        let fee = payments.get_payment(fee_id).await.unwrap().unwrap();
        assert_eq!(fee.state(), PaymentState::Failed);
        assert!(fee.failure_reason().unwrap().contains("after 3 deliveries"));

        let failed = bus.published(PAYMENT_QUEUE).pop().unwrap();
        assert_eq!(failed["type"], "PaymentFailed");
        assert_eq!(bus.pending(REGISTRY_QUEUE), 0);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn stops_when_bus_closes() {
        let bus = InMemoryMessageBus::new();
        let handle = tokio::spawn(worker(&bus, SagaConfig::default()).run());

        bus.close().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
