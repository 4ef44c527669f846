//! Integration tests for the land title, payment and transfer services.
//!
//! These exercise persistence through the event store: unique indexes,
//! replay, correlation ids and optimistic concurrency.

use common::{AggregateId, TransactionId};
use domain::{
    ActivateTitle, CancelTitle, CancelTransfer, CompleteTransfer, ConfirmPayment, CreatePayment,
    CreateTransfer, DomainError, LandTitleError, LandTitleService, MarkPaymentFailed, Money,
    OwnerDetails, PaymentError, PaymentService, PaymentState, ReactivateTitle, RegisterTitle,
    TitleState, TransferError, TransferOwnership, TransferService, TransferState, UpdateTransfer,
};
use event_store::{EventStore, InMemoryEventStore};

fn registration(title_number: &str, tx: &str) -> RegisterTitle {
    RegisterTitle::new(
        title_number,
        OwnerDetails::named("Maria Santos").with_email("maria@example.com"),
        "Lot 4, Block 2, Quezon City",
    )
    .with_document("deed-of-sale.pdf")
    .with_transaction_id(tx)
}

async fn active_title(
    titles: &LandTitleService<InMemoryEventStore>,
    title_number: &str,
    tx: &str,
) -> AggregateId {
    let result = titles.register(registration(title_number, tx)).await.unwrap();
    let title_id = result.aggregate.id_or_panic();
    titles
        .activate(ActivateTitle::new(title_id, TransactionId::new(tx), "hash-original"))
        .await
        .unwrap();
    title_id
}

trait IdOrPanic {
    fn id_or_panic(&self) -> AggregateId;
}

impl<A: domain::Aggregate> IdOrPanic for A {
    fn id_or_panic(&self) -> AggregateId {
        self.id().expect("aggregate should exist")
    }
}

mod title_lifecycle {
    use super::*;

    #[tokio::test]
    async fn register_and_find_by_keys() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());

        let result = titles
            .register(registration("TCT-2024-001", "TXN-1"))
            .await
            .unwrap();
        assert_eq!(result.aggregate.state(), TitleState::Pending);

        let by_number = titles.find_by_title_number("TCT-2024-001").await.unwrap();
        assert!(by_number.is_some());

        let by_tx = titles
            .find_by_transaction(&TransactionId::new("TXN-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_tx.title_number(), "TCT-2024-001");
    }

    #[tokio::test]
    async fn missing_documents_persists_nothing() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());

        let cmd = RegisterTitle::new("TCT-2024-001", OwnerDetails::named("Maria"), "Lot 4");
        let err = titles.register(cmd).await.unwrap_err();

        assert!(matches!(
            err,
            DomainError::LandTitle(LandTitleError::MissingDocuments { .. })
        ));
        assert_eq!(store.event_count().await, 0);
        assert!(
            titles
                .find_by_title_number("TCT-2024-001")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_title_number_is_rejected() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());

        titles
            .register(registration("TCT-2024-001", "TXN-1"))
            .await
            .unwrap();
        let err = titles
            .register(registration("TCT-2024-001", "TXN-2"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::LandTitle(LandTitleError::DuplicateTitle { ref title_number })
                if title_number == "TCT-2024-001"
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn generated_transaction_id_when_absent() {
        let titles = LandTitleService::new(InMemoryEventStore::new());
        let cmd = RegisterTitle::new("TCT-2024-003", OwnerDetails::named("Juan"), "Lot 9")
            .with_document("deed.pdf");

        let result = titles.register(cmd).await.unwrap();
        let tx = result.aggregate.transaction_id().unwrap();
        assert!(tx.as_str().starts_with("TXN-"));
    }

    #[tokio::test]
    async fn cancel_and_reactivate_replays_three_hashes() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());
        let title_id = active_title(&titles, "TCT-2024-001", "TXN-1").await;

        titles
            .cancel(CancelTitle::new(title_id, TransactionId::new("TXN-C"), "hash-cancel"))
            .await
            .unwrap();
        titles
            .reactivate(ReactivateTitle::new(
                title_id,
                TransactionId::new("TXN-R"),
                "hash-react",
            ))
            .await
            .unwrap();

        let title = titles.get_title(title_id).await.unwrap().unwrap();
        assert_eq!(title.state(), TitleState::Active);
        let hashes = [
            title.blockchain_hash().unwrap(),
            title.cancellation_hash().unwrap(),
            title.reactivation_hash().unwrap(),
        ];
        assert_eq!(hashes, ["hash-original", "hash-cancel", "hash-react"]);
    }

    #[tokio::test]
    async fn transitions_are_correlated_by_transaction() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());
        active_title(&titles, "TCT-2024-001", "TXN-1").await;

        let events = store
            .get_events_by_correlation(&TransactionId::new("TXN-1"))
            .await
            .unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["TitleRegistered", "TitleActivated"]);
    }
}

mod payment_lifecycle {
    use super::*;

    #[tokio::test]
    async fn duplicate_transaction_is_rejected() {
        let payments = PaymentService::new(InMemoryEventStore::new());
        let title_id = AggregateId::new();
        let cmd = || {
            CreatePayment::registration(
                title_id,
                TransactionId::new("TXN-1"),
                Money::from_cents(150_000),
                "Maria Santos",
                "GCASH",
            )
        };

        payments.create(cmd()).await.unwrap();
        let err = payments.create(cmd()).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Payment(PaymentError::DuplicateTransaction { .. })
        ));
    }

    #[tokio::test]
    async fn confirm_and_fail() {
        let payments = PaymentService::new(InMemoryEventStore::new());
        let created = payments
            .create(CreatePayment::registration(
                AggregateId::new(),
                TransactionId::new("TXN-1"),
                Money::from_cents(150_000),
                "Maria Santos",
                "GCASH",
            ))
            .await
            .unwrap();
        let payment_id = created.aggregate.id_or_panic();

        payments
            .confirm(ConfirmPayment::new(payment_id))
            .await
            .unwrap();
        payments
            .mark_failed(MarkPaymentFailed::new(payment_id, "ledger unavailable"))
            .await
            .unwrap();

        let payment = payments
            .find_by_transaction(&TransactionId::new("TXN-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.state(), PaymentState::Failed);
        assert_eq!(payment.failure_reason(), Some("ledger unavailable"));
    }

    #[tokio::test]
    async fn missing_payment_is_not_found() {
        let payments = PaymentService::new(InMemoryEventStore::new());
        let err = payments
            .confirm(ConfirmPayment::new(AggregateId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AggregateNotFound { .. }));
    }
}

mod transfer_lifecycle {
    use super::*;

    #[tokio::test]
    async fn transfer_against_pending_title_fails_and_persists_nothing() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());
        let transfers = TransferService::new(store.clone());

        let title = titles
            .register(registration("TCT-2024-001", "TXN-1"))
            .await
            .unwrap()
            .aggregate;
        let before = store.event_count().await;

        let cmd = CreateTransfer::new(title.id_or_panic(), OwnerDetails::named("Jose Rizal"));
        let transfer_id = cmd.transfer_id;
        let err = transfers.create(cmd).await.unwrap_err();

        assert!(matches!(
            err,
            DomainError::Transfer(TransferError::InvalidTitleState {
                state: TitleState::Pending
            })
        ));
        assert_eq!(
            err.to_string(),
            "Transfer error: Cannot transfer land title with PENDING status"
        );
        assert_eq!(store.event_count().await, before);
        assert!(transfers.get_transfer(transfer_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_transfer_rejects_update_and_cancel() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());
        let transfers = TransferService::new(store.clone());
        let title_id = active_title(&titles, "TCT-2024-001", "TXN-1").await;

        let created = transfers
            .create(CreateTransfer::new(title_id, OwnerDetails::named("Jose Rizal")))
            .await
            .unwrap();
        let transfer_id = created.aggregate.id_or_panic();
        assert_eq!(created.aggregate.from_owner().name, "Maria Santos");

        let tx = TransactionId::new("TXN-T");
        titles
            .transfer_ownership(TransferOwnership {
                title_id,
                transfer_id,
                transaction_id: tx.clone(),
                buyer: OwnerDetails::named("Jose Rizal"),
                seller_hash: "seller-h".into(),
                buyer_hash: "buyer-h".into(),
            })
            .await
            .unwrap();
        let completed = transfers
            .complete(CompleteTransfer {
                transfer_id,
                transaction_id: tx,
            })
            .await
            .unwrap();
        assert_eq!(completed.aggregate.state(), TransferState::Completed);

        let err = transfers
            .update(UpdateTransfer {
                transfer_id,
                buyer: OwnerDetails::named("Someone Else"),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Transfer(TransferError::ImmutableRecord { .. })
        ));

        let err = transfers
            .cancel(CancelTransfer {
                transfer_id,
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Transfer(TransferError::ImmutableRecord { .. })
        ));

        let title = titles.get_title(title_id).await.unwrap().unwrap();
        assert_eq!(title.owner_name(), "Jose Rizal");
        assert_eq!(title.state(), TitleState::Active);
    }
}

mod concurrency {
    use super::*;
    use domain::CommandHandler;

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let store = InMemoryEventStore::new();
        let titles = LandTitleService::new(store.clone());
        let title_id = active_title(&titles, "TCT-2024-001", "TXN-1").await;

        // Two writers load the same version; the second append must lose.
        let handler: CommandHandler<_, domain::LandTitle> = CommandHandler::new(store.clone());
        let stale = handler.load(title_id).await.unwrap();

        titles
            .cancel(CancelTitle::new(title_id, TransactionId::new("TXN-C"), "hash-cancel"))
            .await
            .unwrap();

        let events = stale
            .cancel(&TransactionId::new("TXN-D"), "hash-other")
            .unwrap();
        let envelope = event_store::EventEnvelope::builder()
            .aggregate_id(title_id)
            .aggregate_type("LandTitle")
            .event_type("TitleCancelled")
            .version(stale.version_next())
            .payload(&events[0])
            .unwrap()
            .build()
            .unwrap();
        let err = store
            .append(
                vec![envelope],
                event_store::AppendOptions::expect_version(domain::Aggregate::version(&stale)),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    trait NextVersion {
        fn version_next(&self) -> event_store::Version;
    }

    impl<A: domain::Aggregate> NextVersion for A {
        fn version_next(&self) -> event_store::Version {
            self.version().next()
        }
    }
}
