use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, TransactionId, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Default)]
struct Inner {
    events: Vec<EventEnvelope>,
    unique: HashMap<(String, String), AggregateId>,
}

/// In-memory event store.
///
/// Events and unique index entries live behind one lock so that a version
/// check, the unique checks and the write happen as a single step.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Returns every stored event of the given type, in append order.
    pub async fn events_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Clears all events and unique index entries.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.events.clear();
        inner.unique.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let first_event = &events[0];
        let aggregate_id = first_event.aggregate_id;

        let mut inner = self.inner.write().await;

        let current_version = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            metrics::counter!("event_store_conflicts_total", "kind" => "version").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        if first_event.version <= current_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        for key in &options.unique_keys {
            if let Some(owner) = inner.unique.get(&(key.index.clone(), key.value.clone()))
                && *owner != aggregate_id
            {
                metrics::counter!("event_store_conflicts_total", "kind" => "unique").increment(1);
                return Err(EventStoreError::UniqueViolation {
                    index: key.index.clone(),
                    value: key.value.clone(),
                    owner: *owner,
                });
            }
        }

        for key in options.unique_keys {
            inner.unique.insert((key.index, key.value), aggregate_id);
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        tracing::trace!(
            %aggregate_id,
            count = events.len(),
            version = %last_version,
            "events appended"
        );
        inner.events.extend(events);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_by_correlation(
        &self,
        correlation_id: &TransactionId,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.correlation_id.as_ref() == Some(correlation_id))
            .cloned()
            .collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max())
    }

    async fn lookup_unique(&self, index: &str, value: &str) -> Result<Option<AggregateId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .unique
            .get(&(index.to_string(), value.to_string()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UniqueKey;

    fn create_test_event(
        aggregate_id: AggregateId,
        version: Version,
        event_type: &str,
    ) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("LandTitle")
            .event_type(event_type)
            .version(version)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();
        let event = create_test_event(aggregate_id, Version::first(), "TitleRegistered");

        let result = store.append(vec![event], AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Version::first());

        let events = store.get_events_for_aggregate(aggregate_id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn append_multiple_events() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let events = vec![
            create_test_event(aggregate_id, Version::new(1), "TitleRegistered"),
            create_test_event(aggregate_id, Version::new(2), "TitleActivated"),
            create_test_event(aggregate_id, Version::new(3), "TitleCancelled"),
        ];

        let result = store.append(events, AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Version::new(3));
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn empty_append_is_rejected() {
        let store = InMemoryEventStore::new();
        let result = store.append(vec![], AppendOptions::new()).await;
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let event1 = create_test_event(aggregate_id, Version::first(), "TitleRegistered");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event(aggregate_id, Version::new(2), "TitleActivated");
        let result = store
            .append(
                vec![event2],
                AppendOptions::expect_version(Version::initial()),
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(err, EventStoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn unique_key_rejects_second_owner() {
        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();
        let key = UniqueKey::new("land_title.title_number", "TCT-2024-001");

        store
            .append(
                vec![create_test_event(first, Version::first(), "TitleRegistered")],
                AppendOptions::expect_new().with_unique_key(key.clone()),
            )
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event(second, Version::first(), "TitleRegistered")],
                AppendOptions::expect_new().with_unique_key(key),
            )
            .await;

        match result {
            Err(EventStoreError::UniqueViolation { owner, value, .. }) => {
                assert_eq!(owner, first);
                assert_eq!(value, "TCT-2024-001");
            }
            other => panic!("expected UniqueViolation, got {other:?}"),
        }
        // Nothing from the rejected append was written.
        assert!(!crate::EventStoreExt::aggregate_exists(&store, second).await.unwrap());
    }

    #[tokio::test]
    async fn unique_key_can_be_reclaimed_by_owner() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let key = UniqueKey::new("saga.correlation", "registration:TXN-1");

        store
            .append(
                vec![create_test_event(id, Version::first(), "SagaInitiated")],
                AppendOptions::expect_new().with_unique_key(key.clone()),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(id, Version::new(2), "SagaCommitted")],
                AppendOptions::expect_version(Version::first()).with_unique_key(key),
            )
            .await
            .unwrap();

        let owner = store
            .lookup_unique("saga.correlation", "registration:TXN-1")
            .await
            .unwrap();
        assert_eq!(owner, Some(id));
        assert_eq!(
            store.lookup_unique("saga.correlation", "registration:TXN-2").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn events_by_correlation_span_aggregates() {
        let store = InMemoryEventStore::new();
        let title = AggregateId::new();
        let payment = AggregateId::new();
        let tx = TransactionId::new("TXN-7");

        let tagged = |id, event_type: &str| {
            EventEnvelope::builder()
                .aggregate_id(id)
                .aggregate_type("Any")
                .event_type(event_type)
                .version(Version::first())
                .correlation_id(Some(tx.clone()))
                .payload_raw(serde_json::json!({}))
                .build()
                .unwrap()
        };

        store
            .append(vec![tagged(payment, "PaymentConfirmed")], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(vec![tagged(title, "TitleActivated")], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(AggregateId::new(), Version::first(), "Other")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let events = store.get_events_by_correlation(&tx).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["PaymentConfirmed", "TitleActivated"]);
    }

    #[tokio::test]
    async fn get_events_from_version() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let events = vec![
            create_test_event(aggregate_id, Version::new(1), "Event1"),
            create_test_event(aggregate_id, Version::new(2), "Event2"),
            create_test_event(aggregate_id, Version::new(3), "Event3"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        let from_v2 = store
            .get_events_for_aggregate_from_version(aggregate_id, Version::new(2))
            .await
            .unwrap();
        assert_eq!(from_v2.len(), 2);
        assert_eq!(from_v2[0].version, Version::new(2));
    }

    #[tokio::test]
    async fn get_aggregate_version() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        assert!(
            store
                .get_aggregate_version(aggregate_id)
                .await
                .unwrap()
                .is_none()
        );

        let events = vec![
            create_test_event(aggregate_id, Version::new(1), "Event1"),
            create_test_event(aggregate_id, Version::new(2), "Event2"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        let version = store.get_aggregate_version(aggregate_id).await.unwrap();
        assert_eq!(version, Some(Version::new(2)));
    }
}
