//! Message bus trait and in-memory implementation.
//!
//! Delivery is at-least-once with per-queue FIFO order. A delivery stays
//! in flight until it is acked; a nack puts it back at the tail of its queue
//! with the attempt counter bumped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

/// Errors returned by a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_id: u64,
    pub queue: String,
    pub payload: serde_json::Value,
    /// 1 on first delivery, incremented by every nack.
    pub attempt: u32,
}

/// Durable, at-least-once message transport between services.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a payload to a queue. Fire-and-forget for the producer.
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<(), BusError>;

    /// Waits for the next delivery on a queue.
    ///
    /// Returns `None` once the bus is closed, the queue is drained and none
    /// of its deliveries are still in flight.
    async fn receive(&self, queue: &str) -> Option<Delivery>;

    /// Acknowledges a delivery; it will not be redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Rejects a delivery; it is redelivered after the messages already queued.
    async fn nack(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Stops accepting publishes and wakes idle consumers.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Extension trait for publishing typed messages.
#[async_trait]
pub trait MessageBusExt: MessageBus {
    async fn publish_message<M>(&self, queue: &str, message: &M) -> Result<(), BusError>
    where
        M: Serialize + Sync,
    {
        let payload = serde_json::to_value(message)?;
        self.publish(queue, payload).await
    }
}

impl<T: MessageBus + ?Sized> MessageBusExt for T {}

#[derive(Debug)]
struct Queued {
    delivery_id: u64,
    payload: serde_json::Value,
    attempt: u32,
}

#[derive(Debug, Default)]
struct BusState {
    queues: HashMap<String, VecDeque<Queued>>,
    in_flight: HashMap<u64, Delivery>,
    published: HashMap<String, Vec<serde_json::Value>>,
    next_delivery_id: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BusState>,
    notify: Notify,
}

/// In-memory message bus.
///
/// Keeps a publish log per queue so tests can assert on what was sent.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every payload ever published to `queue`, in publish order.
    pub fn published(&self, queue: &str) -> Vec<serde_json::Value> {
        self.lock().published.get(queue).cloned().unwrap_or_default()
    }

    /// Number of messages waiting on `queue`.
    pub fn pending(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Number of deliveries handed out but not yet acked or nacked.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take(&self, queue: &str) -> Result<Option<Delivery>, ()> {
        let mut state = self.lock();
        let next = state.queues.get_mut(queue).and_then(VecDeque::pop_front);
        match next {
            Some(queued) => {
                let delivery = Delivery {
                    delivery_id: queued.delivery_id,
                    queue: queue.to_string(),
                    payload: queued.payload,
                    attempt: queued.attempt,
                };
                state.in_flight.insert(delivery.delivery_id, delivery.clone());
                Ok(Some(delivery))
            }
            None if state.closed => {
                // A nacked delivery may still come back to this queue.
                let outstanding = state.in_flight.values().any(|d| d.queue == queue);
                if outstanding { Ok(None) } else { Err(()) }
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<(), BusError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            state.next_delivery_id += 1;
            let delivery_id = state.next_delivery_id;
            state
                .published
                .entry(queue.to_string())
                .or_default()
                .push(payload.clone());
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Queued {
                    delivery_id,
                    payload,
                    attempt: 1,
                });
        }

        metrics::counter!("bus_messages_published_total", "queue" => queue.to_string())
            .increment(1);
        tracing::trace!(queue, "message published");
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Option<Delivery> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take(queue) {
                Ok(Some(delivery)) => return Some(delivery),
                Ok(None) => {}
                Err(()) => return None,
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.lock()
            .in_flight
            .remove(&delivery.delivery_id)
            .ok_or(BusError::UnknownDelivery(delivery.delivery_id))?;
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), BusError> {
        {
            let mut state = self.lock();
            let delivery = state
                .in_flight
                .remove(&delivery.delivery_id)
                .ok_or(BusError::UnknownDelivery(delivery.delivery_id))?;
            state
                .queues
                .entry(delivery.queue)
                .or_default()
                .push_back(Queued {
                    delivery_id: delivery.delivery_id,
                    payload: delivery.payload,
                    attempt: delivery.attempt + 1,
                });
        }

        metrics::counter!("bus_redeliveries_total", "queue" => delivery.queue.clone())
            .increment(1);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        self.lock().closed = true;
        tracing::info!("message bus closed");
        self.inner.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
