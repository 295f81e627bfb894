//! Purpose: In-process addressable event bus with request/reply and publish/subscribe.
//! Exports: `EventBus`, `MessageConsumer`, message and failure types.
//! Role: The only path between gateway, bridge, and services; handles are passed explicitly.
//! Invariants: A request reaches exactly one consumer, chosen round-robin per address.
//! Invariants: A publish reaches every consumer registered at the time of the call.
//! Invariants: Each consumer queue is FIFO, so one sender's messages keep send order.
//! Notes: Delivery is at-most-once and in-memory; nothing survives a restart.

mod message;

pub use message::{DeliveryOptions, FailureKind, Headers, Message, ReplyFailure};

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    addresses: Mutex<HashMap<String, Handlers>>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Handlers {
    entries: Vec<HandlerEntry>,
    cursor: usize,
}

struct HandlerEntry {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Handlers>> {
        self.addresses
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn unregister(&self, address: &str, id: u64) {
        let mut addresses = self.lock();
        if let Some(handlers) = addresses.get_mut(address) {
            handlers.entries.retain(|entry| entry.id != id);
            if handlers.entries.is_empty() {
                addresses.remove(address);
            }
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler at `address`. The registration lives as long as
    /// the returned consumer.
    pub fn consumer(&self, address: impl Into<String>) -> MessageConsumer {
        let address = address.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .entry(address.clone())
            .or_default()
            .entries
            .push(HandlerEntry { id, tx });
        tracing::debug!(address = %address, id, "consumer registered");
        MessageConsumer {
            address,
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn handler_count(&self, address: &str) -> usize {
        self.inner
            .lock()
            .get(address)
            .map_or(0, |handlers| handlers.entries.len())
    }

    pub async fn request(
        &self,
        address: &str,
        body: Value,
        options: DeliveryOptions,
    ) -> Result<Value, ReplyFailure> {
        let (tx, rx) = oneshot::channel();
        let message = Message::new(address, options.headers, body, Some(tx));
        if let Err(mut message) = self.deliver_one(message) {
            message.fail(ReplyFailure::no_handlers(address));
        }

        let outcome = match options.timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(ReplyFailure::timeout(address, after)),
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| {
            Err(ReplyFailure::recipient(
                -1,
                format!("reply channel for {address} closed"),
            ))
        })
    }

    /// Point-to-point delivery without a reply path.
    pub fn send(&self, address: &str, body: Value, options: DeliveryOptions) {
        let message = Message::new(address, options.headers, body, None);
        if self.deliver_one(message).is_err() {
            tracing::debug!(address, "send dropped: no handlers");
        }
    }

    pub fn publish(&self, address: &str, body: Value, options: DeliveryOptions) {
        let message = Message::new(address, options.headers, body, None);
        let targets: Vec<mpsc::UnboundedSender<Message>> = self
            .inner
            .lock()
            .get(address)
            .map(|handlers| handlers.entries.iter().map(|entry| entry.tx.clone()).collect())
            .unwrap_or_default();
        for tx in targets {
            let _ = tx.send(message.copy_for_publish());
        }
    }

    fn deliver_one(&self, mut message: Message) -> Result<(), Message> {
        let mut addresses = self.inner.lock();
        let Some(handlers) = addresses.get_mut(message.address()) else {
            return Err(message);
        };
        let mut attempts = handlers.entries.len();
        while attempts > 0 {
            attempts -= 1;
            let index = handlers.cursor % handlers.entries.len();
            handlers.cursor = handlers.cursor.wrapping_add(1);
            match handlers.entries[index].tx.send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }
        Err(message)
    }
}

/// A registered handler. Dropping it removes the registration.
pub struct MessageConsumer {
    address: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
    registry: Weak<Registry>,
}

impl MessageConsumer {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next delivery, or `None` once the bus itself is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for MessageConsumer {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.address, self.id);
            tracing::debug!(address = %self.address, id = self.id, "consumer unregistered");
        }
    }
}

/// A consumer driven by a background task. Deliveries are handled one at a
/// time in arrival order, so the registration is a serialization point for
/// everything sent to it. A panicking handler fails only its own delivery.
/// Dropping the registration stops the task and unregisters the consumer.
pub struct ServiceRegistration {
    address: String,
    task: JoinHandle<()>,
}

impl ServiceRegistration {
    pub fn spawn<F, Fut>(mut consumer: MessageConsumer, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let address = consumer.address().to_string();
        let task = tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                if let Err(err) = tokio::spawn(handler(message)).await {
                    if err.is_panic() {
                        tracing::error!(address = consumer.address(), "handler panicked");
                    }
                }
            }
        });
        Self { address, task }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for ServiceRegistration {
    fn drop(&mut self) {
        self.task.abort();
    }
}
