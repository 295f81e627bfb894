//! Purpose: Expose an allow-listed slice of the event bus to external clients.
//! Exports: `Bridge`, `BridgeOptions`, `PermittedOptions`, `Direction`, sessions and frames.
//! Role: Security boundary between the open internal bus and untrusted connections.
//! Invariants: Addresses match exactly; there are no wildcards.
//! Invariants: Inbound and outbound lists are checked independently.
//! Invariants: Options are fixed once the bridge is built.

mod frame;
mod session;
mod websocket;

pub use frame::{ACCESS_DENIED, InboundFrame, OutboundFrame};
pub use session::{BridgeSession, FrameOutcome, SessionState};
pub use websocket::{WEBSOCKET_PATH, router};

use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::bus::EventBus;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PermittedOptions {
    pub address: String,
}

impl PermittedOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeOptions {
    pub inbound_permitted: Vec<PermittedOptions>,
    pub outbound_permitted: Vec<PermittedOptions>,
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_inbound_permitted(mut self, permitted: PermittedOptions) -> Self {
        self.inbound_permitted.push(permitted);
        self
    }

    pub fn add_outbound_permitted(mut self, permitted: PermittedOptions) -> Self {
        self.outbound_permitted.push(permitted);
        self
    }

    pub fn permits(&self, direction: Direction, address: &str) -> bool {
        let list = match direction {
            Direction::Inbound => &self.inbound_permitted,
            Direction::Outbound => &self.outbound_permitted,
        };
        list.iter().any(|permitted| permitted.address == address)
    }
}

/// Frames buffered per session before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Bridge {
    bus: EventBus,
    options: Arc<BridgeOptions>,
    next_session: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl Bridge {
    pub fn new(bus: EventBus, options: BridgeOptions) -> Self {
        Self {
            bus,
            options: Arc::new(options),
            next_session: Arc::new(AtomicU64::new(1)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// New session in the `Connecting` state plus the stream of frames to
    /// write back to the client.
    pub fn connect(&self) -> (BridgeSession, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = BridgeSession::new(id, self.bus.clone(), Arc::clone(&self.options), tx);
        (session, rx)
    }
}
