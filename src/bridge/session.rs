//! Purpose: Per-connection bridge state machine, independent of the transport.
//! Exports: `BridgeSession`, `SessionState`, `FrameOutcome`.
//! Role: Applies allow-list checks and turns frames into bus traffic and back.
//! Invariants: `send`/`publish` consult the inbound list.
//! Invariants: `register`/`unregister` consult the outbound list.
//! Invariants: Denied frames never reach the bus and never close the session.
//! Invariants: Closing drops every registration this session created.
//! Invariants: The outbound queue is bounded; frames for a client that stops reading are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::frame::{InboundFrame, OutboundFrame};
use super::{BridgeOptions, Direction};
use crate::bus::{DeliveryOptions, EventBus};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameOutcome {
    Continue,
    Close,
}

pub struct BridgeSession {
    id: u64,
    bus: EventBus,
    options: Arc<BridgeOptions>,
    state: SessionState,
    out: mpsc::Sender<OutboundFrame>,
    registrations: HashMap<String, JoinHandle<()>>,
}

impl BridgeSession {
    pub(super) fn new(
        id: u64,
        bus: EventBus,
        options: Arc<BridgeOptions>,
        out: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            id,
            bus,
            options,
            state: SessionState::Connecting,
            out,
            registrations: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.registrations.contains_key(address)
    }

    pub fn open(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Open;
            tracing::debug!(session = self.id, "bridge session open");
        }
    }

    /// Handles one text frame. A frame that does not parse is a protocol
    /// error and closes the session.
    pub fn handle_text(&mut self, text: &str) -> FrameOutcome {
        if self.state != SessionState::Open {
            tracing::debug!(session = self.id, state = ?self.state, "frame ignored");
            return self.outcome();
        }
        match InboundFrame::parse(text) {
            Ok(frame) => {
                self.handle_frame(frame);
                self.outcome()
            }
            Err(err) => {
                tracing::warn!(session = self.id, error = %err, "malformed bridge frame");
                self.close();
                FrameOutcome::Close
            }
        }
    }

    pub fn handle_frame(&mut self, frame: InboundFrame) {
        if self.state != SessionState::Open {
            return;
        }
        match frame {
            InboundFrame::Send {
                address,
                body,
                reply_address,
                headers,
            } => {
                if !self.permitted(Direction::Inbound, &address) {
                    if reply_address.is_some() {
                        push_frame(&self.out, self.id, OutboundFrame::access_denied(reply_address));
                    }
                    return;
                }
                let options = DeliveryOptions {
                    headers,
                    timeout: None,
                };
                match reply_address {
                    Some(reply_address) => {
                        self.forward_request(address, body, options, reply_address)
                    }
                    None => self.bus.send(&address, body, options),
                }
            }
            InboundFrame::Publish {
                address,
                body,
                headers,
            } => {
                if !self.permitted(Direction::Inbound, &address) {
                    return;
                }
                let options = DeliveryOptions {
                    headers,
                    timeout: None,
                };
                self.bus.publish(&address, body, options);
            }
            InboundFrame::Register { address } => {
                if !self.permitted(Direction::Outbound, &address) {
                    return;
                }
                self.register(address);
            }
            InboundFrame::Unregister { address } => {
                if !self.permitted(Direction::Outbound, &address) {
                    return;
                }
                if let Some(task) = self.registrations.remove(&address) {
                    task.abort();
                }
            }
            InboundFrame::Ping => {}
        }
    }

    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        for (_, task) in self.registrations.drain() {
            task.abort();
        }
        tracing::debug!(session = self.id, "bridge session closed");
    }

    fn outcome(&self) -> FrameOutcome {
        match self.state {
            SessionState::Closed => FrameOutcome::Close,
            SessionState::Connecting | SessionState::Open => FrameOutcome::Continue,
        }
    }

    fn permitted(&self, direction: Direction, address: &str) -> bool {
        let allowed = self.options.permits(direction, address);
        if !allowed {
            tracing::warn!(session = self.id, ?direction, address, "bridge frame denied");
        }
        allowed
    }

    fn forward_request(
        &self,
        address: String,
        body: serde_json::Value,
        options: DeliveryOptions,
        reply_address: String,
    ) {
        let bus = self.bus.clone();
        let out = self.out.clone();
        let session = self.id;
        tokio::spawn(async move {
            let frame = match bus.request(&address, body, options).await {
                Ok(body) => OutboundFrame::Rec {
                    address: reply_address,
                    body,
                    headers: Default::default(),
                },
                Err(failure) => OutboundFrame::failure(reply_address, failure),
            };
            push_frame(&out, session, frame);
        });
    }

    fn register(&mut self, address: String) {
        if self.registrations.contains_key(&address) {
            return;
        }
        let mut consumer = self.bus.consumer(address.clone());
        let out = self.out.clone();
        let session = self.id;
        let forwarded_address = address.clone();
        let task = tokio::spawn(async move {
            while let Some(mut message) = consumer.recv().await {
                let frame = OutboundFrame::Rec {
                    address: forwarded_address.clone(),
                    body: message.take_body(),
                    headers: message.headers().clone(),
                };
                if !push_frame(&out, session, frame) {
                    break;
                }
            }
        });
        self.registrations.insert(address, task);
    }
}

/// Queues `frame` for the client. Returns false once the transport is gone.
fn push_frame(out: &mpsc::Sender<OutboundFrame>, session: u64, frame: OutboundFrame) -> bool {
    match out.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(session, "bridge client is not reading; frame dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.close();
    }
}
