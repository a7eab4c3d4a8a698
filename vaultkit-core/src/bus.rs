//! In-process message bus connecting the engine and its contexts.
//!
//! Built on a tokio broadcast channel. Every subscriber sees every envelope;
//! [`ContextReceiver`] filters out envelopes addressed to someone else so a
//! context only observes its own traffic plus broadcasts.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::notification::Notification;
use crate::state::AppState;
use crate::types::ContextId;

/// Delivery scope of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every connected context.
    Broadcast,
    /// Exactly one context.
    Context(ContextId),
}

impl Target {
    /// Whether an envelope with this target is visible to `context`.
    #[must_use]
    pub fn accepts(&self, context: ContextId) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Context(id) => *id == context,
        }
    }
}

/// Messages exchanged over the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// A context came alive and wants current state.
    Wakeup {
        /// The waking context.
        context: ContextId,
    },
    /// Full state copy after an applied action. Shared, not cloned, so a
    /// wide fan-out stays cheap.
    StateSync {
        /// The state as of the applied action.
        state: Arc<AppState>,
    },
    /// The wakeup handshake for `context` completed.
    WakeupSuccess {
        /// The context whose wakeup finished.
        context: ContextId,
    },
    /// A user-facing notification.
    Notification(Notification),
}

/// An addressed bus message.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Delivery scope.
    pub target: Target,
    /// The payload.
    pub message: BusMessage,
}

/// Cloneable handle to the shared bus.
#[derive(Debug, Clone)]
pub struct InProcBus {
    tx: broadcast::Sender<Envelope>,
}

impl InProcBus {
    /// Creates a bus retaining up to `capacity` undelivered envelopes per
    /// subscriber before it starts lagging.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to the raw envelope stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Subscribes on behalf of `context`, hiding envelopes addressed to
    /// other contexts.
    #[must_use]
    pub fn subscribe_context(&self, context: ContextId) -> ContextReceiver {
        ContextReceiver {
            context,
            rx: self.tx.subscribe(),
        }
    }

    /// Sends `message` to every subscriber. Delivery is best-effort; with
    /// no subscribers the envelope is dropped.
    pub fn broadcast(&self, message: BusMessage) {
        let _ = self.tx.send(Envelope {
            target: Target::Broadcast,
            message,
        });
    }

    /// Sends `message` to `context` only.
    pub fn send_to(&self, context: ContextId, message: BusMessage) {
        let _ = self.tx.send(Envelope {
            target: Target::Context(context),
            message,
        });
    }
}

/// Receiving end scoped to one context.
#[derive(Debug)]
pub struct ContextReceiver {
    context: ContextId,
    rx: broadcast::Receiver<Envelope>,
}

impl ContextReceiver {
    /// Waits for the next message visible to this context.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`broadcast::error::RecvError`] when the bus
    /// is closed or this receiver lagged too far behind.
    pub async fn recv(&mut self) -> Result<BusMessage, broadcast::error::RecvError> {
        loop {
            let envelope = self.rx.recv().await?;
            if envelope.target.accepts(self.context) {
                return Ok(envelope.message);
            }
        }
    }
}
