//! Lifecycle event fan-out to the hosting application.
//!
//! Two delivery paths share one emit call: registered [`ConnectionHandler`]s
//! run synchronously, in order, on the emitting task; async consumers get the
//! same event through a `tokio::sync::broadcast` channel.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip events (RecvError::Lagged).
const EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A new session was created.
    Connected { client_id: String },
    /// A session was evicted after going idle.
    Disconnected { client_id: String },
    /// A client pushed data through `send`.
    Received { client_id: String, data: String },
    /// A `connect` poll is about to return these payloads.
    Sending {
        client_id: String,
        messages: Vec<Value>,
    },
}

impl ConnectionEvent {
    pub fn client_id(&self) -> &str {
        match self {
            Self::Connected { client_id }
            | Self::Disconnected { client_id }
            | Self::Received { client_id, .. }
            | Self::Sending { client_id, .. } => client_id,
        }
    }
}

/// Synchronous event callbacks. Every method defaults to a no-op.
///
/// Handlers run with no registry lock held, so they may call back into the
/// connection (e.g. `send` from `on_received`). They must not block.
pub trait ConnectionHandler: Send + Sync {
    fn on_connect(&self, _client_id: &str) {}
    fn on_disconnect(&self, _client_id: &str) {}
    fn on_received(&self, _client_id: &str, _data: &str) {}
    fn on_sending(&self, _client_id: &str, _messages: &[Value]) {}
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct EventHub {
    handlers: RwLock<Vec<Arc<dyn ConnectionHandler>>>,
    sender: broadcast::Sender<Arc<ConnectionEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Register a synchronous handler. Handlers fire in registration order.
    pub fn register(&self, handler: Arc<dyn ConnectionHandler>) {
        self.handlers.write().push(handler);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConnectionEvent>> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ConnectionEvent) {
        // Clone the list so a handler can register another without deadlocking.
        let handlers = self.handlers.read().clone();
        for handler in &handlers {
            match &event {
                ConnectionEvent::Connected { client_id } => handler.on_connect(client_id),
                ConnectionEvent::Disconnected { client_id } => handler.on_disconnect(client_id),
                ConnectionEvent::Received { client_id, data } => {
                    handler.on_received(client_id, data)
                }
                ConnectionEvent::Sending {
                    client_id,
                    messages,
                } => handler.on_sending(client_id, messages),
            }
        }

        // Err only means nobody is subscribed.
        let _ = self.sender.send(Arc::new(event));
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
