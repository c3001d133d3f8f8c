//! The per-protocol connection seam and the listener it reports to.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;

use hl_protocol::{IotHubStatusCode, Message, MessageResult};

use crate::error::{TransportError, TransportResult};

// ── Listener ──────────────────────────────────────────────────

/// Sink for events a connection produces out of band.
///
/// Implementations must be cheap and non-blocking: connections call them
/// from their own tasks, and from inside `send_message` on failure.
pub trait IotHubListener: Send + Sync {
    /// A previously sent message was acknowledged (or failed).
    fn on_message_sent(&self, message: &Arc<Message>, error: Option<TransportError>);

    /// A cloud-to-device message arrived (or receiving failed).
    fn on_message_received(&self, message: TransportResult<Message>);

    fn on_connection_lost(&self, error: Option<TransportError>);

    fn on_connection_established(&self, error: Option<TransportError>);
}

/// Non-owning, replaceable reference to a connection's listener.
///
/// The transport core owns the connection, so the connection must never
/// keep the core alive.
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<RwLock<Option<Weak<dyn IotHubListener>>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `listener` as the single event sink. A dangling reference is
    /// rejected.
    pub fn set(&self, listener: Weak<dyn IotHubListener>) -> TransportResult<()> {
        if listener.strong_count() == 0 {
            return Err(TransportError::InvalidArgument(
                "listener cannot be null".into(),
            ));
        }
        *self.inner.write() = Some(listener);
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn IotHubListener>> {
        self.inner.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    pub fn message_sent(&self, message: &Arc<Message>, error: Option<TransportError>) {
        if let Some(listener) = self.get() {
            listener.on_message_sent(message, error);
        }
    }

    pub fn message_received(&self, message: TransportResult<Message>) {
        if let Some(listener) = self.get() {
            listener.on_message_received(message);
        }
    }

    pub fn connection_lost(&self, error: Option<TransportError>) {
        if let Some(listener) = self.get() {
            listener.on_connection_lost(error);
        }
    }

    pub fn connection_established(&self, error: Option<TransportError>) {
        if let Some(listener) = self.get() {
            listener.on_connection_established(error);
        }
    }
}

// ── Connection trait ──────────────────────────────────────────

/// One protocol's physical channel to the hub.
///
/// Synchronous protocols report a successful send both through the
/// returned status and `on_message_sent`; push-based protocols return
/// right after handing the message to the wire and report the
/// acknowledgement later.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Establish the channel. Calling it on an open connection is a no-op.
    async fn open(&self) -> TransportResult<()>;

    /// Register the single event sink.
    fn add_listener(&self, listener: Weak<dyn IotHubListener>) -> TransportResult<()>;

    /// Release the channel. Safe to call when already closed.
    async fn close(&self) -> TransportResult<()>;

    /// Perform one send exchange and return the hub status.
    ///
    /// On network failure the listener is told about the lost connection
    /// before the error is returned.
    async fn send_message(&self, message: &Arc<Message>) -> TransportResult<IotHubStatusCode>;

    /// Poll for one inbound message. Push-based protocols deliver through
    /// the listener instead and return `None`.
    async fn receive_message(&self) -> TransportResult<Option<Message>>;

    /// Acknowledge a received message.
    async fn send_message_result(
        &self,
        message: &Message,
        result: MessageResult,
    ) -> TransportResult<IotHubStatusCode>;
}
