//! Queue entries and application callback types.

use std::any::Any;
use std::sync::Arc;

use hl_protocol::{IotHubStatusCode, Message, MessageResult};

use crate::state::ConnectionEvent;

/// Opaque value handed back to the application with its callback.
pub type CallbackContext = Arc<dyn Any + Send + Sync>;

/// Completion callback for an outbound message.
pub type EventCallback = Arc<dyn Fn(IotHubStatusCode, Option<&CallbackContext>) + Send + Sync>;

/// Observer for connection success / drop events.
pub type ConnectionStateCallback =
    Arc<dyn Fn(ConnectionEvent, Option<&CallbackContext>) + Send + Sync>;

/// Handler for inbound messages; its return value is sent back to the hub.
pub type MessageCallback =
    Arc<dyn Fn(&Message, Option<&CallbackContext>) -> MessageResult + Send + Sync>;

/// A message waiting to be sent (or awaiting its acknowledgement).
#[derive(Clone)]
pub struct OutboundPacket {
    message: Arc<Message>,
    callback: Option<EventCallback>,
    context: Option<CallbackContext>,
}

impl OutboundPacket {
    pub fn new(
        message: Arc<Message>,
        callback: Option<EventCallback>,
        context: Option<CallbackContext>,
    ) -> Self {
        Self {
            message,
            callback,
            context,
        }
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Whether this packet carries exactly `message` (identity, not content).
    pub fn carries(&self, message: &Arc<Message>) -> bool {
        Arc::ptr_eq(&self.message, message)
    }

    /// Resolve the packet with a final status.
    pub fn resolve(self, status: IotHubStatusCode) -> CallbackPacket {
        CallbackPacket {
            status,
            callback: self.callback,
            context: self.context,
        }
    }
}

impl std::fmt::Debug for OutboundPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPacket")
            .field("message_id", &self.message.message_id())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// An outbound packet's outcome, waiting for `invoke_callbacks`.
pub struct CallbackPacket {
    status: IotHubStatusCode,
    callback: Option<EventCallback>,
    context: Option<CallbackContext>,
}

impl CallbackPacket {
    pub fn status(&self) -> IotHubStatusCode {
        self.status
    }

    /// Run the callback, consuming the packet so it fires at most once.
    pub fn invoke(self) {
        if let Some(callback) = self.callback {
            callback(self.status, self.context.as_ref());
        }
    }
}

impl std::fmt::Debug for CallbackPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPacket")
            .field("status", &self.status)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
