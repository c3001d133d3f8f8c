//! Application-facing device client.
//!
//! A thin facade over [`TransportCore`]: the application enqueues events
//! and registers handlers here, while [`crate::pump`] drives the core.

use std::sync::Arc;

use hl_protocol::Message;
use hl_transport::{
    CallbackContext, ConnectionState, ConnectionStateCallback, EventCallback, MessageCallback,
    Protocol, TransportConfig, TransportCore, TransportResult,
};

/// Device-side handle for one hub connection.
#[derive(Clone)]
pub struct DeviceClient {
    transport: Arc<TransportCore>,
    device_id: String,
}

impl DeviceClient {
    /// Build the transport the configuration describes.
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        Ok(Self {
            transport: TransportCore::from_config(config)?,
            device_id: config.device_id.clone(),
        })
    }

    /// Build from a `HostName=...;DeviceId=...;SharedAccessKey=...` string.
    pub fn from_connection_string(connection_string: &str, protocol: Protocol) -> TransportResult<Self> {
        Self::new(&TransportConfig::from_connection_string(connection_string, protocol)?)
    }

    /// Wrap an existing transport.
    pub fn with_transport(transport: Arc<TransportCore>, device_id: impl Into<String>) -> Self {
        Self {
            transport,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn transport(&self) -> &Arc<TransportCore> {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub async fn open(&self) -> TransportResult<()> {
        self.transport.open().await?;
        tracing::info!(device_id = %self.device_id, "device client opened");
        Ok(())
    }

    /// Close the connection. Pending events complete with
    /// MESSAGE_CANCELLED_ONCLOSE.
    pub async fn close(&self) -> TransportResult<()> {
        self.transport.close().await?;
        tracing::info!(device_id = %self.device_id, "device client closed");
        Ok(())
    }

    /// Queue a device-to-cloud event. `callback` fires from the pump once
    /// the hub's answer (or a cancellation) is known.
    pub fn send_event_async(
        &self,
        message: Message,
        callback: Option<EventCallback>,
        context: Option<CallbackContext>,
    ) -> TransportResult<()> {
        self.transport
            .enqueue_message(Arc::new(message), callback, context)
    }

    pub fn set_message_callback(
        &self,
        callback: Option<MessageCallback>,
        context: Option<CallbackContext>,
    ) {
        self.transport.set_message_callback(callback, context);
    }

    pub fn register_connection_state_callback(
        &self,
        callback: ConnectionStateCallback,
        context: Option<CallbackContext>,
    ) -> TransportResult<()> {
        self.transport
            .register_connection_state_callback(Some(callback), context)
    }
}
