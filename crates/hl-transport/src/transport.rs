//! Transport core: outbound and inbound queues, the connection state
//! machine, requeue on connection loss, and callback dispatch.
//!
//! Queues:
//! - outbound-waiting: packets enqueued but not yet handed to the connection
//! - outbound-in-flight: packets handed to the connection, awaiting their ack
//! - received: inbound messages waiting for the message callback
//! - callbacks: resolved packets waiting for `invoke_callbacks`
//!
//! The three outbound queues and the state share one lock; the received
//! queue has its own, so inbound delivery never waits on outbound work.
//! Neither lock is held across an `.await` or while application callbacks
//! run. After a connection loss, in-flight packets are put back at the
//! *front* of outbound-waiting in their original order.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use hl_auth::CredentialProvider;
use hl_protocol::{IotHubStatusCode, Message};

use crate::config::{Protocol, TransportConfig};
use crate::connection::{IotHubListener, TransportConnection};
use crate::error::{TransportError, TransportResult};
use crate::https::HttpsConnection;
use crate::mqtt::MqttConnection;
use crate::packet::{
    CallbackContext, CallbackPacket, ConnectionStateCallback, EventCallback, MessageCallback,
    OutboundPacket,
};
use crate::state::{ConnectionEvent, ConnectionState};

#[derive(Default)]
struct SendSide {
    state: ConnectionState,
    waiting: VecDeque<OutboundPacket>,
    in_flight: VecDeque<OutboundPacket>,
    callbacks: VecDeque<CallbackPacket>,
    observer: Option<(ConnectionStateCallback, Option<CallbackContext>)>,
}

impl SendSide {
    fn observer(&self) -> Option<(ConnectionStateCallback, Option<CallbackContext>)> {
        self.observer.clone()
    }

    /// Move every in-flight packet back in front of the waiting ones.
    fn requeue_in_flight(&mut self) -> usize {
        let count = self.in_flight.len();
        while let Some(packet) = self.in_flight.pop_back() {
            self.waiting.push_front(packet);
        }
        count
    }

    fn take_in_flight(&mut self, message: &Arc<Message>) -> Option<OutboundPacket> {
        let index = self.in_flight.iter().position(|p| p.carries(message))?;
        self.in_flight.remove(index)
    }
}

#[derive(Default)]
struct ReceiveSide {
    received: VecDeque<Message>,
    handler: Option<(MessageCallback, Option<CallbackContext>)>,
}

/// Moves device messages between the application and one hub connection.
pub struct TransportCore {
    me: Weak<TransportCore>,
    connection: Arc<dyn TransportConnection>,
    send: Mutex<SendSide>,
    receive: Mutex<ReceiveSide>,
    /// Serializes open / close / send_messages, which await the connection.
    exchange: tokio::sync::Mutex<()>,
}

impl TransportCore {
    pub fn new(connection: Arc<dyn TransportConnection>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            connection,
            send: Mutex::new(SendSide::default()),
            receive: Mutex::new(ReceiveSide::default()),
            exchange: tokio::sync::Mutex::new(()),
        })
    }

    /// Build the credential provider and protocol connection the
    /// configuration names.
    pub fn from_config(config: &TransportConfig) -> TransportResult<Arc<Self>> {
        let connection: Arc<dyn TransportConnection> = match config.protocol {
            Protocol::Https => {
                let provider = config.authentication_provider()?;
                // Fail fast on unusable TLS material.
                provider.ssl_context()?;
                Arc::new(HttpsConnection::new(config, Arc::new(provider))?)
            }
            Protocol::Mqtt => {
                let provider = config.authentication_provider()?;
                provider.ssl_context()?;
                Arc::new(MqttConnection::new(config, Arc::new(provider))?)
            }
            Protocol::Amqps => {
                return Err(TransportError::UnsupportedProtocol(
                    "AMQPS transport is not available".into(),
                ));
            }
        };
        tracing::info!(
            hostname = %config.hostname,
            device_id = %config.device_id,
            protocol = ?config.protocol,
            "transport created"
        );
        Ok(Self::new(connection))
    }

    pub fn state(&self) -> ConnectionState {
        self.send.lock().state
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Register as the connection's listener and open it. No-op when open.
    pub async fn open(&self) -> TransportResult<()> {
        let _exchange = self.exchange.lock().await;
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        let listener: Weak<dyn IotHubListener> = self.me.clone();
        self.connection.add_listener(listener)?;
        self.connection.open().await?;

        self.send.lock().state = ConnectionState::Open;
        tracing::info!("transport opened");
        Ok(())
    }

    /// Cancel every pending outbound packet, run all pending callbacks,
    /// then close the connection. No-op when closed.
    ///
    /// The core is closed even if closing the connection fails; that error
    /// is still returned.
    pub async fn close(&self) -> TransportResult<()> {
        let _exchange = self.exchange.lock().await;

        let pending = {
            let mut guard = self.send.lock();
            let send = &mut *guard;
            if send.state == ConnectionState::Closed {
                return Ok(());
            }
            let cancelled = send
                .waiting
                .drain(..)
                .chain(send.in_flight.drain(..))
                .map(|p| p.resolve(IotHubStatusCode::MessageCancelledOnClose));
            send.callbacks.extend(cancelled);
            send.state = ConnectionState::Closed;
            send.callbacks.drain(..).collect::<Vec<_>>()
        };

        tracing::info!(callbacks = pending.len(), "closing transport");
        for packet in pending {
            packet.invoke();
        }

        self.connection.close().await
    }

    // ── Outbound ──────────────────────────────────────────────

    /// Queue a message for sending.
    pub fn enqueue_message(
        &self,
        message: Arc<Message>,
        callback: Option<EventCallback>,
        context: Option<CallbackContext>,
    ) -> TransportResult<()> {
        let mut send = self.send.lock();
        if send.state == ConnectionState::Closed {
            return Err(TransportError::IllegalState(
                "cannot add a message when the transport is closed".into(),
            ));
        }
        send.waiting
            .push_back(OutboundPacket::new(message, callback, context));
        Ok(())
    }

    /// Hand every packet that was waiting at the start of the call to the
    /// connection, one exchange at a time.
    ///
    /// Empty-bodied and expired messages are resolved (BAD_FORMAT and
    /// MESSAGE_EXPIRED) without touching the network. A failed exchange puts
    /// its packet back at the front of the waiting queue and stops the pass.
    pub async fn send_messages(&self) -> TransportResult<()> {
        let _exchange = self.exchange.lock().await;

        let batch = {
            let send = self.send.lock();
            if send.state == ConnectionState::Closed {
                return Err(TransportError::IllegalState(
                    "cannot send messages when the transport is closed".into(),
                ));
            }
            send.waiting.len()
        };

        for _ in 0..batch {
            let message = {
                let mut send = self.send.lock();
                let Some(packet) = send.waiting.pop_front() else {
                    break;
                };
                let message = Arc::clone(packet.message());
                if message.body().is_empty() {
                    tracing::warn!(message_id = ?message.message_id(), "skipping message with empty body");
                    send.callbacks
                        .push_back(packet.resolve(IotHubStatusCode::BadFormat));
                    continue;
                }
                if message.is_expired() {
                    tracing::info!(message_id = ?message.message_id(), "message expired before sending");
                    send.callbacks
                        .push_back(packet.resolve(IotHubStatusCode::MessageExpired));
                    continue;
                }
                send.in_flight.push_back(packet);
                message
            };

            match self.connection.send_message(&message).await {
                Ok(status) if status.is_success() => {
                    tracing::debug!(message_id = ?message.message_id(), %status, "message handed to hub");
                }
                Ok(status) => {
                    tracing::warn!(message_id = ?message.message_id(), %status, "hub rejected message");
                    let mut send = self.send.lock();
                    if let Some(packet) = send.take_in_flight(&message) {
                        send.callbacks.push_back(packet.resolve(status));
                    }
                }
                Err(e) => {
                    tracing::warn!(message_id = ?message.message_id(), error = %e, "send failed, message requeued");
                    let mut send = self.send.lock();
                    // A lost-connection notice may already have requeued it.
                    if let Some(packet) = send.take_in_flight(&message) {
                        send.waiting.push_front(packet);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Run every pending completion callback, oldest first.
    pub fn invoke_callbacks(&self) -> TransportResult<()> {
        let pending: Vec<_> = {
            let mut send = self.send.lock();
            if send.state == ConnectionState::Closed {
                return Err(TransportError::IllegalState(
                    "cannot invoke callbacks when the transport is closed".into(),
                ));
            }
            send.callbacks.drain(..).collect()
        };
        for packet in pending {
            tracing::debug!(status = %packet.status(), "invoking message callback");
            packet.invoke();
        }
        Ok(())
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Register the handler that decides each received message's result.
    pub fn set_message_callback(
        &self,
        callback: Option<MessageCallback>,
        context: Option<CallbackContext>,
    ) {
        self.receive.lock().handler = callback.map(|cb| (cb, context));
    }

    /// Poll the connection once for inbound messages.
    pub async fn receive_messages(&self) -> TransportResult<()> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::IllegalState(
                "cannot receive messages when the transport is closed".into(),
            ));
        }
        if let Some(message) = self.connection.receive_message().await? {
            self.on_message_received(Ok(message));
        }
        Ok(())
    }

    /// Pass the oldest received message to the message callback and send
    /// its result to the hub. Without a callback, messages stay queued.
    ///
    /// Returns whether a message was handled.
    pub async fn handle_message(&self) -> TransportResult<bool> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::IllegalState(
                "cannot handle messages when the transport is closed".into(),
            ));
        }

        let (message, callback, context) = {
            let mut receive = self.receive.lock();
            let Some((callback, context)) = receive.handler.clone() else {
                return Ok(false);
            };
            let Some(message) = receive.received.pop_front() else {
                return Ok(false);
            };
            (message, callback, context)
        };

        let result = callback(&message, context.as_ref());
        tracing::debug!(message_id = ?message.message_id(), %result, "sending message result");

        let status = self.connection.send_message_result(&message, result).await?;
        if !status.is_success() {
            return Err(TransportError::Service(status));
        }
        Ok(true)
    }

    // ── Observers ─────────────────────────────────────────────

    /// Replace the connection state observer. `None` is rejected and
    /// leaves the current observer in place.
    pub fn register_connection_state_callback(
        &self,
        callback: Option<ConnectionStateCallback>,
        context: Option<CallbackContext>,
    ) -> TransportResult<()> {
        let callback = callback
            .ok_or_else(|| TransportError::InvalidArgument("callback cannot be null".into()))?;
        self.send.lock().observer = Some((callback, context));
        Ok(())
    }

    /// True when all four queues are empty.
    pub fn is_empty(&self) -> bool {
        let empty_outbound = {
            let send = self.send.lock();
            send.waiting.is_empty() && send.in_flight.is_empty() && send.callbacks.is_empty()
        };
        empty_outbound && self.receive.lock().received.is_empty()
    }

    // ── Internal ──────────────────────────────────────────────

    /// Errors reported through the listener path. Retryable errors mean the
    /// connection is gone, so they are handled as a loss.
    fn handle_error(&self, error: TransportError) {
        if error.is_retryable() {
            tracing::warn!(error = %error, "retryable transport error");
            self.connection_dropped();
        } else {
            tracing::error!(error = %error, "transport error");
        }
    }

    fn connection_dropped(&self) {
        let (requeued, observer) = {
            let mut send = self.send.lock();
            (send.requeue_in_flight(), send.observer())
        };
        tracing::info!(requeued, "connection lost, in-flight messages requeued");
        notify(observer, ConnectionEvent::ConnectionDrop);
    }
}

fn notify(
    observer: Option<(ConnectionStateCallback, Option<CallbackContext>)>,
    event: ConnectionEvent,
) {
    if let Some((callback, context)) = observer {
        callback(event, context.as_ref());
    }
}

impl IotHubListener for TransportCore {
    fn on_message_sent(&self, message: &Arc<Message>, error: Option<TransportError>) {
        let mut send = self.send.lock();
        let Some(packet) = send.take_in_flight(message) else {
            tracing::debug!(message_id = ?message.message_id(), "ack for a message not in flight");
            return;
        };
        match error {
            None => send
                .callbacks
                .push_back(packet.resolve(IotHubStatusCode::OkEmpty)),
            Some(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "send not acknowledged, message requeued");
                send.waiting.push_front(packet);
            }
            Some(e) => {
                tracing::error!(error = %e, "send failed");
                send.callbacks.push_back(packet.resolve(IotHubStatusCode::Error));
            }
        }
    }

    fn on_message_received(&self, message: TransportResult<Message>) {
        match message {
            Ok(message) => {
                tracing::info!(message_id = ?message.message_id(), "message received from hub");
                self.receive.lock().received.push_back(message);
            }
            Err(e) => self.handle_error(e),
        }
    }

    fn on_connection_lost(&self, error: Option<TransportError>) {
        match error {
            None => self.connection_dropped(),
            Some(e) => self.handle_error(e),
        }
    }

    fn on_connection_established(&self, error: Option<TransportError>) {
        match error {
            None => {
                tracing::info!("connection to hub established");
                let observer = self.send.lock().observer();
                notify(observer, ConnectionEvent::ConnectionSuccess);
            }
            Some(e) => self.handle_error(e),
        }
    }
}
