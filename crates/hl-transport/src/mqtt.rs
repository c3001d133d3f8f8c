//! MQTT hub connection.
//!
//! Wraps `rumqttc::AsyncClient`. A spawned driver task polls the event loop
//! and turns broker traffic into listener events:
//! - ConnAck → `on_connection_established`
//! - PubAck → `on_message_sent` for the publish with that packet id
//! - inbound devicebound publish → `on_message_received`
//! - event-loop error → `on_connection_lost` (once per drop)
//!
//! Before every reconnect attempt the driver re-reads the device password,
//! so a renewed SAS token replaces the one the session was opened with.
//! Publishes that were already written when the link dropped are discarded
//! instead of replayed, since the transport core requeues those messages.
//!
//! `send_message` returns as soon as the publish is queued; the hub's
//! PubAck retires the message later.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Request,
    Subscribe,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use hl_auth::{AuthenticationProvider, CredentialProvider};
use hl_protocol::{IotHubStatusCode, Message, MessageResult, uri};

use crate::config::TransportConfig;
use crate::connection::{IotHubListener, ListenerSlot, TransportConnection};
use crate::error::{TransportError, TransportResult};
use crate::handler;
use crate::tls;

/// Delay before polling again after an event-loop error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ── Publish tracking ──────────────────────────────────────────

/// Maps outgoing packet ids back to the messages they carry.
///
/// rumqttc assigns packet ids inside the event loop, in request order, so
/// queued publishes are matched FIFO to `Outgoing::Publish(pkid)` events.
#[derive(Default)]
pub(crate) struct PublishTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    awaiting_pkid: VecDeque<Arc<Message>>,
    by_pkid: HashMap<u16, Arc<Message>>,
}

impl PublishTracker {
    pub(crate) fn queued(&self, message: Arc<Message>) {
        self.inner.lock().awaiting_pkid.push_back(message);
    }

    /// Undo `queued` for a publish the client refused.
    pub(crate) fn forget(&self, message: &Arc<Message>) {
        self.inner
            .lock()
            .awaiting_pkid
            .retain(|m| !Arc::ptr_eq(m, message));
    }

    pub(crate) fn assigned(&self, pkid: u16) {
        let mut state = self.inner.lock();
        if let Some(message) = state.awaiting_pkid.pop_front() {
            state.by_pkid.insert(pkid, message);
        }
    }

    pub(crate) fn acked(&self, pkid: u16) -> Option<Arc<Message>> {
        self.inner.lock().by_pkid.remove(&pkid)
    }

    /// Drop the publishes that already carry a packet id. Publishes still
    /// waiting in the request channel keep their place.
    pub(crate) fn written_lost(&self) {
        self.inner.lock().by_pkid.clear();
    }

    pub(crate) fn clear(&self) {
        let mut state = self.inner.lock();
        state.awaiting_pkid.clear();
        state.by_pkid.clear();
    }
}

// ── Driver ────────────────────────────────────────────────────

#[derive(Default)]
struct Flags {
    connected: AtomicBool,
    closing: AtomicBool,
    received_any: AtomicBool,
}

struct Driver {
    hostname: String,
    device_id: String,
    provider: Arc<AuthenticationProvider>,
    listener: ListenerSlot,
    tracker: Arc<PublishTracker>,
    flags: Arc<Flags>,
}

impl Driver {
    async fn run(self, mut eventloop: EventLoop, ready: oneshot::Sender<TransportResult<()>>) {
        let mut ready = Some(ready);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.flags.connected.store(true, Ordering::SeqCst);
                        tracing::info!(device_id = %self.device_id, "MQTT connected");
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Ok(()));
                        }
                        self.listener.connection_established(None);
                    } else {
                        let error = TransportError::protocol(
                            format!("connection refused: {:?}", ack.code),
                            false,
                        );
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(error));
                            return;
                        }
                        self.listener.connection_established(Some(error));
                    }
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => self.tracker.assigned(pkid),
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    if let Some(message) = self.tracker.acked(ack.pkid) {
                        self.listener.message_sent(&message, None);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match handler::message_from_publish(&self.device_id, &publish) {
                        Some(message) => {
                            self.flags.received_any.store(true, Ordering::SeqCst);
                            self.listener.message_received(Ok(message));
                        }
                        None => tracing::debug!(topic = %publish.topic, "ignoring publish"),
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::debug!("MQTT disconnect sent");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.flags.closing.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(TransportError::protocol(
                            format!("MQTT connect failed: {e}"),
                            true,
                        )));
                        return;
                    }
                    if self.flags.connected.swap(false, Ordering::SeqCst) {
                        tracing::warn!(error = %e, "MQTT connection lost");
                        self.discard_written(&mut eventloop);
                        self.listener.connection_lost(None);
                    } else {
                        tracing::debug!(error = %e, "MQTT reconnect attempt failed");
                    }
                    self.refresh_credentials(&mut eventloop);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Forget publishes written before the drop. rumqttc would replay them
    /// under their old packet ids after reconnecting. Publishes it drained
    /// from the request channel have no packet id yet and stay queued in
    /// order. The session is clean, so the devicebound subscription is
    /// requested again first.
    fn discard_written(&self, eventloop: &mut EventLoop) {
        let before = eventloop.pending.len();
        eventloop
            .pending
            .retain(|request| !matches!(request, Request::Publish(p) if p.pkid != 0));
        let discarded = before - eventloop.pending.len();
        eventloop.pending.push_front(Request::Subscribe(Subscribe::new(
            uri::mqtt_devicebound_filter(&self.device_id),
            QoS::AtLeastOnce,
        )));
        self.tracker.written_lost();
        tracing::debug!(device_id = %self.device_id, discarded, "dropped unacknowledged publishes");
    }

    fn refresh_credentials(&self, eventloop: &mut EventLoop) {
        if let Err(e) = apply_credentials(
            &mut eventloop.mqtt_options,
            &self.hostname,
            &self.device_id,
            &self.provider,
        ) {
            tracing::warn!(device_id = %self.device_id, error = %e, "MQTT credential refresh failed");
        }
    }
}

/// Set the hub username and the provider's current token as the password.
/// X.509 devices carry no password.
fn apply_credentials(
    options: &mut MqttOptions,
    hostname: &str,
    device_id: &str,
    provider: &AuthenticationProvider,
) -> TransportResult<()> {
    if let Some(token) = provider.token()? {
        options.set_credentials(uri::mqtt_username(hostname, device_id), token);
    }
    Ok(())
}

// ── Connection ────────────────────────────────────────────────

struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

/// Hub connection over MQTT (TLS, port 8883 by default).
pub struct MqttConnection {
    hostname: String,
    device_id: String,
    port: u16,
    keepalive: Duration,
    connect_timeout: Duration,
    provider: Arc<AuthenticationProvider>,
    listener: ListenerSlot,
    tracker: Arc<PublishTracker>,
    flags: Arc<Flags>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl MqttConnection {
    pub fn new(config: &TransportConfig, provider: Arc<AuthenticationProvider>) -> TransportResult<Self> {
        if config.hostname.trim().is_empty() || config.device_id.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "hostname and device id are required".into(),
            ));
        }
        Ok(Self {
            hostname: config.hostname.clone(),
            device_id: config.device_id.clone(),
            port: config.mqtt_port,
            keepalive: config.keepalive(),
            connect_timeout: config.read_timeout(),
            provider,
            listener: ListenerSlot::new(),
            tracker: Arc::new(PublishTracker::default()),
            flags: Arc::new(Flags::default()),
            session: tokio::sync::Mutex::new(None),
        })
    }

    fn options(&self) -> TransportResult<MqttOptions> {
        let mut options = MqttOptions::new(&self.device_id, &self.hostname, self.port);
        options.set_keep_alive(self.keepalive);
        apply_credentials(&mut options, &self.hostname, &self.device_id, &self.provider)?;
        let context = self.provider.ssl_context()?;
        options.set_transport(tls::mqtt_transport(&context)?);
        Ok(options)
    }

    fn driver(&self) -> Driver {
        Driver {
            hostname: self.hostname.clone(),
            device_id: self.device_id.clone(),
            provider: Arc::clone(&self.provider),
            listener: self.listener.clone(),
            tracker: Arc::clone(&self.tracker),
            flags: Arc::clone(&self.flags),
        }
    }
}

#[async_trait]
impl TransportConnection for MqttConnection {
    async fn open(&self) -> TransportResult<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let (client, eventloop) = AsyncClient::new(self.options()?, 64);
        client
            .subscribe(uri::mqtt_devicebound_filter(&self.device_id), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::protocol(format!("subscribe failed: {e}"), false))?;

        self.flags.closing.store(false, Ordering::SeqCst);
        self.flags.received_any.store(false, Ordering::SeqCst);
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = tokio::spawn(self.driver().run(eventloop, ready_tx));

        let outcome = match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Other("MQTT driver stopped".into())),
            Err(_) => Err(TransportError::protocol("timed out waiting for CONNACK", true)),
        };
        if let Err(e) = outcome {
            driver.abort();
            return Err(e);
        }

        *session = Some(Session { client, driver });
        Ok(())
    }

    fn add_listener(&self, listener: Weak<dyn IotHubListener>) -> TransportResult<()> {
        self.listener.set(listener)
    }

    async fn close(&self) -> TransportResult<()> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        self.flags.closing.store(true, Ordering::SeqCst);

        if let Err(e) = session.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
        let mut driver = session.driver;
        if tokio::time::timeout(Duration::from_secs(1), &mut driver)
            .await
            .is_err()
        {
            driver.abort();
        }

        self.flags.connected.store(false, Ordering::SeqCst);
        self.tracker.clear();
        tracing::info!(device_id = %self.device_id, "MQTT connection closed");
        Ok(())
    }

    async fn send_message(&self, message: &Arc<Message>) -> TransportResult<IotHubStatusCode> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return Err(TransportError::IllegalState("MQTT connection is not open".into()));
        };

        let topic = uri::mqtt_events_topic(&self.device_id, &handler::encode_property_bag(message));
        self.tracker.queued(Arc::clone(message));
        if let Err(e) = session
            .client
            .publish(topic, QoS::AtLeastOnce, false, message.body().to_vec())
            .await
        {
            self.tracker.forget(message);
            let error = TransportError::protocol(format!("publish failed: {e}"), true);
            tracing::warn!(device_id = %self.device_id, error = %error, "MQTT publish not queued");
            self.listener.connection_lost(Some(error.clone()));
            return Err(error);
        }
        Ok(IotHubStatusCode::OkEmpty)
    }

    async fn receive_message(&self) -> TransportResult<Option<Message>> {
        Ok(None)
    }

    async fn send_message_result(
        &self,
        _message: &Message,
        result: MessageResult,
    ) -> TransportResult<IotHubStatusCode> {
        if !self.flags.received_any.load(Ordering::SeqCst) {
            return Err(TransportError::IllegalState(
                "cannot send a message result before a message is received".into(),
            ));
        }
        match result {
            // The QoS 1 PubAck already completed the message.
            MessageResult::Complete => Ok(IotHubStatusCode::OkEmpty),
            other => Err(TransportError::protocol(
                format!("MQTT does not support the {other} result"),
                false,
            )),
        }
    }
}
