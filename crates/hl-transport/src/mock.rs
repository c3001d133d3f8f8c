//! Scripted connection for testing without a hub.
//!
//! Records every send and message result, and lets tests script statuses,
//! failures, and inbound traffic.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use hl_protocol::{IotHubStatusCode, Message, MessageResult};

use crate::connection::{IotHubListener, ListenerSlot, TransportConnection};
use crate::error::{TransportError, TransportResult};

#[derive(Default)]
struct Script {
    open_calls: usize,
    close_calls: usize,
    open_error: Option<TransportError>,
    close_error: Option<TransportError>,
    send_errors: VecDeque<TransportError>,
    send_statuses: VecDeque<IotHubStatusCode>,
    result_status: Option<IotHubStatusCode>,
    inbound: VecDeque<Message>,
    sent: Vec<Arc<Message>>,
    results: Vec<(Message, MessageResult)>,
    held_sends: usize,
}

/// In-memory implementation of [`TransportConnection`].
#[derive(Default)]
pub struct MockConnection {
    listener: ListenerSlot,
    script: Mutex<Script>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    auto_ack: bool,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge every successful send through the listener before
    /// `send_message` returns, the way a request/response protocol does.
    pub fn with_auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    // ── Scripting ─────────────────────────────────────────────

    pub fn fail_open(&self, error: TransportError) {
        self.script.lock().open_error = Some(error);
    }

    pub fn fail_close(&self, error: TransportError) {
        self.script.lock().close_error = Some(error);
    }

    /// Fail the next send. Retryable errors are also reported to the
    /// listener as a lost connection.
    pub fn fail_next_send(&self, error: TransportError) {
        self.script.lock().send_errors.push_back(error);
    }

    /// Status for the next successful send (default OK_EMPTY).
    pub fn push_send_status(&self, status: IotHubStatusCode) {
        self.script.lock().send_statuses.push_back(status);
    }

    /// Status returned for every message result (default OK_EMPTY).
    pub fn set_result_status(&self, status: IotHubStatusCode) {
        self.script.lock().result_status = Some(status);
    }

    /// Queue a message for the next `receive_message` poll.
    pub fn push_inbound(&self, message: Message) {
        self.script.lock().inbound.push_back(message);
    }

    /// Park every following `send_message` until [`allow_sends`] or
    /// [`release_sends`].
    ///
    /// [`allow_sends`]: Self::allow_sends
    /// [`release_sends`]: Self::release_sends
    pub fn hold_sends(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` parked or future sends through.
    pub fn allow_sends(&self, count: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(count);
        }
    }

    /// Let every send through and stop parking.
    pub fn release_sends(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Sends currently parked by [`hold_sends`](Self::hold_sends).
    pub fn held_sends(&self) -> usize {
        self.script.lock().held_sends
    }

    // ── Simulated events ──────────────────────────────────────

    pub fn ack(&self, message: &Arc<Message>) {
        self.listener.message_sent(message, None);
    }

    pub fn deliver(&self, message: Message) {
        self.listener.message_received(Ok(message));
    }

    pub fn drop_connection(&self) {
        self.listener.connection_lost(None);
    }

    pub fn establish_connection(&self) {
        self.listener.connection_established(None);
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn open_calls(&self) -> usize {
        self.script.lock().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.script.lock().close_calls
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_set()
    }

    pub fn sent(&self) -> Vec<Arc<Message>> {
        self.script.lock().sent.clone()
    }

    pub fn results(&self) -> Vec<(Message, MessageResult)> {
        self.script.lock().results.clone()
    }
}

#[async_trait]
impl TransportConnection for MockConnection {
    async fn open(&self) -> TransportResult<()> {
        let mut script = self.script.lock();
        script.open_calls += 1;
        match script.open_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn add_listener(&self, listener: Weak<dyn IotHubListener>) -> TransportResult<()> {
        self.listener.set(listener)
    }

    async fn close(&self) -> TransportResult<()> {
        let mut script = self.script.lock();
        script.close_calls += 1;
        match script.close_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_message(&self, message: &Arc<Message>) -> TransportResult<IotHubStatusCode> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.script.lock().held_sends += 1;
            // A closed gate lets the send through.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            self.script.lock().held_sends -= 1;
        }

        let outcome = {
            let mut script = self.script.lock();
            match script.send_errors.pop_front() {
                Some(e) => Err(e),
                None => {
                    script.sent.push(Arc::clone(message));
                    Ok(script
                        .send_statuses
                        .pop_front()
                        .unwrap_or(IotHubStatusCode::OkEmpty))
                }
            }
        };

        match outcome {
            Ok(status) => {
                if self.auto_ack && status.is_success() {
                    self.listener.message_sent(message, None);
                }
                Ok(status)
            }
            Err(e) => {
                if e.is_retryable() {
                    self.listener.connection_lost(Some(e.clone()));
                }
                Err(e)
            }
        }
    }

    async fn receive_message(&self) -> TransportResult<Option<Message>> {
        Ok(self.script.lock().inbound.pop_front())
    }

    async fn send_message_result(
        &self,
        message: &Message,
        result: MessageResult,
    ) -> TransportResult<IotHubStatusCode> {
        let mut script = self.script.lock();
        script.results.push((message.clone(), result));
        Ok(script.result_status.unwrap_or(IotHubStatusCode::OkEmpty))
    }
}
