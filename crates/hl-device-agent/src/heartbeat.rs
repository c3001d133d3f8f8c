//! Periodic heartbeat event.
//!
//! Enqueues a small JSON `Heartbeat` event at a configurable interval so
//! the cloud knows the device is alive. The pump delivers it like any
//! other event.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time;

use hl_protocol::Message;

use crate::client::DeviceClient;

const CONTENT_TYPE_JSON: &str = "application/json";

/// Heartbeat event body.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub device_id: String,
    pub uptime_secs: u64,
    pub agent_version: String,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(device_id: impl Into<String>, uptime: Duration) -> Self {
        Self {
            device_id: device_id.into(),
            uptime_secs: uptime.as_secs(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> anyhow::Result<Message> {
        let message = Message::new(serde_json::to_vec(self)?)
            .with_content_type(CONTENT_TYPE_JSON)
            .with_property("event-type", "heartbeat")?;
        Ok(message)
    }
}

/// Run the heartbeat loop, enqueueing at `interval`.
///
/// This function runs forever until the task is cancelled. Intended
/// to be raced against the pump in the agent's main loop.
pub async fn run(client: &DeviceClient, interval: Duration, start_time: time::Instant) {
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let heartbeat = Heartbeat::new(client.device_id(), start_time.elapsed());
        let message = match heartbeat.to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode heartbeat");
                continue;
            }
        };

        if let Err(e) = client.send_event_async(message, None, None) {
            tracing::warn!(error = %e, "failed to enqueue heartbeat");
        } else {
            tracing::debug!(uptime_secs = heartbeat.uptime_secs, "heartbeat queued");
        }
    }
}
