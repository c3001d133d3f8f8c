//! Shared test harness for E2E integration tests.
//!
//! Points a real `DeviceClient` (HTTPS transport, SAS authentication) at a
//! `wiremock` server standing in for the hub.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use wiremock::MockServer;

use hl_device_agent::{AgentConfig, DeviceClient};
use hl_protocol::IotHubStatusCode;
use hl_transport::{ConnectionEvent, ConnectionStateCallback, EventCallback};

pub const DEVICE_ID: &str = "sensor-001";
pub const HOSTNAME: &str = "hub.example.net";
/// base64("device-secret-key")
pub const DEVICE_KEY: &str = "ZGV2aWNlLXNlY3JldC1rZXk=";

pub fn events_path() -> String {
    format!("/devices/{DEVICE_ID}/messages/events")
}

pub fn devicebound_path() -> String {
    format!("/devices/{DEVICE_ID}/messages/devicebound")
}

/// Agent config as it would appear in `/etc/hublink/agent.toml`, with the
/// HTTPS endpoint redirected to `endpoint`.
pub fn agent_config(endpoint: &str) -> AgentConfig {
    let text = format!(
        r#"
poll_interval_ms = 10
receive_interval_ms = 20
heartbeat_interval_secs = 0

[transport]
hostname = "{HOSTNAME}"
device_id = "{DEVICE_ID}"
protocol = "https"
read_timeout_millis = 2000
message_lock_timeout_secs = 60
endpoint = "{endpoint}"

[transport.auth]
type = "sas_token"
device_key = "{DEVICE_KEY}"
"#
    );
    toml::from_str(&text).expect("valid agent config")
}

/// Device client wired to a mock hub.
pub struct HubHarness {
    pub hub: MockServer,
    pub config: AgentConfig,
    pub client: DeviceClient,
    pub events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl HubHarness {
    /// Start a mock hub and an opened client pointing at it.
    pub async fn start() -> Self {
        let hub = MockServer::start().await;
        let harness = Self::for_endpoint(hub, None).await;
        harness.client.open().await.expect("client opens");
        harness
    }

    /// Opened client whose endpoint refuses connections.
    pub async fn unreachable() -> Self {
        let hub = MockServer::start().await;
        let harness = Self::for_endpoint(hub, Some("http://127.0.0.1:1")).await;
        harness.client.open().await.expect("client opens");
        harness
    }

    async fn for_endpoint(hub: MockServer, endpoint: Option<&str>) -> Self {
        let uri = hub.uri();
        let config = agent_config(endpoint.unwrap_or(&uri));
        let client = DeviceClient::new(&config.transport).expect("client builds");

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let observer: ConnectionStateCallback =
            Arc::new(move |event, _| sink.lock().unwrap().push(event));
        client
            .register_connection_state_callback(observer, None)
            .expect("observer registers");

        Self {
            hub,
            config,
            client,
            events,
        }
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Event callback that records every status it is given.
pub fn status_recorder() -> (EventCallback, Arc<Mutex<Vec<IotHubStatusCode>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: EventCallback = Arc::new(move |status, _| sink.lock().unwrap().push(status));
    (callback, seen)
}
