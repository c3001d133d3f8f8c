//! hublink device agent: keeps one device connected to its hub.
//!
//! Loads the TOML config, opens the transport, and pumps events and
//! cloud-to-device messages until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use hl_device_agent::config::AgentConfig;
use hl_device_agent::{DeviceClient, heartbeat, pump};
use hl_protocol::MessageResult;
use hl_transport::{ConnectionEvent, ConnectionStateCallback, MessageCallback};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "hl-device-agent starting"
    );

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/hublink/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(
        hostname = %config.transport.hostname,
        device_id = %config.transport.device_id,
        protocol = ?config.transport.protocol,
        "config loaded"
    );

    // ── Device client ───────────────────────────────────────────
    let client = DeviceClient::new(&config.transport)?;

    let on_state: ConnectionStateCallback = Arc::new(|event, _| match event {
        ConnectionEvent::ConnectionSuccess => tracing::info!(%event, "hub connection up"),
        ConnectionEvent::ConnectionDrop => tracing::warn!(%event, "hub connection down"),
    });
    client.register_connection_state_callback(on_state, None)?;

    let on_message: MessageCallback = Arc::new(|message, _| {
        tracing::info!(
            message_id = ?message.message_id(),
            bytes = message.body().len(),
            "cloud-to-device message"
        );
        MessageResult::Complete
    });
    client.set_message_callback(Some(on_message), None);

    client.open().await?;

    // ── Background tasks ────────────────────────────────────────
    let start_time = tokio::time::Instant::now();
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let receive_interval = Duration::from_millis(config.receive_interval_ms);

    tracing::info!("hl-device-agent ready");

    tokio::select! {
        () = pump::run(&client, poll_interval, receive_interval) => {
            tracing::error!("pump exited unexpectedly");
        }
        () = run_heartbeat(&client, config.heartbeat_interval_secs, start_time) => {
            tracing::error!("heartbeat loop exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    client.close().await?;
    tracing::info!("hl-device-agent stopped");
    Ok(())
}

async fn run_heartbeat(client: &DeviceClient, interval_secs: u64, start_time: tokio::time::Instant) {
    if interval_secs == 0 {
        tracing::info!("heartbeat disabled");
        std::future::pending::<()>().await;
    }
    heartbeat::run(client, Duration::from_secs(interval_secs), start_time).await;
}
