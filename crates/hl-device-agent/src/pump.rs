//! Background loop that drives the transport.
//!
//! The transport only moves messages when asked: one tick sends waiting
//! events and fires their callbacks, a slower tick polls the hub for
//! cloud-to-device messages and hands them to the message callback.

use std::time::Duration;

use tokio::time;

use hl_transport::{TransportCore, TransportError, TransportResult};

use crate::client::DeviceClient;

/// Outcome of one receive tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStats {
    pub handled: usize,
}

/// Send everything waiting, then dispatch completed callbacks.
///
/// Callbacks still run when the send pass fails, so packets resolved
/// earlier in the pass are not held back.
pub async fn send_tick(transport: &TransportCore) -> TransportResult<()> {
    let sent = transport.send_messages().await;
    transport.invoke_callbacks()?;
    sent
}

/// Poll the hub once, then handle every received message.
pub async fn receive_tick(transport: &TransportCore) -> TransportResult<ReceiveStats> {
    transport.receive_messages().await?;
    let mut stats = ReceiveStats::default();
    while transport.handle_message().await? {
        stats.handled += 1;
    }
    Ok(stats)
}

/// Drive `client` until the task is cancelled.
pub async fn run(client: &DeviceClient, poll_interval: Duration, receive_interval: Duration) {
    let transport = client.transport();
    let mut send_ticker = time::interval(poll_interval);
    let mut receive_ticker = time::interval(receive_interval);
    send_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    receive_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = send_ticker.tick() => {
                if let Err(e) = send_tick(transport).await {
                    log_failure("send", &e);
                }
            }
            _ = receive_ticker.tick() => {
                match receive_tick(transport).await {
                    Ok(stats) if stats.handled > 0 => {
                        tracing::debug!(handled = stats.handled, "cloud-to-device messages handled");
                    }
                    Ok(_) => {}
                    Err(e) => log_failure("receive", &e),
                }
            }
        }
    }
}

fn log_failure(stage: &'static str, error: &TransportError) {
    match error {
        TransportError::IllegalState(_) => {
            tracing::debug!(stage, error = %error, "transport not open, skipping");
        }
        e if e.is_retryable() => {
            tracing::warn!(stage, error = %e, "transport exchange failed, will retry");
        }
        e => tracing::error!(stage, error = %e, "transport exchange failed"),
    }
}
