//! E2E tests for cloud-to-device messages:
//! HTTPS poll → received queue → message callback → result sent back with the etag.

mod helpers;

use std::sync::{Arc, Mutex};

use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use helpers::{HubHarness, devicebound_path};
use hl_device_agent::pump;
use hl_protocol::{Message, MessageResult};
use hl_transport::MessageCallback;

fn inbound(body: &str, etag: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("etag", format!("\"{etag}\"").as_str())
        .insert_header("iothub-messageid", "c2d-1")
        .insert_header("iothub-app-command", "reboot")
        .set_body_string(body)
}

fn handler_returning(result: MessageResult) -> (MessageCallback, Arc<Mutex<Vec<Message>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: MessageCallback = Arc::new(move |message, _| {
        sink.lock().unwrap().push(message.clone());
        result
    });
    (handler, seen)
}

/// A polled message reaches the handler and is completed with its etag.
#[tokio::test]
async fn e2e_message_received_and_completed() {
    let h = HubHarness::start().await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .and(header("iothub-messagelocktimeout", "60"))
        .respond_with(inbound("reboot at 03:00", "lock-1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.hub)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/lock-1", devicebound_path())))
        .and(header("if-match", "lock-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.hub)
        .await;

    let (handler, seen) = handler_returning(MessageResult::Complete);
    h.client.set_message_callback(Some(handler), None);

    let stats = pump::receive_tick(h.client.transport()).await.unwrap();
    assert_eq!(stats.handled, 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].body(), b"reboot at 03:00");
    assert_eq!(seen[0].message_id(), Some("c2d-1"));
    assert_eq!(seen[0].property("command"), Some("reboot"));
    assert!(h.client.transport().is_empty());
}

/// Rejecting uses DELETE with `reject=true`; abandoning POSTs to `/abandon`.
#[tokio::test]
async fn e2e_reject_and_abandon_results() {
    let h = HubHarness::start().await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .respond_with(inbound("bad command", "lock-2"))
        .mount(&h.hub)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/lock-2", devicebound_path())))
        .and(query_param("reject", "true"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.hub)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/lock-2/abandon", devicebound_path())))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.hub)
        .await;

    let (handler, _) = handler_returning(MessageResult::Reject);
    h.client.set_message_callback(Some(handler), None);
    assert_eq!(pump::receive_tick(h.client.transport()).await.unwrap().handled, 1);

    let (handler, _) = handler_returning(MessageResult::Abandon);
    h.client.set_message_callback(Some(handler), None);
    assert_eq!(pump::receive_tick(h.client.transport()).await.unwrap().handled, 1);
}

/// An empty devicebound queue (204) hands nothing to the handler.
#[tokio::test]
async fn e2e_empty_poll_handles_nothing() {
    let h = HubHarness::start().await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.hub)
        .await;

    let (handler, seen) = handler_returning(MessageResult::Complete);
    h.client.set_message_callback(Some(handler), None);

    let stats = pump::receive_tick(h.client.transport()).await.unwrap();
    assert_eq!(stats.handled, 0);
    assert!(seen.lock().unwrap().is_empty());
}

/// Without a handler, received messages wait in the queue until one is set.
#[tokio::test]
async fn e2e_message_waits_for_handler() {
    let h = HubHarness::start().await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .respond_with(inbound("hold", "lock-3"))
        .up_to_n_times(1)
        .mount(&h.hub)
        .await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .respond_with(ResponseTemplate::new(204))
        .mount(&h.hub)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/lock-3", devicebound_path())))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.hub)
        .await;

    assert_eq!(pump::receive_tick(h.client.transport()).await.unwrap().handled, 0);
    assert!(!h.client.transport().is_empty());

    let (handler, seen) = handler_returning(MessageResult::Complete);
    h.client.set_message_callback(Some(handler), None);
    assert_eq!(pump::receive_tick(h.client.transport()).await.unwrap().handled, 1);
    assert_eq!(seen.lock().unwrap()[0].body(), b"hold");
}

/// The full pump loop sends and receives without explicit ticks.
#[tokio::test]
async fn e2e_pump_run_moves_both_directions() {
    let h = HubHarness::start().await;
    Mock::given(method("POST"))
        .and(path(helpers::events_path()))
        .respond_with(ResponseTemplate::new(204))
        .mount(&h.hub)
        .await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .respond_with(inbound("ping", "lock-4"))
        .up_to_n_times(1)
        .mount(&h.hub)
        .await;
    Mock::given(method("GET"))
        .and(path(devicebound_path()))
        .respond_with(ResponseTemplate::new(204))
        .mount(&h.hub)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&h.hub)
        .await;

    let (handler, seen) = handler_returning(MessageResult::Complete);
    h.client.set_message_callback(Some(handler), None);
    h.client
        .send_event_async(Message::new("pong"), None, None)
        .unwrap();

    let poll = std::time::Duration::from_millis(h.config.poll_interval_ms);
    let receive = std::time::Duration::from_millis(h.config.receive_interval_ms);
    let _ = tokio::time::timeout(
        std::time::Duration::from_millis(500),
        pump::run(&h.client, poll, receive),
    )
    .await;

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(h.client.transport().is_empty());
}
