//! E2E tests for device-to-cloud events:
//! `send_event_async` → pump send tick → HTTPS POST to the hub → completion callback.

mod helpers;

use std::sync::Arc;

use wiremock::matchers::{body_string, header, header_regex, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use helpers::{HubHarness, events_path, status_recorder};
use hl_device_agent::pump;
use hl_protocol::{IotHubStatusCode, Message};
use hl_transport::{CallbackContext, ConnectionEvent, ConnectionState, EventCallback, TransportError};

/// An event reaches the hub with SAS auth and routing headers, and its
/// callback reports success with the caller's context.
#[tokio::test]
async fn e2e_event_delivered_with_sas_auth() {
    let h = HubHarness::start().await;
    Mock::given(method("POST"))
        .and(path(events_path()))
        .and(query_param("api-version", "2016-02-03"))
        .and(header_regex(
            "authorization",
            r"^SharedAccessSignature sr=hub\.example\.net%2Fdevices%2Fsensor-001&sig=.+&se=\d+$",
        ))
        .and(header("iothub-to", events_path().as_str()))
        .and(header("content-type", "application/json"))
        .and(header("iothub-messageid", "reading-1"))
        .and(header("iothub-app-unit", "celsius"))
        .and(body_string(r#"{"temperature":21.5}"#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.hub)
        .await;

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: EventCallback = Arc::new(move |status, ctx| {
        let tag = ctx.and_then(|c| c.downcast_ref::<String>()).cloned();
        sink.lock().unwrap().push((status, tag));
    });
    let context: CallbackContext = Arc::new("batch-7".to_string());
    let message = Message::new(r#"{"temperature":21.5}"#)
        .with_message_id("reading-1")
        .with_content_type("application/json")
        .with_property("unit", "celsius")
        .unwrap();
    h.client
        .send_event_async(message, Some(callback), Some(context))
        .unwrap();

    pump::send_tick(h.client.transport()).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(IotHubStatusCode::OkEmpty, Some("batch-7".to_string()))]
    );
    assert!(h.client.transport().is_empty());
}

/// Events go out in the order they were queued.
#[tokio::test]
async fn e2e_events_sent_in_fifo_order() {
    let h = HubHarness::start().await;
    Mock::given(method("POST"))
        .and(path(events_path()))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&h.hub)
        .await;

    for body in ["first", "second", "third"] {
        h.client
            .send_event_async(Message::new(body), None, None)
            .unwrap();
    }
    pump::send_tick(h.client.transport()).await.unwrap();

    let bodies: Vec<String> = h
        .hub
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|r| String::from_utf8(r.body).unwrap())
        .collect();
    assert_eq!(bodies, ["first", "second", "third"]);
}

/// A throttled send completes the event with THROTTLED; nothing is retried.
#[tokio::test]
async fn e2e_throttled_event_reports_status() {
    let h = HubHarness::start().await;
    Mock::given(method("POST"))
        .and(path(events_path()))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&h.hub)
        .await;

    let (callback, seen) = status_recorder();
    h.client
        .send_event_async(Message::new("burst"), Some(callback), None)
        .unwrap();
    pump::send_tick(h.client.transport()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![IotHubStatusCode::Throttled]);
    assert!(h.client.transport().is_empty());
}

/// Empty events never reach the hub and complete with BAD_FORMAT.
#[tokio::test]
async fn e2e_empty_event_not_sent() {
    let h = HubHarness::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&h.hub)
        .await;

    let (callback, seen) = status_recorder();
    h.client
        .send_event_async(Message::new(Vec::<u8>::new()), Some(callback), None)
        .unwrap();
    pump::send_tick(h.client.transport()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![IotHubStatusCode::BadFormat]);
}

/// An unreachable hub is a retryable failure: the event stays queued, the
/// observer sees one drop, and closing cancels the event.
#[tokio::test]
async fn e2e_unreachable_hub_requeues_then_close_cancels() {
    let h = HubHarness::unreachable().await;

    let (callback, seen) = status_recorder();
    h.client
        .send_event_async(Message::new("offline reading"), Some(callback), None)
        .unwrap();

    let err = pump::send_tick(h.client.transport()).await.unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    assert!(seen.lock().unwrap().is_empty());
    assert!(!h.client.transport().is_empty());
    assert_eq!(h.events(), vec![ConnectionEvent::ConnectionDrop]);

    h.client.close().await.unwrap();
    assert_eq!(h.client.state(), ConnectionState::Closed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![IotHubStatusCode::MessageCancelledOnClose]
    );
    assert!(h.client.transport().is_empty());
}

/// Nothing can be queued once the client is closed.
#[tokio::test]
async fn e2e_send_after_close_is_illegal_state() {
    let h = HubHarness::start().await;
    h.client.close().await.unwrap();

    let result = h.client.send_event_async(Message::new("late"), None, None);
    assert!(matches!(result, Err(TransportError::IllegalState(_))));
}
