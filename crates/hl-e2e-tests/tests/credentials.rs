//! E2E tests for credential handling across the config, auth, and
//! transport layers.

mod helpers;

use std::sync::Arc;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use helpers::{DEVICE_ID, HOSTNAME, agent_config, events_path, status_recorder};
use hl_auth::{AuthenticationType, CredentialProvider, TrustSource};
use hl_device_agent::{DeviceClient, pump};
use hl_protocol::{IotHubStatusCode, Message};
use hl_transport::{AuthConfig, Protocol, TransportConfig, TransportCore, TransportError};

const EXPIRED_TOKEN: &str =
    "SharedAccessSignature sr=hub.example.net%2Fdevices%2Fsensor-001&sig=fixed&se=1";

fn self_signed(name: &str) -> (String, String) {
    let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    (certified.cert.pem(), certified.key_pair.serialize_pem())
}

/// A caller-supplied token is sent unchanged, even once it has expired,
/// since there is no key to renew it with.
#[tokio::test]
async fn e2e_supplied_token_sent_unchanged() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(events_path()))
        .and(header("authorization", EXPIRED_TOKEN))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&hub)
        .await;

    let mut config = TransportConfig::new(
        HOSTNAME,
        DEVICE_ID,
        Protocol::Https,
        AuthConfig::SasToken {
            device_key: None,
            sas_token: Some(EXPIRED_TOKEN.into()),
        },
    );
    config.endpoint = Some(hub.uri());

    let client = DeviceClient::new(&config).unwrap();
    client.open().await.unwrap();
    let (callback, seen) = status_recorder();
    client
        .send_event_async(Message::new("x"), Some(callback), None)
        .unwrap();
    pump::send_tick(client.transport()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![IotHubStatusCode::OkEmpty]);
}

/// The connection string form builds the same SAS-authenticated client.
#[tokio::test]
async fn e2e_connection_string_client() {
    let client = DeviceClient::from_connection_string(
        "HostName=hub.example.net;DeviceId=sensor-001;SharedAccessKey=ZGV2aWNlLXNlY3JldC1rZXk=",
        Protocol::Https,
    )
    .unwrap();
    assert_eq!(client.device_id(), DEVICE_ID);

    let config = agent_config("http://127.0.0.1:1");
    let provider = config.transport.authentication_provider().unwrap();
    assert_eq!(provider.authentication_type(), AuthenticationType::SasToken);
    let token = provider.token().unwrap().unwrap();
    assert!(token.starts_with("SharedAccessSignature sr=hub.example.net%2Fdevices%2Fsensor-001"));
}

/// X.509 devices loaded from PEM files send without an authorization
/// header; identity comes from the TLS layer.
#[tokio::test]
async fn e2e_x509_device_from_pem_files() {
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = self_signed(DEVICE_ID);
    let cert_path = dir.path().join("device.pem");
    let key_path = dir.path().join("device.key");
    std::fs::write(&cert_path, cert).unwrap();
    std::fs::write(&key_path, key).unwrap();

    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(events_path()))
        .and(|request: &Request| !request.headers.contains_key("authorization"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&hub)
        .await;

    let mut config = TransportConfig::new(
        HOSTNAME,
        DEVICE_ID,
        Protocol::Https,
        AuthConfig::X509 {
            certificate: cert_path.to_string_lossy().into_owned(),
            certificate_is_path: true,
            private_key: key_path.to_string_lossy().into_owned(),
            private_key_is_path: true,
        },
    );
    config.endpoint = Some(hub.uri());

    let provider = config.authentication_provider().unwrap();
    assert_eq!(provider.authentication_type(), AuthenticationType::X509Certificate);
    assert!(provider.ssl_context().unwrap().client_identity().is_some());

    let client = DeviceClient::new(&config).unwrap();
    client.open().await.unwrap();
    let (callback, seen) = status_recorder();
    client
        .send_event_async(Message::new("x509 reading"), Some(callback), None)
        .unwrap();
    pump::send_tick(client.transport()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![IotHubStatusCode::OkEmpty]);
}

/// Unreadable certificate material fails when the transport is built,
/// not on the first send.
#[test]
fn e2e_bad_certificate_fails_fast() {
    let config = TransportConfig::new(
        HOSTNAME,
        DEVICE_ID,
        Protocol::Https,
        AuthConfig::X509 {
            certificate: "/nonexistent/device.pem".into(),
            certificate_is_path: true,
            private_key: "/nonexistent/device.key".into(),
            private_key_is_path: true,
        },
    );
    assert!(matches!(
        TransportCore::from_config(&config),
        Err(TransportError::Auth(_))
    ));
}

/// A configured trusted certificate replaces the default roots.
#[test]
fn e2e_trusted_certificate_from_config() {
    let (ca, _) = self_signed(HOSTNAME);
    let mut config = agent_config("http://127.0.0.1:1").transport;
    config.trusted_certificate = Some(ca);

    let provider = config.authentication_provider().unwrap();
    let context = provider.ssl_context().unwrap();
    assert_eq!(context.trust_source(), TrustSource::Certificate);
    assert_eq!(context.root_count(), 1);
    assert!(Arc::ptr_eq(&context, &provider.ssl_context().unwrap()));
}

/// AMQPS is accepted in config but has no transport.
#[test]
fn e2e_amqps_is_unsupported() {
    let config = TransportConfig::new(
        HOSTNAME,
        DEVICE_ID,
        Protocol::Amqps,
        AuthConfig::SasToken {
            device_key: Some(helpers::DEVICE_KEY.into()),
            sas_token: None,
        },
    );
    assert!(matches!(
        DeviceClient::new(&config),
        Err(TransportError::UnsupportedProtocol(_))
    ));
}
