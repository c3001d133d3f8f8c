//! HTTPS hub connection.
//!
//! Request/response exchanges against the hub's REST surface:
//! - send: `POST /devices/{id}/messages/events`
//! - receive: `GET /devices/{id}/messages/devicebound` (etag becomes the message's lock token)
//! - complete: `DELETE .../devicebound/{lock token}`
//! - abandon: `POST .../devicebound/{lock token}/abandon`
//! - reject: `DELETE .../devicebound/{lock token}?reject=true`
//!
//! One exchange runs at a time per connection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};

use hl_auth::{AuthenticationProvider, CredentialProvider, TlsContext};
use hl_protocol::{IotHubStatusCode, Message, MessageResult, uri};

use crate::config::TransportConfig;
use crate::connection::{IotHubListener, ListenerSlot, TransportConnection};
use crate::error::{TransportError, TransportResult};
use crate::tls;

const HEADER_AUTHORIZATION: &str = "authorization";
const HEADER_IOTHUB_TO: &str = "iothub-to";
const HEADER_CONTENT_TYPE: &str = "content-type";
const HEADER_MESSAGE_LOCK_TIMEOUT: &str = "iothub-messagelocktimeout";
const HEADER_ETAG: &str = "etag";
const HEADER_IF_MATCH: &str = "if-match";
const HEADER_MESSAGE_ID: &str = "iothub-messageid";
const HEADER_CORRELATION_ID: &str = "iothub-correlationid";
const HEADER_EXPIRY: &str = "iothub-expiry";
const APP_PROPERTY_PREFIX: &str = "iothub-app-";

/// Content type sent when the message does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

#[derive(Default)]
struct Session {
    client: Option<(Arc<TlsContext>, reqwest::Client)>,
}

/// Hub connection over HTTPS.
pub struct HttpsConnection {
    base_url: String,
    device_id: String,
    read_timeout: Duration,
    message_lock_timeout_secs: u32,
    provider: Arc<AuthenticationProvider>,
    listener: ListenerSlot,
    session: tokio::sync::Mutex<Session>,
}

impl HttpsConnection {
    pub fn new(config: &TransportConfig, provider: Arc<AuthenticationProvider>) -> TransportResult<Self> {
        if config.hostname.trim().is_empty() || config.device_id.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "hostname and device id are required".into(),
            ));
        }
        Ok(Self {
            base_url: config.https_base(),
            device_id: config.device_id.clone(),
            read_timeout: config.read_timeout(),
            message_lock_timeout_secs: config.message_lock_timeout_secs,
            provider,
            listener: ListenerSlot::new(),
            session: tokio::sync::Mutex::new(Session::default()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// HTTP client for the provider's current TLS context; rebuilt only
    /// when the provider hands out a new context.
    fn client(&self, session: &mut Session) -> TransportResult<reqwest::Client> {
        let context = self.provider.ssl_context()?;
        if let Some((cached, client)) = &session.client {
            if Arc::ptr_eq(cached, &context) {
                return Ok(client.clone());
            }
        }
        let client = tls::http_client(&context, self.read_timeout)?;
        tracing::debug!("HTTPS client rebuilt for new TLS context");
        session.client = Some((context, client.clone()));
        Ok(client)
    }

    fn request(
        &self,
        session: &mut Session,
        method: Method,
        path: &str,
        extra_query: Option<&str>,
    ) -> TransportResult<RequestBuilder> {
        let client = self.client(session)?;
        let url = uri::https_url(&self.base_url, path, extra_query);
        let mut builder = client.request(method, url).header(HEADER_IOTHUB_TO, path);
        if let Some(token) = self.provider.token()? {
            builder = builder.header(HEADER_AUTHORIZATION, token);
        }
        Ok(builder)
    }

    /// Send a request. Network failures are reported to the listener as a
    /// lost connection before the error is returned.
    async fn execute(&self, builder: RequestBuilder) -> TransportResult<Response> {
        match builder.send().await {
            Ok(response) => Ok(response),
            Err(e) => {
                let error = if e.is_connect() {
                    TransportError::protocol(format!("hub unreachable: {e}"), true)
                } else if e.is_timeout() {
                    TransportError::protocol(format!("hub timed out: {e}"), true)
                } else {
                    TransportError::protocol(format!("request failed: {e}"), false)
                };
                tracing::warn!(error = %error, "HTTPS exchange failed");
                self.listener.connection_lost(Some(error.clone()));
                Err(error)
            }
        }
    }
}

#[async_trait]
impl TransportConnection for HttpsConnection {
    async fn open(&self) -> TransportResult<()> {
        let mut session = self.session.lock().await;
        self.client(&mut session)?;
        Ok(())
    }

    fn add_listener(&self, listener: Weak<dyn IotHubListener>) -> TransportResult<()> {
        self.listener.set(listener)
    }

    async fn close(&self) -> TransportResult<()> {
        let mut session = self.session.lock().await;
        *session = Session::default();
        Ok(())
    }

    async fn send_message(&self, message: &Arc<Message>) -> TransportResult<IotHubStatusCode> {
        let mut session = self.session.lock().await;
        let path = uri::events_path(&self.device_id);

        let content_type = message.content_type().unwrap_or(DEFAULT_CONTENT_TYPE);
        let builder = self
            .request(&mut session, Method::POST, &path, None)?
            .header(HEADER_CONTENT_TYPE, content_type)
            .headers(outbound_headers(message)?)
            .body(message.body().to_vec());

        let response = self.execute(builder).await?;
        let status = IotHubStatusCode::from_http(response.status().as_u16());
        tracing::debug!(message_id = ?message.message_id(), %status, "event sent");

        if status.is_success() {
            self.listener.message_sent(message, None);
        }
        Ok(status)
    }

    async fn receive_message(&self) -> TransportResult<Option<Message>> {
        let mut session = self.session.lock().await;
        let path = uri::devicebound_path(&self.device_id);

        let builder = self
            .request(&mut session, Method::GET, &path, None)?
            .header(
                HEADER_MESSAGE_LOCK_TIMEOUT,
                self.message_lock_timeout_secs.to_string(),
            );
        let response = self.execute(builder).await?;

        match IotHubStatusCode::from_http(response.status().as_u16()) {
            IotHubStatusCode::Ok => {
                let etag = response
                    .headers()
                    .get(HEADER_ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(sanitize_etag)
                    .ok_or_else(|| TransportError::protocol("received message has no etag", false))?;
                let headers = response.headers().clone();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::protocol(format!("failed to read body: {e}"), false))?;
                Ok(Some(inbound_message(&headers, body.to_vec()).with_lock_token(etag)))
            }
            IotHubStatusCode::OkEmpty => Ok(None),
            status => Err(TransportError::Service(status)),
        }
    }

    async fn send_message_result(
        &self,
        message: &Message,
        result: MessageResult,
    ) -> TransportResult<IotHubStatusCode> {
        let etag = message.lock_token().ok_or_else(|| {
            TransportError::IllegalState(
                "message result needs a message received from the hub".into(),
            )
        })?;
        let mut session = self.session.lock().await;

        let (method, path, query) = match result {
            MessageResult::Complete => (Method::DELETE, uri::complete_path(&self.device_id, etag), None),
            MessageResult::Abandon => (Method::POST, uri::abandon_path(&self.device_id, etag), None),
            MessageResult::Reject => (
                Method::DELETE,
                uri::complete_path(&self.device_id, etag),
                Some(uri::REJECT_QUERY),
            ),
        };

        let builder = self
            .request(&mut session, method, &path, query)?
            .header(HEADER_IF_MATCH, etag);
        let response = self.execute(builder).await?;

        let status = IotHubStatusCode::from_http(response.status().as_u16());
        if status != IotHubStatusCode::OkEmpty {
            tracing::warn!(%result, %status, lock_token = etag, "message result rejected");
            return Err(TransportError::Service(status));
        }
        tracing::debug!(%result, "message result sent");
        Ok(status)
    }
}

/// Strip the quotes the hub puts around etag values.
fn sanitize_etag(raw: &str) -> String {
    raw.replace('"', "")
}

fn outbound_headers(message: &Message) -> TransportResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut insert = |name: String, value: &str| -> TransportResult<()> {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidArgument(format!("bad header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidArgument(format!("bad header value: {e}")))?;
        headers.insert(name, value);
        Ok(())
    };

    if let Some(id) = message.message_id() {
        insert(HEADER_MESSAGE_ID.into(), id)?;
    }
    if let Some(id) = message.correlation_id() {
        insert(HEADER_CORRELATION_ID.into(), id)?;
    }
    if let Some(expiry) = message.expiry_time() {
        insert(HEADER_EXPIRY.into(), &expiry.to_rfc3339())?;
    }
    for property in message.properties() {
        insert(format!("{APP_PROPERTY_PREFIX}{}", property.name()), property.value())?;
    }
    Ok(headers)
}

fn inbound_message(headers: &HeaderMap, body: Vec<u8>) -> Message {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let mut message = Message::new(body);
    if let Some(id) = header(HEADER_MESSAGE_ID) {
        message = message.with_message_id(id);
    }
    if let Some(id) = header(HEADER_CORRELATION_ID) {
        message = message.with_correlation_id(id);
    }
    if let Some(content_type) = header(HEADER_CONTENT_TYPE) {
        message = message.with_content_type(content_type);
    }
    if let Some(expiry) = header(HEADER_EXPIRY).and_then(|v| DateTime::parse_from_rfc3339(v).ok()) {
        message = message.with_expiry_time(expiry.with_timezone(&Utc));
    }

    for (name, value) in headers {
        let Some(property) = name.as_str().strip_prefix(APP_PROPERTY_PREFIX) else {
            continue;
        };
        let Ok(value) = value.to_str() else {
            tracing::warn!(property, "skipping non-ASCII property value");
            continue;
        };
        match message.clone().with_property(property, value) {
            Ok(updated) => message = updated,
            Err(e) => tracing::warn!(error = %e, "skipping invalid inbound property"),
        }
    }
    message
}
