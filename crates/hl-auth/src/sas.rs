//! Shared-access-signature (SAS) token credentials.
//!
//! Token format:
//! ```text
//! SharedAccessSignature sr={resource}&sig={signature}&se={expiry}
//! ```
//! where `resource` is `{hostname}/devices/{device_id}`, `expiry` is in Unix
//! seconds, and `signature` is the base64 HMAC-SHA256 of
//! `"{resource}\n{expiry}"` keyed by the base64-decoded device key. The
//! resource and signature are URL-encoded.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use url::form_urlencoded;

use hl_protocol::uri;

use crate::error::{AuthError, AuthResult};
use crate::provider::CredentialProvider;
use crate::tls::{TlsContext, TlsState, TrustSettings};

type HmacSha256 = Hmac<Sha256>;

/// How long a freshly generated token stays valid, in seconds.
pub const TOKEN_VALID_SECS: i64 = 3600;

const TOKEN_PREFIX: &str = "SharedAccessSignature ";

/// A rendered SAS token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    value: String,
    expiry: i64,
}

impl SasToken {
    /// Sign a token for `{hostname}/devices/{device_id}` expiring at `expiry`
    /// (Unix seconds).
    pub fn generate(
        hostname: &str,
        device_id: &str,
        device_key: &str,
        expiry: i64,
    ) -> AuthResult<Self> {
        let resource = uri::resource_uri(hostname, device_id);
        let signature = sign(&resource, expiry, device_key)?;

        let value = format!(
            "{TOKEN_PREFIX}sr={}&sig={}&se={expiry}",
            encode(&resource),
            encode(&signature)
        );
        Ok(Self { value, expiry })
    }

    /// Wrap a token supplied by the application. The expiry is read from the
    /// `se` field; a token without a readable expiry counts as expired.
    pub fn parse(text: impl Into<String>) -> Self {
        let value = text.into();
        let expiry = value
            .strip_prefix(TOKEN_PREFIX)
            .unwrap_or(&value)
            .split('&')
            .find_map(|field| field.strip_prefix("se="))
            .and_then(|se| se.trim().parse::<i64>().ok())
            .unwrap_or(0);
        Self { value, expiry }
    }

    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now().timestamp()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

fn sign(resource: &str, expiry: i64, device_key: &str) -> AuthResult<String> {
    let key = BASE64
        .decode(device_key)
        .map_err(|e| AuthError::Token(format!("device key is not valid base64: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| AuthError::Token(format!("unusable device key: {e}")))?;
    mac.update(format!("{resource}\n{expiry}").as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Credential provider for devices authenticating with SAS tokens.
///
/// With a device key the token is renewed lazily: each [`token`](Self::token)
/// call checks the cached token and signs a new one only if it has expired.
/// Without a key the supplied token is handed out as-is, even once expired.
pub struct SasTokenAuthenticationProvider {
    hostname: String,
    device_id: String,
    device_key: Option<String>,
    token: Mutex<SasToken>,
    tls: Mutex<TlsState>,
}

impl SasTokenAuthenticationProvider {
    /// Create a provider from a device key, a pre-supplied token, or both.
    pub fn new(
        hostname: impl Into<String>,
        device_id: impl Into<String>,
        device_key: Option<String>,
        sas_token: Option<String>,
    ) -> AuthResult<Self> {
        let hostname = hostname.into();
        let device_id = device_id.into();
        let device_key = device_key.filter(|k| !k.trim().is_empty());
        let sas_token = sas_token.filter(|t| !t.trim().is_empty());

        if hostname.trim().is_empty() {
            return Err(AuthError::InvalidArgument("hostname cannot be empty".into()));
        }
        if device_id.trim().is_empty() {
            return Err(AuthError::InvalidArgument("device id cannot be empty".into()));
        }

        let token = match (sas_token, &device_key) {
            (Some(text), _) => SasToken::parse(text),
            (None, Some(key)) => SasToken::generate(&hostname, &device_id, key, renewal_expiry())?,
            (None, None) => {
                return Err(AuthError::InvalidArgument(
                    "either a device key or a SAS token is required".into(),
                ));
            }
        };

        Ok(Self {
            hostname,
            device_id,
            device_key,
            token: Mutex::new(token),
            tls: Mutex::new(TlsState::default()),
        })
    }

    pub fn from_device_key(
        hostname: impl Into<String>,
        device_id: impl Into<String>,
        device_key: impl Into<String>,
    ) -> AuthResult<Self> {
        Self::new(hostname, device_id, Some(device_key.into()), None)
    }

    pub fn from_sas_token(
        hostname: impl Into<String>,
        device_id: impl Into<String>,
        sas_token: impl Into<String>,
    ) -> AuthResult<Self> {
        Self::new(hostname, device_id, None, Some(sas_token.into()))
    }

    /// Current token, renewed first if expired and a device key is available.
    pub fn token(&self) -> AuthResult<String> {
        let mut token = self.token.lock();
        if let Some(key) = &self.device_key {
            if token.is_expired() {
                *token = SasToken::generate(&self.hostname, &self.device_id, key, renewal_expiry())?;
                tracing::debug!(
                    device_id = %self.device_id,
                    expiry = token.expiry(),
                    "SAS token renewed"
                );
            }
        }
        Ok(token.to_string())
    }

    /// True when the token has expired and cannot be renewed locally.
    pub fn is_renewal_necessary(&self) -> bool {
        self.device_key.is_none() && self.token.lock().is_expired()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_key(&self) -> Option<&str> {
        self.device_key.as_deref()
    }

    /// Snapshot of the trusted-certificate settings.
    pub fn trust_settings(&self) -> TrustSettings {
        self.tls.lock().settings().clone()
    }

    /// Whether the next [`CredentialProvider::ssl_context`] call will rebuild.
    pub fn ssl_context_needs_refresh(&self) -> bool {
        self.tls.lock().needs_refresh()
    }
}

impl CredentialProvider for SasTokenAuthenticationProvider {
    fn ssl_context(&self) -> AuthResult<Arc<TlsContext>> {
        // Token devices never present a client certificate.
        self.tls.lock().context(|| Ok(None))
    }

    fn set_trusted_certificate(&self, certificate: Option<String>) {
        self.tls.lock().set_certificate(certificate);
    }

    fn set_trusted_certificate_path(&self, path: Option<PathBuf>) {
        self.tls.lock().set_certificate_path(path);
    }
}

fn renewal_expiry() -> i64 {
    Utc::now().timestamp() + TOKEN_VALID_SECS + 1
}
