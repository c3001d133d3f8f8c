use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use hl_auth::{
    AuthenticationProvider, CredentialProvider, SasTokenAuthenticationProvider,
    X509AuthenticationProvider,
};
use hl_protocol::uri;

use crate::error::{TransportError, TransportResult};

/// Wire protocol used to reach the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Https,
    Mqtt,
    Amqps,
}

/// Device credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Shared access key (renewable tokens) and/or a pre-signed token.
    SasToken {
        #[serde(default)]
        device_key: Option<String>,
        #[serde(default)]
        sas_token: Option<String>,
    },
    /// Client certificate and key, each PEM text or a file path.
    X509 {
        certificate: String,
        #[serde(default)]
        certificate_is_path: bool,
        private_key: String,
        #[serde(default)]
        private_key_is_path: bool,
    },
}

/// Hub connection configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Hub hostname, e.g. `my-hub.azure-devices.net`.
    pub hostname: String,
    pub device_id: String,
    #[serde(default)]
    pub protocol: Protocol,
    /// Per-request read timeout.
    #[serde(default = "default_read_timeout_millis")]
    pub read_timeout_millis: u64,
    /// How long the hub locks a received message awaiting its result.
    #[serde(default = "default_message_lock_timeout_secs")]
    pub message_lock_timeout_secs: u32,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    pub auth: AuthConfig,
    /// Trusted root certificate (PEM text); wins over the path.
    #[serde(default)]
    pub trusted_certificate: Option<String>,
    #[serde(default)]
    pub trusted_certificate_path: Option<PathBuf>,
    /// HTTPS base URL override. Defaults to `https://{hostname}`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_read_timeout_millis() -> u64 {
    240_000
}

fn default_message_lock_timeout_secs() -> u32 {
    180
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_keepalive_secs() -> u64 {
    230
}

impl TransportConfig {
    /// Configuration with defaults for everything but identity and credentials.
    pub fn new(
        hostname: impl Into<String>,
        device_id: impl Into<String>,
        protocol: Protocol,
        auth: AuthConfig,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            device_id: device_id.into(),
            protocol,
            read_timeout_millis: default_read_timeout_millis(),
            message_lock_timeout_secs: default_message_lock_timeout_secs(),
            mqtt_port: default_mqtt_port(),
            keepalive_secs: default_keepalive_secs(),
            auth,
            trusted_certificate: None,
            trusted_certificate_path: None,
            endpoint: None,
        }
    }

    /// Build a token-authenticated configuration from a device connection
    /// string (`HostName=...;DeviceId=...;SharedAccessKey=...`).
    pub fn from_connection_string(connection_string: &str, protocol: Protocol) -> TransportResult<Self> {
        let parsed = ConnectionString::parse(connection_string)?;
        if parsed.x509 {
            return Err(TransportError::InvalidArgument(
                "connection string selects x509; use from_x509_connection_string".into(),
            ));
        }
        let auth = AuthConfig::SasToken {
            device_key: parsed.shared_access_key,
            sas_token: parsed.shared_access_signature,
        };
        Ok(Self::new(parsed.hostname, parsed.device_id, protocol, auth))
    }

    /// Build a certificate-authenticated configuration from a connection
    /// string ending in `x509=true`.
    pub fn from_x509_connection_string(
        connection_string: &str,
        protocol: Protocol,
        certificate: impl Into<String>,
        certificate_is_path: bool,
        private_key: impl Into<String>,
        private_key_is_path: bool,
    ) -> TransportResult<Self> {
        let parsed = ConnectionString::parse(connection_string)?;
        if !parsed.x509 {
            return Err(TransportError::InvalidArgument(
                "connection string does not select x509".into(),
            ));
        }
        let auth = AuthConfig::X509 {
            certificate: certificate.into(),
            certificate_is_path,
            private_key: private_key.into(),
            private_key_is_path,
        };
        Ok(Self::new(parsed.hostname, parsed.device_id, protocol, auth))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_millis)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Base URL for HTTPS requests.
    pub fn https_base(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| uri::https_base(&self.hostname))
    }

    /// Build the credential provider this configuration describes, with the
    /// trusted-certificate overrides applied.
    pub fn authentication_provider(&self) -> TransportResult<AuthenticationProvider> {
        let provider: AuthenticationProvider = match &self.auth {
            AuthConfig::SasToken {
                device_key,
                sas_token,
            } => SasTokenAuthenticationProvider::new(
                &self.hostname,
                &self.device_id,
                device_key.clone(),
                sas_token.clone(),
            )?
            .into(),
            AuthConfig::X509 {
                certificate,
                certificate_is_path,
                private_key,
                private_key_is_path,
            } => X509AuthenticationProvider::new(
                certificate,
                *certificate_is_path,
                private_key,
                *private_key_is_path,
            )?
            .into(),
        };

        provider.set_trusted_certificate(self.trusted_certificate.clone());
        provider.set_trusted_certificate_path(self.trusted_certificate_path.clone());
        Ok(provider)
    }
}

// ── Connection strings ────────────────────────────────────────

/// Fields of a device connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub hostname: String,
    pub device_id: String,
    pub shared_access_key: Option<String>,
    pub shared_access_signature: Option<String>,
    pub x509: bool,
}

impl ConnectionString {
    pub fn parse(text: &str) -> TransportResult<Self> {
        let mut hostname = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut shared_access_signature = None;
        let mut x509 = false;

        for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                TransportError::InvalidArgument(format!("malformed connection string segment '{part}'"))
            })?;
            match key {
                "HostName" => hostname = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                "SharedAccessSignature" => shared_access_signature = Some(value.to_string()),
                "x509" => x509 = value.eq_ignore_ascii_case("true"),
                _ => tracing::debug!(key, "ignoring unknown connection string field"),
            }
        }

        let hostname = hostname
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidArgument("connection string has no HostName".into()))?;
        let device_id = device_id
            .filter(|d| !d.is_empty())
            .ok_or_else(|| TransportError::InvalidArgument("connection string has no DeviceId".into()))?;

        let credentials = [shared_access_key.is_some(), shared_access_signature.is_some(), x509]
            .iter()
            .filter(|set| **set)
            .count();
        if credentials != 1 {
            return Err(TransportError::InvalidArgument(
                "connection string needs exactly one of SharedAccessKey, SharedAccessSignature, x509=true"
                    .into(),
            ));
        }

        Ok(Self {
            hostname,
            device_id,
            shared_access_key,
            shared_access_signature,
            x509,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_auth::AuthenticationType;

    #[test]
    fn toml_defaults() {
        let config: TransportConfig = toml::from_str(
            r#"
            hostname = "hub.example.net"
            device_id = "dev-1"

            [auth]
            type = "sas_token"
            device_key = "a2V5"
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::Https);
        assert_eq!(config.read_timeout_millis, 240_000);
        assert_eq!(config.message_lock_timeout_secs, 180);
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.https_base(), "https://hub.example.net");
        assert!(matches!(
            config.auth,
            AuthConfig::SasToken { device_key: Some(_), sas_token: None }
        ));
    }

    #[test]
    fn toml_x509() {
        let config: TransportConfig = toml::from_str(
            r#"
            hostname = "hub.example.net"
            device_id = "dev-1"
            protocol = "mqtt"
            trusted_certificate_path = "/etc/hub/ca.pem"

            [auth]
            type = "x509"
            certificate = "/etc/hub/device.pem"
            certificate_is_path = true
            private_key = "/etc/hub/device.key"
            private_key_is_path = true
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::Mqtt);
        assert_eq!(
            config.trusted_certificate_path.as_deref(),
            Some(std::path::Path::new("/etc/hub/ca.pem"))
        );
        assert!(matches!(
            config.auth,
            AuthConfig::X509 { certificate_is_path: true, private_key_is_path: true, .. }
        ));
    }

    #[test]
    fn parse_key_connection_string() {
        let config = TransportConfig::from_connection_string(
            "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=a2V5",
            Protocol::Https,
        )
        .unwrap();
        assert_eq!(config.hostname, "hub.example.net");
        assert_eq!(config.device_id, "dev-1");

        let provider = config.authentication_provider().unwrap();
        assert_eq!(provider.authentication_type(), AuthenticationType::SasToken);
    }

    #[test]
    fn signature_value_keeps_equals_signs() {
        let parsed = ConnectionString::parse(
            "HostName=h;DeviceId=d;SharedAccessSignature=SharedAccessSignature sr=h&sig=abc%3D&se=1",
        )
        .unwrap();
        assert_eq!(
            parsed.shared_access_signature.as_deref(),
            Some("SharedAccessSignature sr=h&sig=abc%3D&se=1")
        );
    }

    #[test]
    fn connection_string_requires_one_credential() {
        assert!(ConnectionString::parse("HostName=h;DeviceId=d").is_err());
        assert!(ConnectionString::parse("HostName=h;DeviceId=d;SharedAccessKey=k;x509=true").is_err());
        assert!(ConnectionString::parse("DeviceId=d;SharedAccessKey=k").is_err());
        assert!(ConnectionString::parse("HostName=h;DeviceId=d;garbage").is_err());
    }

    #[test]
    fn x509_connection_string_needs_material_call() {
        let cs = "HostName=h;DeviceId=d;x509=true";
        assert!(TransportConfig::from_connection_string(cs, Protocol::Mqtt).is_err());
        let config =
            TransportConfig::from_x509_connection_string(cs, Protocol::Mqtt, "cert", false, "key", false)
                .unwrap();
        assert!(matches!(config.auth, AuthConfig::X509 { .. }));
    }

    #[test]
    fn missing_credentials_surface_as_auth_error() {
        let config = TransportConfig::new(
            "h",
            "d",
            Protocol::Https,
            AuthConfig::SasToken {
                device_key: None,
                sas_token: None,
            },
        );
        assert!(matches!(
            config.authentication_provider(),
            Err(TransportError::Auth(_))
        ));
    }
}
