//! Turn a provider's [`TlsContext`] into protocol client configuration.

use std::time::Duration;

use hl_auth::TlsContext;
use rumqttc::{TlsConfiguration, Transport};

use crate::error::{TransportError, TransportResult};

/// TLS transport for the MQTT client.
///
/// Explicit trust anchors use `TlsConfiguration::Simple`; the platform
/// defaults are only available without a client certificate.
pub fn mqtt_transport(context: &TlsContext) -> TransportResult<Transport> {
    let client_auth = context
        .client_identity()
        .map(|id| (id.certificate_pem().to_vec(), id.private_key_pem().to_vec()));

    match (context.trusted_roots_pem(), client_auth) {
        (Some(ca), client_auth) => Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca: ca.to_vec(),
            alpn: None,
            client_auth,
        })),
        (None, None) => Ok(Transport::tls_with_default_config()),
        (None, Some(_)) => Err(TransportError::InvalidArgument(
            "X.509 authentication over MQTT requires a trusted certificate".into(),
        )),
    }
}

/// HTTP client honoring the context's trust anchors and client identity.
pub fn http_client(context: &TlsContext, timeout: Duration) -> TransportResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);

    if let Some(pem) = context.trusted_roots_pem() {
        let roots = reqwest::Certificate::from_pem_bundle(pem)
            .map_err(|e| TransportError::Other(format!("invalid trusted certificate: {e}")))?;
        builder = builder.tls_built_in_root_certs(false);
        for root in roots {
            builder = builder.add_root_certificate(root);
        }
    }

    if let Some(identity) = context.client_identity() {
        let mut pem = identity.certificate_pem().to_vec();
        pem.push(b'\n');
        pem.extend_from_slice(identity.private_key_pem());
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| TransportError::Other(format!("invalid client identity: {e}")))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_auth::{ClientIdentity, TrustSettings};

    fn self_signed(name: &str) -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn http_client_with_default_roots() {
        let context = TlsContext::build(&TrustSettings::default(), None).unwrap();
        assert!(http_client(&context, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn mqtt_token_auth_with_explicit_roots() {
        let (ca, _) = self_signed("hub.example.net");
        let mut settings = TrustSettings::default();
        settings.set_certificate(Some(ca.clone()));
        let context = TlsContext::build(&settings, None).unwrap();
        match mqtt_transport(&context) {
            Ok(Transport::Tls(TlsConfiguration::Simple { ca: roots, client_auth, .. })) => {
                assert_eq!(roots, ca.into_bytes());
                assert!(client_auth.is_none());
            }
            _ => panic!("expected a simple TLS transport"),
        }
    }

    #[test]
    fn mqtt_x509_needs_explicit_roots() {
        let (cert, key) = self_signed("device-1");
        let identity = ClientIdentity::from_pem(cert, key).unwrap();
        let context = TlsContext::build(&TrustSettings::default(), Some(identity.clone())).unwrap();
        assert!(matches!(
            mqtt_transport(&context),
            Err(TransportError::InvalidArgument(_))
        ));

        let (ca, _) = self_signed("hub.example.net");
        let mut settings = TrustSettings::default();
        settings.set_certificate(Some(ca));
        let context = TlsContext::build(&settings, Some(identity)).unwrap();
        assert!(matches!(
            mqtt_transport(&context),
            Ok(Transport::Tls(TlsConfiguration::Simple { client_auth: Some(_), .. }))
        ));
    }

    #[test]
    fn http_client_with_custom_roots_and_identity() {
        let (ca, _) = self_signed("hub.example.net");
        let (cert, key) = self_signed("device-1");
        let mut settings = TrustSettings::default();
        settings.set_certificate(Some(ca));
        let context =
            TlsContext::build(&settings, Some(ClientIdentity::from_pem(cert, key).unwrap())).unwrap();
        assert!(http_client(&context, Duration::from_secs(5)).is_ok());
    }
}
