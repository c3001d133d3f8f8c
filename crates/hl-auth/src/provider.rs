//! The credential seam used by transports.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AuthResult;
use crate::sas::SasTokenAuthenticationProvider;
use crate::tls::TlsContext;
use crate::x509::X509AuthenticationProvider;

/// How a device proves its identity to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    SasToken,
    X509Certificate,
}

/// Anything that can hand out a (cached) TLS context and accept
/// trusted-certificate overrides.
///
/// Setting a different trust anchor marks the cached context stale; the next
/// `ssl_context` call rebuilds it. Setting the same value again does not.
pub trait CredentialProvider: Send + Sync {
    fn ssl_context(&self) -> AuthResult<Arc<TlsContext>>;

    fn set_trusted_certificate(&self, certificate: Option<String>);

    fn set_trusted_certificate_path(&self, path: Option<PathBuf>);
}

/// The device's configured credentials.
pub enum AuthenticationProvider {
    SasToken(SasTokenAuthenticationProvider),
    X509(X509AuthenticationProvider),
}

impl AuthenticationProvider {
    pub fn authentication_type(&self) -> AuthenticationType {
        match self {
            Self::SasToken(_) => AuthenticationType::SasToken,
            Self::X509(_) => AuthenticationType::X509Certificate,
        }
    }

    /// Current SAS token (renewed if needed), or `None` for X.509 devices.
    pub fn token(&self) -> AuthResult<Option<String>> {
        match self {
            Self::SasToken(p) => p.token().map(Some),
            Self::X509(_) => Ok(None),
        }
    }

    fn inner(&self) -> &dyn CredentialProvider {
        match self {
            Self::SasToken(p) => p,
            Self::X509(p) => p,
        }
    }
}

impl CredentialProvider for AuthenticationProvider {
    fn ssl_context(&self) -> AuthResult<Arc<TlsContext>> {
        self.inner().ssl_context()
    }

    fn set_trusted_certificate(&self, certificate: Option<String>) {
        self.inner().set_trusted_certificate(certificate);
    }

    fn set_trusted_certificate_path(&self, path: Option<PathBuf>) {
        self.inner().set_trusted_certificate_path(path);
    }
}

impl From<SasTokenAuthenticationProvider> for AuthenticationProvider {
    fn from(p: SasTokenAuthenticationProvider) -> Self {
        Self::SasToken(p)
    }
}

impl From<X509AuthenticationProvider> for AuthenticationProvider {
    fn from(p: X509AuthenticationProvider) -> Self {
        Self::X509(p)
    }
}
