//! X.509 certificate credentials.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AuthError, AuthResult};
use crate::provider::CredentialProvider;
use crate::tls::{ClientIdentity, TlsContext, TlsState, TrustSettings, read_pem_file};

/// Where a PEM document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PemSource {
    Text(String),
    Path(PathBuf),
}

impl PemSource {
    fn new(value: &str, is_path: bool, what: &str) -> AuthResult<Self> {
        if value.trim().is_empty() {
            return Err(AuthError::InvalidArgument(format!("{what} cannot be empty")));
        }
        Ok(if is_path {
            Self::Path(PathBuf::from(value))
        } else {
            Self::Text(value.to_string())
        })
    }

    fn load(&self, what: &str) -> AuthResult<Vec<u8>> {
        match self {
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
            Self::Path(path) => read_pem_file(path, what),
        }
    }
}

/// Credential provider for devices authenticating with a client certificate.
///
/// Certificate and key are read (and, for paths, loaded from disk) each time
/// the TLS context is rebuilt.
pub struct X509AuthenticationProvider {
    certificate: PemSource,
    private_key: PemSource,
    tls: Mutex<TlsState>,
}

impl std::fmt::Debug for X509AuthenticationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let describe = |source: &PemSource| match source {
            PemSource::Text(_) => "<inline>".to_string(),
            PemSource::Path(path) => path.display().to_string(),
        };
        f.debug_struct("X509AuthenticationProvider")
            .field("certificate", &describe(&self.certificate))
            .field("private_key", &describe(&self.private_key))
            .finish()
    }
}

impl X509AuthenticationProvider {
    pub fn new(
        certificate: &str,
        certificate_is_path: bool,
        private_key: &str,
        private_key_is_path: bool,
    ) -> AuthResult<Self> {
        Ok(Self {
            certificate: PemSource::new(certificate, certificate_is_path, "public key certificate")?,
            private_key: PemSource::new(private_key, private_key_is_path, "private key")?,
            tls: Mutex::new(TlsState::default()),
        })
    }

    pub fn certificate(&self) -> &PemSource {
        &self.certificate
    }

    pub fn private_key(&self) -> &PemSource {
        &self.private_key
    }

    pub fn trust_settings(&self) -> TrustSettings {
        self.tls.lock().settings().clone()
    }

    pub fn ssl_context_needs_refresh(&self) -> bool {
        self.tls.lock().needs_refresh()
    }

    fn identity(&self) -> AuthResult<ClientIdentity> {
        let certificate = self.certificate.load("public key certificate")?;
        let private_key = self.private_key.load("private key")?;
        ClientIdentity::from_pem(certificate, private_key)
    }
}

impl CredentialProvider for X509AuthenticationProvider {
    fn ssl_context(&self) -> AuthResult<Arc<TlsContext>> {
        self.tls.lock().context(|| self.identity().map(Some))
    }

    fn set_trusted_certificate(&self, certificate: Option<String>) {
        self.tls.lock().set_certificate(certificate);
    }

    fn set_trusted_certificate_path(&self, path: Option<PathBuf>) {
        self.tls.lock().set_certificate_path(path);
    }
}
