//! TLS material for hub connections.
//!
//! A [`TlsContext`] is the validated, protocol-neutral form of a device's TLS
//! configuration: which trust anchor to use (an explicit PEM bundle or the
//! platform defaults) and, for X.509 devices, the client certificate/key pair.
//! Transports turn it into their own client configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{AuthError, AuthResult};
use crate::memo::Memo;

/// Which trust anchor a context was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSource {
    /// Built-in platform roots.
    Default,
    /// Certificate text supplied by the application.
    Certificate,
    /// Certificate file supplied by the application.
    CertificatePath,
}

/// The application's trusted-certificate overrides.
///
/// Priority when both are set: certificate text, then path, then defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustSettings {
    certificate: Option<String>,
    certificate_path: Option<PathBuf>,
}

impl TrustSettings {
    /// Store the certificate text; returns whether the value changed.
    pub fn set_certificate(&mut self, certificate: Option<String>) -> bool {
        let changed = self.certificate != certificate;
        self.certificate = certificate;
        changed
    }

    /// Store the certificate path; returns whether the value changed.
    pub fn set_certificate_path(&mut self, path: Option<PathBuf>) -> bool {
        let changed = self.certificate_path != path;
        self.certificate_path = path;
        changed
    }

    pub fn certificate(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    pub fn certificate_path(&self) -> Option<&Path> {
        self.certificate_path.as_deref()
    }

    pub fn source(&self) -> TrustSource {
        if self.certificate.is_some() {
            TrustSource::Certificate
        } else if self.certificate_path.is_some() {
            TrustSource::CertificatePath
        } else {
            TrustSource::Default
        }
    }

    fn load_roots(&self) -> AuthResult<Option<Vec<u8>>> {
        match (&self.certificate, &self.certificate_path) {
            (Some(text), _) => Ok(Some(text.as_bytes().to_vec())),
            (None, Some(path)) => read_pem_file(path, "trusted certificate").map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// A device certificate and its private key, both PEM encoded.
#[derive(Clone)]
pub struct ClientIdentity {
    certificate_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
}

impl ClientIdentity {
    /// Validate and wrap a PEM certificate chain and private key.
    pub fn from_pem(
        certificate_pem: impl Into<Vec<u8>>,
        private_key_pem: impl Into<Vec<u8>>,
    ) -> AuthResult<Self> {
        let certificate_pem = certificate_pem.into();
        let private_key_pem = private_key_pem.into();

        parse_certificates(&certificate_pem, "client certificate")?;
        PrivateKeyDer::from_pem_slice(&private_key_pem)
            .map_err(|e| AuthError::Io(format!("invalid private key: {e:?}")))?;

        Ok(Self {
            certificate_pem,
            private_key_pem,
        })
    }

    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("certificate_pem", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Validated TLS material for one connection attempt.
#[derive(Debug, Clone)]
pub struct TlsContext {
    source: TrustSource,
    trusted_roots_pem: Option<Vec<u8>>,
    root_count: usize,
    identity: Option<ClientIdentity>,
}

impl TlsContext {
    /// Build a context from the current trust settings and an optional
    /// client identity.
    pub fn build(settings: &TrustSettings, identity: Option<ClientIdentity>) -> AuthResult<Self> {
        let trusted_roots_pem = settings.load_roots()?;

        let root_count = match &trusted_roots_pem {
            Some(pem) => {
                let mut store = RootCertStore::empty();
                for cert in parse_certificates(pem, "trusted certificate")? {
                    store
                        .add(cert)
                        .map_err(|e| AuthError::Io(format!("unusable trusted certificate: {e}")))?;
                }
                store.len()
            }
            None => 0,
        };

        Ok(Self {
            source: settings.source(),
            trusted_roots_pem,
            root_count,
            identity,
        })
    }

    pub fn trust_source(&self) -> TrustSource {
        self.source
    }

    /// PEM bundle of explicit trust anchors; `None` means platform defaults.
    pub fn trusted_roots_pem(&self) -> Option<&[u8]> {
        self.trusted_roots_pem.as_deref()
    }

    /// Number of explicit trust anchors (zero for platform defaults).
    pub fn root_count(&self) -> usize {
        self.root_count
    }

    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.identity.as_ref()
    }
}

/// Trust settings plus the context derived from them, kept under one lock by
/// the owning provider.
#[derive(Debug, Default)]
pub(crate) struct TlsState {
    settings: TrustSettings,
    context: Memo<TlsContext>,
}

impl TlsState {
    pub(crate) fn set_certificate(&mut self, certificate: Option<String>) {
        if self.settings.set_certificate(certificate) {
            tracing::debug!("trusted certificate changed, TLS context marked stale");
            self.context.invalidate();
        }
    }

    pub(crate) fn set_certificate_path(&mut self, path: Option<PathBuf>) {
        if self.settings.set_certificate_path(path) {
            tracing::debug!("trusted certificate path changed, TLS context marked stale");
            self.context.invalidate();
        }
    }

    pub(crate) fn settings(&self) -> &TrustSettings {
        &self.settings
    }

    pub(crate) fn needs_refresh(&self) -> bool {
        self.context.needs_refresh()
    }

    /// Return the cached context, rebuilding it if absent or stale.
    pub(crate) fn context(
        &mut self,
        identity: impl FnOnce() -> AuthResult<Option<ClientIdentity>>,
    ) -> AuthResult<Arc<TlsContext>> {
        let settings = &self.settings;
        self.context.get_or_try_init(|| {
            let context = TlsContext::build(settings, identity()?)?;
            tracing::info!(
                trust_source = ?context.trust_source(),
                client_identity = context.client_identity().is_some(),
                "TLS context generated"
            );
            Ok(context)
        })
    }
}

pub(crate) fn read_pem_file(path: &Path, what: &str) -> AuthResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| AuthError::Io(format!("failed to read {what} '{}': {e}", path.display())))
}

fn parse_certificates(pem: &[u8], what: &str) -> AuthResult<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AuthError::Io(format!("invalid {what}: {e:?}")))?;
    if certs.is_empty() {
        return Err(AuthError::Io(format!("no certificate found in {what}")));
    }
    Ok(certs)
}
