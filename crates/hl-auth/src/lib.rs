//! Device credential providers for hub connections.
//!
//! Two credential kinds are supported: shared-access-signature tokens
//! ([`SasTokenAuthenticationProvider`]) and X.509 client certificates
//! ([`X509AuthenticationProvider`]). Both cache the TLS context they derive
//! and rebuild it only after the trusted certificate changes.

pub mod error;
pub mod memo;
pub mod provider;
pub mod sas;
pub mod tls;
pub mod x509;

pub use error::{AuthError, AuthResult};
pub use provider::{AuthenticationProvider, AuthenticationType, CredentialProvider};
pub use sas::{SasToken, SasTokenAuthenticationProvider};
pub use tls::{ClientIdentity, TlsContext, TrustSettings, TrustSource};
pub use x509::{PemSource, X509AuthenticationProvider};
