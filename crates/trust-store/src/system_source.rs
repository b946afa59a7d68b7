use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::TrustAnchor;
use rustls::{CertificateError, RootCertStore};
use tracing::{debug, warn};

use crate::TrustRequest;

/// Read-only system trust anchors.
///
/// "System" means the Mozilla root program compiled in through
/// `webpki-roots`, not the operating system's certificate store. Anchors
/// added to the OS store are not seen here; import them into the
/// persistent store instead.
///
/// When no anchors are available the source is `Missing` for its whole
/// lifetime and rejects every chain exactly like an unknown issuer.
#[derive(Debug, Clone)]
pub struct SystemTrustSource {
    anchors: SystemAnchors,
}

#[derive(Debug, Clone)]
enum SystemAnchors {
    Anchored {
        roots: Arc<RootCertStore>,
        verifier: Arc<WebPkiServerVerifier>,
    },
    Missing,
}

impl SystemTrustSource {
    /// Mozilla's root program as shipped by `webpki-roots`. The platform
    /// store is never consulted.
    pub fn bundled(provider: Arc<CryptoProvider>) -> Self {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::from_roots(roots, provider)
    }

    pub fn from_roots(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Self {
        if roots.is_empty() {
            warn!("system trust anchors unavailable; rejecting every chain from the system source");
            return Self::missing();
        }

        let roots = Arc::new(roots);
        match WebPkiServerVerifier::builder_with_provider(Arc::clone(&roots), provider).build() {
            Ok(verifier) => Self {
                anchors: SystemAnchors::Anchored { roots, verifier },
            },
            Err(error) => {
                warn!(%error, "cannot build system trust verifier; rejecting every chain from the system source");
                Self::missing()
            }
        }
    }

    /// Zero-issuer source that rejects everything.
    pub fn missing() -> Self {
        Self {
            anchors: SystemAnchors::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.anchors, SystemAnchors::Missing)
    }

    pub fn check_server_trusted(&self, request: &TrustRequest<'_>) -> Result<(), rustls::Error> {
        match &self.anchors {
            SystemAnchors::Anchored { verifier, .. } => request.verify_with(verifier.as_ref()),
            SystemAnchors::Missing => {
                debug!("system trust anchors missing; retreating");
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::UnknownIssuer,
                ))
            }
        }
    }

    pub fn accepted_issuers(&self) -> Vec<TrustAnchor<'static>> {
        match &self.anchors {
            SystemAnchors::Anchored { roots, .. } => roots.roots.clone(),
            SystemAnchors::Missing => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    include!("tests_system_source.rs");
}
