#![forbid(unsafe_code)]

mod certificate;
mod config;
mod confirmation;
mod coordinator;
mod errors;
mod keystore;
mod persistent_store;
mod system_source;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::client::{verify_server_name, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;

pub use certificate::{derive_alias, load_certificate, normalize_alias, Certificate};
pub use config::{SystemRoots, TrustStoreConfig};
pub use confirmation::{ConfirmationGateway, InteractionMode, ENV_NON_INTERACTIVE};
pub use coordinator::{TrustDecision, TrustDecisionCoordinator, TrustEvaluator, TrustOrigin};
pub use errors::{CertificateError, TrustConfigError, TrustFailure, TrustStoreError};
pub use persistent_store::{ConfirmationScope, PersistentTrustStore};
pub use system_source::SystemTrustSource;

/// Crypto provider shared by every verifier this crate builds.
pub fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// A server chain presented for a trust decision.
#[derive(Debug, Clone, Copy)]
pub struct TrustRequest<'a> {
    pub end_entity: &'a CertificateDer<'a>,
    pub intermediates: &'a [CertificateDer<'a>],
    pub server_name: &'a ServerName<'a>,
    pub ocsp_response: &'a [u8],
    pub now: UnixTime,
}

impl<'a> TrustRequest<'a> {
    pub fn new(
        end_entity: &'a CertificateDer<'a>,
        intermediates: &'a [CertificateDer<'a>],
        server_name: &'a ServerName<'a>,
        now: UnixTime,
    ) -> Self {
        Self {
            end_entity,
            intermediates,
            server_name,
            ocsp_response: &[],
            now,
        }
    }

    pub(crate) fn verify_with(&self, verifier: &WebPkiServerVerifier) -> Result<(), rustls::Error> {
        verifier
            .verify_server_cert(
                self.end_entity,
                self.intermediates,
                self.server_name,
                self.ocsp_response,
                self.now,
            )
            .map(|_| ())
    }

    /// Checks the end-entity certificate against the server name only.
    pub(crate) fn verify_name(&self) -> Result<(), rustls::Error> {
        let parsed = ParsedCertificate::try_from(self.end_entity)?;
        verify_server_name(&parsed, self.server_name)
    }
}

/// Evaluator over the bundled roots and the container at `store_path`.
///
/// The interaction mode comes from [`ENV_NON_INTERACTIVE`]. No gateway is
/// attached, so interactive runs fail closed on untrusted chains until one
/// is supplied through [`TrustDecisionCoordinator::with_gateway`].
pub fn create_trust_evaluator(
    store_path: impl Into<PathBuf>,
    store_password: impl Into<String>,
) -> TrustEvaluator {
    let provider = default_provider();
    let system = SystemTrustSource::bundled(Arc::clone(&provider));
    let custom = Arc::new(PersistentTrustStore::open_with_provider(
        store_path,
        store_password,
        Arc::clone(&provider),
    ));
    TrustDecisionCoordinator::new(system, custom, provider)
        .with_interaction_mode(InteractionMode::detect())
}
