use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, TrustAnchor, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tracing::{debug, info, warn};

use crate::{
    default_provider, Certificate, ConfirmationGateway, InteractionMode, PersistentTrustStore,
    SystemRoots, SystemTrustSource, TrustConfigError, TrustFailure, TrustRequest,
    TrustStoreConfig,
};

/// Which stage of the decision trusted a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustOrigin {
    System,
    Custom,
    /// The operator accepted the end-entity certificate.
    Confirmed { persisted: bool },
    /// Accepted without asking because the run is non-interactive.
    AutoAccepted { persisted: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrustDecision {
    Trusted(TrustOrigin),
    /// Carries the system source's rejection.
    Untrusted(rustls::Error),
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted(_))
    }

    pub fn into_result(self) -> Result<TrustOrigin, TrustFailure> {
        match self {
            Self::Trusted(origin) => Ok(origin),
            Self::Untrusted(cause) => Err(TrustFailure::new(cause)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirmation {
    AutoAccept,
    UserAccept,
    UserReject,
    Unavailable,
}

/// Decides whether a server chain is trusted: system anchors first, then
/// the persistent store, then the operator. An accepted certificate is
/// written back to the persistent store so later handshakes are trusted
/// without asking.
pub struct TrustDecisionCoordinator {
    system: SystemTrustSource,
    custom: Arc<PersistentTrustStore>,
    gateway: Option<Arc<dyn ConfirmationGateway>>,
    interaction_mode: InteractionMode,
    provider: Arc<CryptoProvider>,
}

pub type TrustEvaluator = TrustDecisionCoordinator;

impl TrustDecisionCoordinator {
    /// Interactive coordinator without a gateway: untrusted chains fail
    /// until [`with_gateway`](Self::with_gateway) supplies one.
    pub fn new(
        system: SystemTrustSource,
        custom: Arc<PersistentTrustStore>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            system,
            custom,
            gateway: None,
            interaction_mode: InteractionMode::Interactive,
            provider,
        }
    }

    pub fn from_config(
        config: &TrustStoreConfig,
        gateway: Option<Arc<dyn ConfirmationGateway>>,
    ) -> Result<Self, TrustConfigError> {
        config.validate()?;
        let provider = default_provider();
        let system = match config.system_roots {
            SystemRoots::Bundled => SystemTrustSource::bundled(Arc::clone(&provider)),
            SystemRoots::Disabled => SystemTrustSource::missing(),
        };
        let custom = Arc::new(PersistentTrustStore::open_with_provider(
            config.store_path.clone(),
            config.store_password.clone(),
            Arc::clone(&provider),
        ));

        let mut coordinator =
            Self::new(system, custom, provider).with_interaction_mode(config.interaction_mode);
        coordinator.gateway = gateway;
        Ok(coordinator)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn ConfirmationGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_interaction_mode(mut self, interaction_mode: InteractionMode) -> Self {
        self.interaction_mode = interaction_mode;
        self
    }

    pub fn system_source(&self) -> &SystemTrustSource {
        &self.system
    }

    pub fn custom_store(&self) -> &Arc<PersistentTrustStore> {
        &self.custom
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.interaction_mode
    }

    pub fn check_server_trusted(&self, request: &TrustRequest<'_>) -> Result<(), TrustFailure> {
        self.evaluate(request).into_result().map(|_| ())
    }

    pub fn evaluate(&self, request: &TrustRequest<'_>) -> TrustDecision {
        let system_failure = match self.system.check_server_trusted(request) {
            Ok(()) => {
                debug!("chain trusted by system anchors");
                return TrustDecision::Trusted(TrustOrigin::System);
            }
            Err(error) => error,
        };
        debug!(error = %system_failure, "system anchors rejected chain; trying persistent store");

        let certificate = match Certificate::from_der(request.end_entity.clone().into_owned()) {
            Ok(certificate) => certificate,
            Err(error) => {
                // Nothing to confirm or store; the persistent store may still know the chain.
                debug!(%error, "end-entity certificate is unreadable");
                return match self.custom.check_server_trusted(request) {
                    Ok(()) => TrustDecision::Trusted(TrustOrigin::Custom),
                    Err(_) => TrustDecision::Untrusted(system_failure),
                };
            }
        };

        // Check, confirm and add as one critical section for this alias.
        let scope = self.custom.confirmation_scope(&certificate.alias());
        let _held = scope.lock();

        if self.custom.check_server_trusted(request).is_ok() {
            debug!(alias = scope.alias(), "chain trusted by persistent store");
            return TrustDecision::Trusted(TrustOrigin::Custom);
        }

        match self.confirm(&certificate) {
            Confirmation::AutoAccept => {
                info!(alias = scope.alias(), "certificate accepted automatically");
                let persisted = self.persist(&certificate);
                TrustDecision::Trusted(TrustOrigin::AutoAccepted { persisted })
            }
            Confirmation::UserAccept => {
                info!(alias = scope.alias(), "certificate was accepted");
                let persisted = self.persist(&certificate);
                TrustDecision::Trusted(TrustOrigin::Confirmed { persisted })
            }
            Confirmation::UserReject | Confirmation::Unavailable => {
                debug!(alias = scope.alias(), "certificate was not accepted");
                TrustDecision::Untrusted(system_failure)
            }
        }
    }

    /// Anchors of both sources, recomputed on every call.
    pub fn accepted_issuers(&self) -> Vec<TrustAnchor<'static>> {
        let mut issuers = self.system.accepted_issuers();
        for anchor in self.custom.accepted_issuers() {
            if !issuers.iter().any(|known| same_anchor(known, &anchor)) {
                issuers.push(anchor);
            }
        }
        issuers
    }

    pub fn add_certificate(&self, certificate: &Certificate) -> bool {
        self.custom.add_certificate(certificate)
    }

    pub fn add_certificate_from_path(&self, path: impl AsRef<Path>) -> bool {
        self.custom.add_certificate_from_path(path)
    }

    pub fn remove_certificate(&self, certificate: &Certificate) -> bool {
        self.custom.remove_certificate(certificate)
    }

    pub fn remove_certificate_by_alias(&self, alias: &str) -> bool {
        self.custom.remove_certificate_by_alias(alias)
    }

    pub fn get_certificate(&self, alias: &str) -> Option<Certificate> {
        self.custom.get_certificate(alias)
    }

    pub fn get_certificates(&self) -> Vec<Certificate> {
        self.custom.get_certificates()
    }

    /// Client configuration that runs this coordinator on every handshake.
    pub fn client_config(self: &Arc<Self>) -> Result<Arc<ClientConfig>, rustls::Error> {
        let config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(self) as Arc<dyn ServerCertVerifier>)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }

    fn confirm(&self, certificate: &Certificate) -> Confirmation {
        if self.custom.is_broken() {
            return Confirmation::Unavailable;
        }
        match self.interaction_mode {
            InteractionMode::NonInteractive => Confirmation::AutoAccept,
            InteractionMode::Interactive => match &self.gateway {
                Some(gateway) if gateway.confirm(certificate) => Confirmation::UserAccept,
                Some(_) => Confirmation::UserReject,
                None => Confirmation::Unavailable,
            },
        }
    }

    fn persist(&self, certificate: &Certificate) -> bool {
        let persisted = self.custom.add_certificate(certificate);
        if !persisted {
            warn!(
                alias = %certificate.alias(),
                "accepted certificate could not be stored; trusting it for this handshake only"
            );
        }
        persisted
    }
}

impl fmt::Debug for TrustDecisionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustDecisionCoordinator")
            .field("system", &self.system)
            .field("custom", &self.custom)
            .field("gateway", &self.gateway.is_some())
            .field("interaction_mode", &self.interaction_mode)
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for TrustDecisionCoordinator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let request = TrustRequest {
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        };
        self.check_server_trusted(&request)
            .map(|()| ServerCertVerified::assertion())
            .map_err(TrustFailure::into_cause)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn same_anchor(left: &TrustAnchor<'_>, right: &TrustAnchor<'_>) -> bool {
    left.subject.as_ref() == right.subject.as_ref()
        && left.subject_public_key_info.as_ref() == right.subject_public_key_info.as_ref()
}

#[cfg(test)]
mod tests {
    include!("tests_coordinator.rs");
}
