use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, RootCertStore};
use tempfile::TempDir;

use super::{TrustDecision, TrustDecisionCoordinator, TrustOrigin};
use crate::test_support::{common_name_only, der_of, expired_self_signed, self_signed, store_path};
use crate::{
    default_provider, Certificate, ConfirmationGateway, InteractionMode, PersistentTrustStore,
    SystemRoots, SystemTrustSource, TrustConfigError, TrustRequest, TrustStoreConfig,
};

const PASSWORD: &str = "changeit";

fn unknown_issuer() -> rustls::Error {
    rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
}

fn coordinator(dir: &TempDir, system: SystemTrustSource) -> TrustDecisionCoordinator {
    let provider = default_provider();
    let store = Arc::new(PersistentTrustStore::open_with_provider(
        store_path(dir),
        PASSWORD,
        Arc::clone(&provider),
    ));
    TrustDecisionCoordinator::new(system, store, provider)
}

fn counting_gateway(answer: bool) -> (Arc<dyn ConfirmationGateway>, Arc<AtomicUsize>) {
    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&prompts);
    let gateway = move |_: &Certificate| {
        counter.fetch_add(1, Ordering::SeqCst);
        answer
    };
    (Arc::new(gateway) as Arc<dyn ConfirmationGateway>, prompts)
}

fn evaluate(
    coordinator: &TrustDecisionCoordinator,
    certificate: &Certificate,
    host: &str,
) -> TrustDecision {
    let leaf = der_of(certificate);
    let name = ServerName::try_from(host.to_string()).expect("server name");
    coordinator.evaluate(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
}

#[test]
fn system_trusted_chain_never_reaches_the_store_or_gateway() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("alpha.test");
    let mut roots = RootCertStore::empty();
    roots.add(der_of(&certificate)).expect("add root");
    let (gateway, prompts) = counting_gateway(true);
    let coordinator =
        coordinator(&dir, SystemTrustSource::from_roots(roots, default_provider())).with_gateway(gateway);

    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Trusted(TrustOrigin::System)
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
    assert!(coordinator.get_certificates().is_empty());
}

#[test]
fn stored_certificate_is_trusted_without_prompt() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("alpha.test");
    let (gateway, prompts) = counting_gateway(false);
    let coordinator = coordinator(&dir, SystemTrustSource::missing()).with_gateway(gateway);
    assert!(coordinator.add_certificate(&certificate));

    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Trusted(TrustOrigin::Custom)
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
}

#[test]
fn confirmed_certificate_is_stored_and_not_asked_for_again() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("alpha.test");
    let (gateway, prompts) = counting_gateway(true);
    let coordinator =
        coordinator(&dir, SystemTrustSource::bundled(default_provider())).with_gateway(gateway);

    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
    );
    assert_eq!(coordinator.get_certificate("alpha.test"), Some(certificate.clone()));
    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Trusted(TrustOrigin::Custom)
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
}

#[test]
fn confirmed_expired_certificate_is_asked_for_once() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = expired_self_signed("old.test");
    let (gateway, prompts) = counting_gateway(true);
    let coordinator =
        coordinator(&dir, SystemTrustSource::bundled(default_provider())).with_gateway(gateway);

    assert_eq!(
        evaluate(&coordinator, &certificate, "old.test"),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
    );
    for _ in 0..2 {
        assert_eq!(
            evaluate(&coordinator, &certificate, "old.test"),
            TrustDecision::Trusted(TrustOrigin::Custom)
        );
    }
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
}

#[test]
fn confirmed_certificate_without_dns_names_is_asked_for_once() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = common_name_only("bare.test");
    let (gateway, prompts) = counting_gateway(true);
    let coordinator = coordinator(&dir, SystemTrustSource::missing()).with_gateway(gateway);

    assert_eq!(
        evaluate(&coordinator, &certificate, "bare.test"),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
    );
    assert_eq!(
        evaluate(&coordinator, &certificate, "bare.test"),
        TrustDecision::Trusted(TrustOrigin::Custom)
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
}

#[test]
fn rejected_certificate_fails_with_the_system_cause() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("alpha.test");
    let (gateway, prompts) = counting_gateway(false);
    let coordinator =
        coordinator(&dir, SystemTrustSource::bundled(default_provider())).with_gateway(gateway);

    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Untrusted(unknown_issuer())
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
    assert!(coordinator.get_certificates().is_empty());

    let leaf = der_of(&certificate);
    let name = ServerName::try_from("alpha.test").expect("server name");
    let failure = coordinator
        .check_server_trusted(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
        .expect_err("rejected chain");
    assert_eq!(failure.cause(), &unknown_issuer());
}

#[test]
fn interactive_mode_without_gateway_fails_closed() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = coordinator(&dir, SystemTrustSource::missing());

    assert!(!evaluate(&coordinator, &self_signed("alpha.test"), "alpha.test").is_trusted());
    assert!(coordinator.get_certificates().is_empty());
}

#[test]
fn non_interactive_mode_accepts_without_consulting_gateway() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("alpha.test");
    let (gateway, prompts) = counting_gateway(false);
    let coordinator = coordinator(&dir, SystemTrustSource::missing())
        .with_gateway(gateway)
        .with_interaction_mode(InteractionMode::NonInteractive);

    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Trusted(TrustOrigin::AutoAccepted { persisted: true })
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
    assert_eq!(coordinator.get_certificates(), vec![certificate]);
}

#[test]
fn broken_store_fails_without_prompt_even_when_non_interactive() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
    fs::write(&path, b"corrupted").expect("write corrupted container");

    for mode in [InteractionMode::Interactive, InteractionMode::NonInteractive] {
        let (gateway, prompts) = counting_gateway(true);
        let coordinator = coordinator(&dir, SystemTrustSource::missing())
            .with_gateway(gateway)
            .with_interaction_mode(mode);
        assert!(coordinator.custom_store().is_broken());

        assert_eq!(
            evaluate(&coordinator, &self_signed("alpha.test"), "alpha.test"),
            TrustDecision::Untrusted(unknown_issuer()),
            "{}",
            mode.as_str()
        );
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn confirmed_certificate_is_trusted_even_when_it_cannot_be_stored() {
    let dir = TempDir::new().expect("temp dir");
    let (gateway, _prompts) = counting_gateway(true);
    let coordinator = coordinator(&dir, SystemTrustSource::missing()).with_gateway(gateway);
    fs::create_dir_all(coordinator.custom_store().path()).expect("block container path");

    let certificate = self_signed("alpha.test");
    assert_eq!(
        evaluate(&coordinator, &certificate, "alpha.test"),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: false })
    );
    assert_eq!(coordinator.get_certificate("alpha.test"), None);
}

#[test]
fn unreadable_end_entity_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let (gateway, prompts) = counting_gateway(true);
    let coordinator = coordinator(&dir, SystemTrustSource::missing()).with_gateway(gateway);

    let leaf = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
    let name = ServerName::try_from("alpha.test").expect("server name");
    let decision = coordinator.evaluate(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()));
    assert!(!decision.is_trusted());
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
}

#[test]
fn accepted_issuers_merge_both_sources_without_duplicates() {
    let dir = TempDir::new().expect("temp dir");
    let shared = self_signed("shared.test");
    let custom_only = self_signed("custom.test");
    let mut roots = RootCertStore::empty();
    roots.add(der_of(&shared)).expect("add root");
    let coordinator = coordinator(&dir, SystemTrustSource::from_roots(roots, default_provider()));

    assert_eq!(coordinator.accepted_issuers().len(), 1);
    assert!(coordinator.add_certificate(&shared));
    assert!(coordinator.add_certificate(&custom_only));
    assert_eq!(coordinator.accepted_issuers().len(), 2);
}

#[test]
fn from_config_validates_and_applies_settings() {
    let dir = TempDir::new().expect("temp dir");
    assert_eq!(
        TrustDecisionCoordinator::from_config(&TrustStoreConfig::default(), None).err(),
        Some(TrustConfigError::EmptyStorePath)
    );

    let config = TrustStoreConfig {
        interaction_mode: InteractionMode::NonInteractive,
        system_roots: SystemRoots::Disabled,
        ..TrustStoreConfig::new(store_path(&dir), PASSWORD)
    };
    let coordinator = TrustDecisionCoordinator::from_config(&config, None).expect("coordinator");
    assert!(coordinator.system_source().is_missing());
    assert_eq!(coordinator.interaction_mode(), InteractionMode::NonInteractive);
    assert_eq!(coordinator.custom_store().path(), store_path(&dir).as_path());
}
