mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustls::CertificateError;
use tempfile::TempDir;
use trust_store::{
    ConfirmationGateway, InteractionMode, TrustDecision, TrustEvaluator, TrustOrigin,
    TrustStoreConfig,
};

use common::{counting_gateway, evaluate, self_signed, store_path, PASSWORD};

fn evaluator(
    dir: &TempDir,
    mode: InteractionMode,
    gateway: Option<Arc<dyn ConfirmationGateway>>,
) -> TrustEvaluator {
    let config = TrustStoreConfig {
        interaction_mode: mode,
        ..TrustStoreConfig::new(store_path(dir), PASSWORD)
    };
    TrustEvaluator::from_config(&config, gateway).expect("evaluator")
}

#[test]
fn accepted_certificate_survives_restart() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("intranet.test");

    let (accepting, first_prompts) = counting_gateway(true);
    let first = evaluator(&dir, InteractionMode::Interactive, Some(accepting));
    assert_eq!(
        evaluate(&first, &certificate, "intranet.test"),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
    );
    assert_eq!(first_prompts.load(Ordering::SeqCst), 1);
    drop(first);

    let (rejecting, second_prompts) = counting_gateway(false);
    let second = evaluator(&dir, InteractionMode::Interactive, Some(rejecting));
    assert_eq!(
        evaluate(&second, &certificate, "intranet.test"),
        TrustDecision::Trusted(TrustOrigin::Custom)
    );
    assert_eq!(second_prompts.load(Ordering::SeqCst), 0);
    assert_eq!(second.get_certificates(), vec![certificate]);
}

#[test]
fn rejected_certificate_reports_unknown_issuer_and_stores_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let (rejecting, prompts) = counting_gateway(false);
    let evaluator = evaluator(&dir, InteractionMode::Interactive, Some(rejecting));

    let decision = evaluate(&evaluator, &self_signed("intranet.test"), "intranet.test");
    assert_eq!(
        decision.into_result().expect_err("rejected").into_cause(),
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
    assert!(evaluator.get_certificates().is_empty());
    assert!(!store_path(&dir).exists());
}

#[test]
fn non_interactive_run_accepts_and_persists_silently() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("ci.test");
    let (gateway, prompts) = counting_gateway(false);
    let evaluator = evaluator(&dir, InteractionMode::NonInteractive, Some(gateway));

    assert_eq!(
        evaluate(&evaluator, &certificate, "ci.test"),
        TrustDecision::Trusted(TrustOrigin::AutoAccepted { persisted: true })
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
    assert!(store_path(&dir).exists());

    let reopened = self::evaluator(&dir, InteractionMode::Interactive, None);
    assert_eq!(reopened.get_certificate("ci.test"), Some(certificate));
}

#[test]
fn removed_certificate_is_asked_for_again() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("intranet.test");
    let (accepting, prompts) = counting_gateway(true);
    let evaluator = evaluator(&dir, InteractionMode::Interactive, Some(accepting));

    assert!(evaluate(&evaluator, &certificate, "intranet.test").is_trusted());
    assert!(evaluator.remove_certificate_by_alias("INTRANET.test"));
    assert!(evaluator.get_certificates().is_empty());
    assert_eq!(
        evaluate(&evaluator, &certificate, "intranet.test"),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 2);
}

#[test]
fn imported_certificate_file_is_trusted_without_prompt() {
    let dir = TempDir::new().expect("temp dir");
    let certificate = self_signed("imported.test");
    let der_path = dir.path().join("imported.cer");
    fs::write(&der_path, certificate.der().as_ref()).expect("write certificate");

    let (gateway, prompts) = counting_gateway(false);
    let evaluator = evaluator(&dir, InteractionMode::Interactive, Some(gateway));
    assert!(evaluator.add_certificate_from_path(&der_path));
    assert_eq!(
        evaluate(&evaluator, &certificate, "imported.test"),
        TrustDecision::Trusted(TrustOrigin::Custom)
    );
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
}

#[test]
fn corrupted_store_trusts_nothing_and_never_prompts() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
    fs::write(&path, b"not a pkcs12 container").expect("write corrupted container");

    let (accepting, prompts) = counting_gateway(true);
    let evaluator = evaluator(&dir, InteractionMode::Interactive, Some(accepting));
    assert!(evaluator.custom_store().is_broken());
    assert!(!evaluate(&evaluator, &self_signed("intranet.test"), "intranet.test").is_trusted());
    assert!(!evaluator.add_certificate(&self_signed("other.test")));
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read(&path).expect("container"), b"not a pkcs12 container");
}
