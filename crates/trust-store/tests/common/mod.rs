#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use tempfile::TempDir;
use trust_store::{Certificate, ConfirmationGateway, TrustDecision, TrustEvaluator, TrustRequest};

pub const PASSWORD: &str = "changeit";

pub struct ServerIdentity {
    pub certificate: Certificate,
    pub key: PrivateKeyDer<'static>,
}

/// Self-signed server identity for `host` (common name and DNS SAN).
pub fn server_identity(host: &str) -> ServerIdentity {
    let mut params = CertificateParams::new(vec![host.to_string()]).expect("leaf params");
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host);
    params.distinguished_name = distinguished_name;

    let key = KeyPair::generate().expect("leaf key");
    let cert = params.self_signed(&key).expect("self-signed leaf");
    ServerIdentity {
        certificate: Certificate::from_der(cert.der().clone()).expect("parse leaf"),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
    }
}

pub fn self_signed(host: &str) -> Certificate {
    server_identity(host).certificate
}

pub fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("state").join("accepted.p12")
}

pub fn evaluate(evaluator: &TrustEvaluator, certificate: &Certificate, host: &str) -> TrustDecision {
    let leaf = certificate.der().clone();
    let name = ServerName::try_from(host.to_string()).expect("server name");
    evaluator.evaluate(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
}

pub fn counting_gateway(answer: bool) -> (Arc<dyn ConfirmationGateway>, Arc<AtomicUsize>) {
    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&prompts);
    let gateway = move |_: &Certificate| {
        counter.fetch_add(1, Ordering::SeqCst);
        answer
    };
    (Arc::new(gateway) as Arc<dyn ConfirmationGateway>, prompts)
}
