use std::sync::Arc;

use rustls::pki_types::{ServerName, UnixTime};
use rustls::{CertificateError, RootCertStore};

use super::SystemTrustSource;
use crate::test_support::{der_of, self_signed};
use crate::{default_provider, TrustRequest};

fn server_name(host: &str) -> ServerName<'static> {
    ServerName::try_from(host.to_string()).expect("server name")
}

#[test]
fn bundled_source_holds_exactly_the_webpki_roots() {
    let source = SystemTrustSource::bundled(default_provider());
    assert!(!source.is_missing());
    let issuers = source.accepted_issuers();
    assert_eq!(issuers.len(), webpki_roots::TLS_SERVER_ROOTS.len());
    assert!(issuers
        .iter()
        .zip(webpki_roots::TLS_SERVER_ROOTS.iter())
        .all(|(issuer, bundled)| issuer.subject.as_ref() == bundled.subject.as_ref()));
}

#[test]
fn bundled_source_rejects_self_signed_leaf_as_unknown_issuer() {
    let source = SystemTrustSource::bundled(default_provider());
    let leaf = der_of(&self_signed("alpha.test"));
    let name = server_name("alpha.test");

    let error = source
        .check_server_trusted(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
        .expect_err("self-signed leaf must not chain to bundled roots");
    assert_eq!(
        error,
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
    );
}

#[test]
fn empty_roots_select_the_missing_source() {
    let source = SystemTrustSource::from_roots(RootCertStore::empty(), default_provider());
    assert!(source.is_missing());
    assert!(source.accepted_issuers().is_empty());

    let leaf = der_of(&self_signed("alpha.test"));
    let name = server_name("alpha.test");
    assert!(source
        .check_server_trusted(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
        .is_err());
}

#[test]
fn custom_roots_accept_their_own_chain() {
    let certificate = self_signed("alpha.test");
    let mut roots = RootCertStore::empty();
    roots.add(der_of(&certificate)).expect("add root");
    let source = SystemTrustSource::from_roots(roots, Arc::clone(&default_provider()));

    let leaf = der_of(&certificate);
    let name = server_name("alpha.test");
    source
        .check_server_trusted(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
        .expect("pinned root accepts its own leaf");
    assert_eq!(source.accepted_issuers().len(), 1);
}
