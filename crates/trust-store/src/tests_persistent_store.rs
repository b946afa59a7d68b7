use std::fs;

use rustls::pki_types::{ServerName, UnixTime};
use tempfile::TempDir;

use super::PersistentTrustStore;
use crate::test_support::{
    common_name_only, der_of, expired_self_signed, issue_self_signed, leaf_from_private_ca, self_signed,
    store_path,
};
use crate::{Certificate, TrustRequest};

const PASSWORD: &str = "changeit";

fn check(store: &PersistentTrustStore, certificate: &Certificate, host: &str) -> Result<(), rustls::Error> {
    let leaf = der_of(certificate);
    let name = ServerName::try_from(host.to_string()).expect("server name");
    store.check_server_trusted(&TrustRequest::new(&leaf, &[], &name, UnixTime::now()))
}

#[test]
fn fresh_store_is_empty_and_rejects() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);

    assert!(!store.is_broken());
    assert!(store.is_empty());
    assert!(store.accepted_issuers().is_empty());
    assert!(check(&store, &self_signed("alpha.test"), "alpha.test").is_err());
}

#[test]
fn added_certificate_is_retrievable_and_trusted() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let certificate = self_signed("alpha.test");

    assert!(store.add_certificate(&certificate));
    assert_eq!(store.get_certificate(&certificate.alias()), Some(certificate.clone()));
    check(&store, &certificate, "alpha.test").expect("stored certificate is trusted");
    assert_eq!(store.accepted_issuers().len(), 1);
}

#[test]
fn accepted_leaf_from_unknown_ca_is_trusted_when_presented_again() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let leaf = leaf_from_private_ca("gamma.test");
    assert!(!leaf.is_self_issued());

    assert!(store.add_certificate(&leaf));
    check(&store, &leaf, "gamma.test").expect("stored leaf is trusted byte for byte");
    assert!(check(&store, &leaf, "delta.test").is_err());
    assert!(check(&store, &leaf_from_private_ca("gamma.test"), "gamma.test").is_err());
}

#[test]
fn stored_certificate_stays_trusted_after_it_expires() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let expired = expired_self_signed("old.test");

    assert!(store.add_certificate(&expired));
    check(&store, &expired, "old.test").expect("expired stored certificate is trusted");
    assert!(check(&store, &expired, "new.test").is_err());

    let reopened = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    check(&reopened, &expired, "old.test").expect("trusted after reopen");
}

#[test]
fn certificate_without_dns_names_is_trusted_for_its_common_name() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let certificate = common_name_only("Bare.Test");

    assert!(store.add_certificate(&certificate));
    check(&store, &certificate, "bare.test").expect("common name matches server name");
    assert!(check(&store, &certificate, "other.test").is_err());
}

#[test]
fn common_name_is_ignored_when_dns_names_are_present() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let mut params = rcgen::CertificateParams::new(vec!["san.test".to_string()]).expect("params");
    let mut distinguished_name = rcgen::DistinguishedName::new();
    distinguished_name.push(rcgen::DnType::CommonName, "cn.test");
    params.distinguished_name = distinguished_name;
    let key = rcgen::KeyPair::generate().expect("key");
    let issued = params.self_signed(&key).expect("certificate");
    let certificate = Certificate::from_der(issued.der().clone()).expect("parse");

    assert!(store.add_certificate(&certificate));
    check(&store, &certificate, "san.test").expect("san entry matches");
    assert!(check(&store, &certificate, "cn.test").is_err());
}

#[test]
fn alias_lookup_ignores_case_and_surrounding_whitespace() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let certificate = self_signed("alpha.test");
    assert!(store.add_certificate(&certificate));

    assert_eq!(store.get_certificate("  ALPHA.test "), Some(certificate));
}

#[test]
fn removed_alias_is_gone_and_untrusted() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    let store = PersistentTrustStore::open(&path, PASSWORD);
    let certificate = self_signed("alpha.test");
    assert!(store.add_certificate(&certificate));

    assert!(store.remove_certificate_by_alias("alpha.test"));
    assert_eq!(store.get_certificate("alpha.test"), None);
    assert!(check(&store, &certificate, "alpha.test").is_err());
    assert!(!path.exists(), "last removal leaves no container");
}

#[test]
fn removing_by_certificate_uses_its_alias() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let alpha = self_signed("alpha.test");
    let beta = self_signed("beta.test");
    assert!(store.add_certificate(&alpha));
    assert!(store.add_certificate(&beta));

    assert!(store.remove_certificate(&alpha));
    assert_eq!(store.get_certificates(), vec![beta]);
}

#[test]
fn removing_unknown_alias_succeeds_without_change() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let certificate = self_signed("alpha.test");
    assert!(store.add_certificate(&certificate));

    assert!(store.remove_certificate_by_alias("nobody.test"));
    assert_eq!(store.len(), 1);
}

#[test]
fn certificates_survive_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    let alpha = self_signed("alpha.test");
    let beta = self_signed("beta.test");
    {
        let store = PersistentTrustStore::open(&path, PASSWORD);
        assert!(store.add_certificate(&beta));
        assert!(store.add_certificate(&alpha));
    }

    let reopened = PersistentTrustStore::open(&path, PASSWORD);
    assert!(!reopened.is_broken());
    assert_eq!(reopened.get_certificates(), vec![alpha.clone(), beta]);
    check(&reopened, &alpha, "alpha.test").expect("reloaded certificate is trusted");
}

#[test]
fn shared_common_name_overwrites_previous_entry() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let first = self_signed("shared.test");
    let second = self_signed("shared.test");
    assert_ne!(first, second);

    assert!(store.add_certificate(&first));
    assert!(store.add_certificate(&second));
    assert_eq!(store.get_certificates(), vec![second.clone()]);
    assert!(check(&store, &first, "shared.test").is_err());
    check(&store, &second, "shared.test").expect("latest entry is trusted");
}

#[test]
fn adds_certificate_from_pem_and_der_files() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);

    let pem_issued = issue_self_signed("pem.test");
    let pem_path = dir.path().join("pem.crt");
    fs::write(&pem_path, &pem_issued.pem).expect("write pem");

    let der_certificate = self_signed("der.test");
    let der_path = dir.path().join("der.cer");
    fs::write(&der_path, der_certificate.der().as_ref()).expect("write der");

    assert!(store.add_certificate_from_path(&pem_path));
    assert!(store.add_certificate_from_path(&der_path));
    assert_eq!(store.get_certificate("pem.test"), Some(pem_issued.certificate));
    assert_eq!(store.get_certificate("der.test"), Some(der_certificate));
}

#[test]
fn unreadable_certificate_file_is_not_added() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    let junk = dir.path().join("junk.crt");
    fs::write(&junk, b"not a certificate").expect("write junk");

    assert!(!store.add_certificate_from_path(&junk));
    assert!(!store.add_certificate_from_path(dir.path().join("missing.crt")));
    assert!(store.is_empty());
}

#[test]
fn malformed_container_breaks_store_permanently() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("accepted.p12");
    fs::write(&path, b"corrupted").expect("write corrupted container");

    let store = PersistentTrustStore::open(&path, PASSWORD);
    let certificate = self_signed("alpha.test");
    assert!(store.is_broken());
    assert!(!store.add_certificate(&certificate));
    assert!(!store.remove_certificate_by_alias("alpha.test"));
    assert!(store.get_certificates().is_empty());
    assert!(store.accepted_issuers().is_empty());
    assert!(check(&store, &certificate, "alpha.test").is_err());
    assert_eq!(fs::read(&path).expect("container untouched"), b"corrupted");
}

#[test]
fn wrong_password_breaks_store_regardless_of_contents() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    let certificate = self_signed("alpha.test");
    {
        let store = PersistentTrustStore::open(&path, PASSWORD);
        assert!(store.add_certificate(&certificate));
    }

    let store = PersistentTrustStore::open(&path, "wrong-password");
    assert!(store.is_broken());
    assert_eq!(store.get_certificate("alpha.test"), None);
    assert!(store.accepted_issuers().is_empty());
    assert!(check(&store, &certificate, "alpha.test").is_err());
}

#[test]
fn directory_creation_failure_breaks_store() {
    let dir = TempDir::new().expect("temp dir");
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"regular file").expect("write blocker");

    let store = PersistentTrustStore::open(blocker.join("accepted.p12"), PASSWORD);
    assert!(store.is_broken());
    assert!(!store.add_certificate(&self_signed("alpha.test")));
}

#[test]
fn failed_flush_leaves_memory_and_disk_unchanged() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    let store = PersistentTrustStore::open(&path, PASSWORD);
    let alpha = self_signed("alpha.test");
    assert!(store.add_certificate(&alpha));

    // A directory at the container path makes the atomic rename fail.
    fs::remove_file(&path).expect("remove container");
    fs::create_dir(&path).expect("block container path");

    let beta = self_signed("beta.test");
    assert!(!store.add_certificate(&beta));
    assert!(!store.is_broken());
    assert_eq!(store.get_certificate("beta.test"), None);
    assert_eq!(store.get_certificates(), vec![alpha.clone()]);
    assert!(check(&store, &beta, "beta.test").is_err());
    check(&store, &alpha, "alpha.test").expect("previous entry still trusted");
}

#[test]
fn confirmation_scope_is_released_after_use() {
    let dir = TempDir::new().expect("temp dir");
    let store = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    {
        let scope = store.confirmation_scope("Alpha.Test");
        assert_eq!(scope.alias(), "alpha.test");
        let _held = scope.lock();
        assert_eq!(store.scopes.lock().len(), 1);
    }
    assert!(store.scopes.lock().is_empty());
}
