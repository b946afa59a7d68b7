use std::fs;

use tempfile::TempDir;

use super::{flush, open_or_create, Entries};
use crate::test_support::{self_signed, store_path};
use crate::TrustStoreError;

fn entries_of(hosts: &[&str]) -> Entries {
    hosts
        .iter()
        .map(|host| {
            let certificate = self_signed(host);
            (certificate.alias(), certificate)
        })
        .collect()
}

#[test]
fn missing_container_creates_parent_directories_and_empty_mapping() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);

    let entries = open_or_create(&path, "changeit").expect("open missing container");
    assert!(entries.is_empty());
    assert!(path.parent().expect("parent").is_dir());
    assert!(!path.exists(), "an empty store has no container on disk");
}

#[test]
fn flushed_container_reloads_with_same_certificates() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    open_or_create(&path, "changeit").expect("create parents");

    let entries = entries_of(&["alpha.test", "beta.test"]);
    flush(&path, "changeit", &entries).expect("flush container");
    assert!(path.is_file());

    let reloaded = open_or_create(&path, "changeit").expect("reload container");
    assert_eq!(reloaded, entries);
}

#[test]
fn wrong_password_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    open_or_create(&path, "changeit").expect("create parents");
    flush(&path, "changeit", &entries_of(&["alpha.test"])).expect("flush container");

    let error = open_or_create(&path, "not-the-password").expect_err("wrong password");
    assert!(matches!(error, TrustStoreError::Container(_)), "{error}");
}

#[test]
fn malformed_container_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("garbage.p12");
    fs::write(&path, b"definitely not pkcs12").expect("write garbage");

    assert!(open_or_create(&path, "changeit").is_err());
}

#[test]
fn flushing_empty_mapping_removes_container() {
    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    open_or_create(&path, "changeit").expect("create parents");
    flush(&path, "changeit", &entries_of(&["alpha.test"])).expect("flush container");
    assert!(path.exists());

    flush(&path, "changeit", &Entries::new()).expect("flush empty");
    assert!(!path.exists());
    assert!(open_or_create(&path, "changeit")
        .expect("reopen")
        .is_empty());
}

#[test]
fn unwritable_parent_fails_directory_creation() {
    let dir = TempDir::new().expect("temp dir");
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"file, not a directory").expect("write blocker");

    let error = open_or_create(&blocker.join("store.p12"), "changeit")
        .expect_err("parent is a regular file");
    assert!(
        matches!(
            error,
            TrustStoreError::CreateDirectories { .. } | TrustStoreError::Io { .. }
        ),
        "{error}"
    );
}

#[cfg(unix)]
#[test]
fn flushed_container_is_private_to_owner() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().expect("temp dir");
    let path = store_path(&dir);
    open_or_create(&path, "changeit").expect("create parents");
    flush(&path, "changeit", &entries_of(&["alpha.test"])).expect("flush container");

    let mode = fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o077, 0, "mode {mode:o}");
}
