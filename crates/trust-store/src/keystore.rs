//! PKCS#12 container holding the operator-accepted certificates.
//!
//! Certificates are stored as certificate bags without a private key. The
//! alias of every entry is re-derived from the certificate on load, so the
//! container needs no friendly-name attributes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use openssl::pkcs12::Pkcs12;
use openssl::stack::Stack;
use openssl::x509::X509;
use tempfile::NamedTempFile;

use crate::{Certificate, TrustStoreError};

pub(crate) type Entries = BTreeMap<String, Certificate>;

/// Loads the container at `path`, or creates the parent directories and
/// returns an empty mapping when no container exists yet.
pub(crate) fn open_or_create(path: &Path, password: &str) -> Result<Entries, TrustStoreError> {
    match fs::read(path) {
        Ok(bytes) => decode(&bytes, password),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            ensure_parent_exists(path)?;
            Ok(Entries::new())
        }
        Err(source) => Err(io_error(path, source)),
    }
}

/// Replaces the container at `path` with `entries`.
///
/// The new container is written to a sibling temp file (0600 on unix),
/// synced, and renamed over the target, so readers of the file only ever
/// see the previous or the new container. An empty mapping has no
/// container: the file is removed.
pub(crate) fn flush(path: &Path, password: &str, entries: &Entries) -> Result<(), TrustStoreError> {
    if entries.is_empty() {
        return match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(path, source)),
        };
    }

    let encoded = encode(entries, password)?;
    let directory = parent_directory(path);
    let mut staged =
        NamedTempFile::new_in(directory).map_err(|source| io_error(directory, source))?;
    staged
        .write_all(&encoded)
        .map_err(|source| io_error(staged.path(), source))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|source| io_error(path, source))?;
    staged
        .persist(path)
        .map_err(|error| io_error(path, error.error))?;
    Ok(())
}

fn decode(bytes: &[u8], password: &str) -> Result<Entries, TrustStoreError> {
    let parsed = Pkcs12::from_der(bytes)?.parse2(password)?;
    let bundled = parsed.cert.into_iter().chain(parsed.ca.into_iter().flatten());

    let mut entries = Entries::new();
    for x509 in bundled {
        let certificate = Certificate::from_der(x509.to_der()?)?;
        entries.insert(certificate.alias(), certificate);
    }
    Ok(entries)
}

fn encode(entries: &Entries, password: &str) -> Result<Vec<u8>, TrustStoreError> {
    let mut bundle: Stack<X509> = Stack::new()?;
    for certificate in entries.values() {
        bundle.push(X509::from_der(certificate.der().as_ref())?)?;
    }
    let container = Pkcs12::builder().ca(bundle).build2(password)?;
    Ok(container.to_der()?)
}

fn ensure_parent_exists(path: &Path) -> Result<(), TrustStoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| TrustStoreError::CreateDirectories {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

fn parent_directory(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn io_error(path: &Path, source: io::Error) -> TrustStoreError {
    TrustStoreError::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    include!("tests_keystore.rs");
}
