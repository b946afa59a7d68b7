use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to parse X.509 certificate: {0}")]
    Parse(String),
    #[error("failed to read certificate from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Internal store failure. Never crosses the store boundary: callers see
/// booleans, empty results, or a generic `rustls::Error`.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("keystore container error: {0}")]
    Container(#[from] openssl::error::ErrorStack),
    #[error("keystore I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot create directories for {path}: {source}")]
    CreateDirectories {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("keystore entry is not a usable certificate: {0}")]
    Certificate(#[from] CertificateError),
    #[error("certificate cannot be used as a trust anchor: {0}")]
    Anchor(#[source] rustls::Error),
    #[error("failed to derive trust verifier: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
}

/// The chain was rejected by every trust source and no acceptance was
/// obtained. Carries the system source's rejection unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("server certificate rejected: {cause}")]
pub struct TrustFailure {
    cause: rustls::Error,
}

impl TrustFailure {
    pub fn new(cause: rustls::Error) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &rustls::Error {
        &self.cause
    }

    pub fn into_cause(self) -> rustls::Error {
        self.cause
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrustConfigError {
    #[error("store_path must not be empty")]
    EmptyStorePath,
    #[error("store_path must name a file, got directory-like path {0}")]
    StorePathIsDirectory(String),
}
