use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::CertificateError;

/// An X.509 certificate with the identity fields the trust store reads.
///
/// Immutable once parsed; two certificates are equal when their DER
/// encodings are byte-identical.
#[derive(Clone)]
pub struct Certificate {
    der: CertificateDer<'static>,
    subject: String,
    issuer: String,
    common_name: Option<String>,
    dns_names: Vec<String>,
    serial: String,
    not_before: i64,
    not_after: i64,
    public_key_info: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: impl Into<CertificateDer<'static>>) -> Result<Self, CertificateError> {
        let der = der.into();
        let (_, parsed) = parse_x509_certificate(der.as_ref())
            .map_err(|error| CertificateError::Parse(error.to_string()))?;

        let common_name = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attribute| attribute.as_str().ok())
            .map(str::to_string);
        let dns_names = match parsed.subject_alternative_name() {
            Ok(Some(extension)) => extension
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let subject = parsed.subject().to_string();
        let issuer = parsed.issuer().to_string();
        let serial = parsed.tbs_certificate.raw_serial_as_string();
        let not_before = parsed.validity().not_before.timestamp();
        let not_after = parsed.validity().not_after.timestamp();
        let public_key_info = parsed.public_key().raw.to_vec();

        Ok(Self {
            subject,
            issuer,
            common_name,
            dns_names,
            serial,
            not_before,
            not_after,
            public_key_info,
            der,
        })
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// DNS entries of the subject alternative name extension.
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Colon-separated hex of the raw serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> &[u8] {
        &self.public_key_info
    }

    pub fn is_valid_at(&self, unix_seconds: i64) -> bool {
        self.not_before <= unix_seconds && unix_seconds <= self.not_after
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Key under which this certificate is stored.
    pub fn alias(&self) -> String {
        derive_alias(self.common_name.as_deref(), &self.subject, &self.serial)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der.as_ref() == other.der.as_ref()
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.as_ref().hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Aliases are case-insensitive, as in PKCS#12 keystores. A certificate
/// without a common name falls back to its subject, then its serial.
pub fn derive_alias(common_name: Option<&str>, subject: &str, serial: &str) -> String {
    let candidate = common_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| Some(subject.trim()).filter(|subject| !subject.is_empty()))
        .unwrap_or(serial);
    normalize_alias(candidate)
}

pub fn normalize_alias(alias: &str) -> String {
    alias.trim().to_ascii_lowercase()
}

/// Loads a certificate from a PEM file (first CERTIFICATE block) or a raw
/// DER file.
pub fn load_certificate(path: impl AsRef<Path>) -> Result<Certificate, CertificateError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| CertificateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let pem = CertificateDer::from_pem_slice(&bytes);
    let der = match pem {
        Ok(der) => der,
        Err(_) => CertificateDer::from(bytes),
    };
    Certificate::from_der(der)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{derive_alias, load_certificate, Certificate};
    use crate::test_support::{common_name_only, expired_self_signed, issue_self_signed, self_signed};
    use crate::CertificateError;

    #[test]
    fn parses_identity_fields() {
        let certificate = self_signed("Alpha.Test");
        assert_eq!(certificate.common_name(), Some("Alpha.Test"));
        assert_eq!(certificate.alias(), "alpha.test");
        assert_eq!(certificate.dns_names(), ["Alpha.Test".to_string()]);
        assert!(certificate.subject().contains("Alpha.Test"));
        assert!(certificate.is_self_issued());
        assert!(certificate.not_before() < certificate.not_after());
        assert!(!certificate.public_key_info().is_empty());
        assert!(!certificate.serial().is_empty());
    }

    #[test]
    fn reads_validity_window_and_missing_dns_names() {
        let expired = expired_self_signed("old.test");
        assert!(expired.is_valid_at(expired.not_before()));
        assert!(!expired.is_valid_at(expired.not_after() + 1));

        let bare = common_name_only("Bare.Test");
        assert_eq!(bare.common_name(), Some("Bare.Test"));
        assert!(bare.dns_names().is_empty());
    }

    #[test]
    fn alias_falls_back_to_subject_then_serial() {
        assert_eq!(derive_alias(Some("  Host.Example "), "CN=x", "01"), "host.example");
        assert_eq!(derive_alias(Some("   "), "O=Example Org", "01"), "o=example org");
        assert_eq!(derive_alias(None, "", "0a:1b"), "0a:1b");
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        let error = Certificate::from_der(vec![0x01, 0x02, 0x03]).expect_err("garbage");
        assert!(matches!(error, CertificateError::Parse(_)));
    }

    #[test]
    fn loads_pem_and_der_files() {
        let dir = TempDir::new().expect("temp dir");
        let issued = issue_self_signed("files.test");
        let pem_path = dir.path().join("files.pem");
        let der_path = dir.path().join("files.der");
        fs::write(&pem_path, &issued.pem).expect("write pem");
        fs::write(&der_path, issued.certificate.der().as_ref()).expect("write der");

        assert_eq!(load_certificate(&pem_path).expect("pem"), issued.certificate);
        assert_eq!(load_certificate(&der_path).expect("der"), issued.certificate);
        assert!(matches!(
            load_certificate(dir.path().join("missing.pem")),
            Err(CertificateError::Read { .. })
        ));
    }
}
