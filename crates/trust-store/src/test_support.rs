use std::path::PathBuf;

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair};
use rustls::pki_types::CertificateDer;
use tempfile::TempDir;

use crate::Certificate;

pub(crate) struct Issued {
    pub certificate: Certificate,
    pub pem: String,
}

/// Self-signed end-entity certificate whose common name and DNS SAN are `host`.
pub(crate) fn issue_self_signed(host: &str) -> Issued {
    let mut params = CertificateParams::new(vec![host.to_string()]).expect("leaf params");
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host);
    params.distinguished_name = distinguished_name;

    let key = KeyPair::generate().expect("leaf key");
    let cert = params.self_signed(&key).expect("self-signed leaf");
    Issued {
        certificate: Certificate::from_der(cert.der().clone()).expect("parse leaf"),
        pem: cert.pem(),
    }
}

pub(crate) fn self_signed(host: &str) -> Certificate {
    issue_self_signed(host).certificate
}

/// Self-signed certificate for `host` that expired at the start of 2021.
pub(crate) fn expired_self_signed(host: &str) -> Certificate {
    let mut params = CertificateParams::new(vec![host.to_string()]).expect("leaf params");
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host);
    params.distinguished_name = distinguished_name;
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2021, 1, 1);

    let key = KeyPair::generate().expect("leaf key");
    let cert = params.self_signed(&key).expect("expired leaf");
    Certificate::from_der(cert.der().clone()).expect("parse leaf")
}

/// Self-signed certificate naming `host` only in its common name.
pub(crate) fn common_name_only(host: &str) -> Certificate {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("leaf params");
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host);
    params.distinguished_name = distinguished_name;

    let key = KeyPair::generate().expect("leaf key");
    let cert = params.self_signed(&key).expect("common-name leaf");
    Certificate::from_der(cert.der().clone()).expect("parse leaf")
}

/// Leaf for `host` signed by a throwaway CA that no trust source holds.
pub(crate) fn leaf_from_private_ca(host: &str) -> Certificate {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let mut ca_name = DistinguishedName::new();
    ca_name.push(DnType::CommonName, "private test ca");
    ca_params.distinguished_name = ca_name;
    let issuer = Issuer::new(ca_params, KeyPair::generate().expect("ca key"));

    let mut params = CertificateParams::new(vec![host.to_string()]).expect("leaf params");
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host);
    params.distinguished_name = distinguished_name;
    let key = KeyPair::generate().expect("leaf key");
    let cert = params.signed_by(&key, &issuer).expect("ca-signed leaf");
    Certificate::from_der(cert.der().clone()).expect("parse leaf")
}

pub(crate) fn der_of(certificate: &Certificate) -> CertificateDer<'static> {
    certificate.der().clone()
}

pub(crate) fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("nested").join("trust").join("accepted.p12")
}
