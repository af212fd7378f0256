#![allow(dead_code)]

use mitmcrab::tls::CertificateAuthority;
use mitmcrab::{Config, Shared};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::sync::Arc;

/// A throwaway root CA in PEM form.
pub struct TestCa {
    pub key_pem: String,
    pub cert_pem: String,
}

impl TestCa {
    pub fn new() -> Self {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "MITM Crab Integration CA");
        dn.push(DnType::OrganizationName, "MITM Crab");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        TestCa {
            key_pem: key.serialize_pem(),
            cert_pem: cert.pem(),
        }
    }

    pub fn authority(&self) -> CertificateAuthority {
        CertificateAuthority::from_pem(&self.key_pem, &self.cert_pem).unwrap()
    }

    pub fn cert_der(&self) -> Vec<u8> {
        pem::parse(&self.cert_pem).unwrap().into_contents()
    }
}

/// Parse a JSON config, filling in a `tls` section when the document has none.
pub fn config(json: &str) -> Shared {
    let mut value: serde_json::Value = serde_json::from_str(json).unwrap();
    if value.get("tls").is_none() {
        value["tls"] = serde_json::json!({ "ca_key_path": "ca.key", "ca_cert_path": "ca.pem" });
    }
    let config = Config::try_from_reader(value.to_string().as_bytes()).unwrap();
    Arc::new(config)
}
