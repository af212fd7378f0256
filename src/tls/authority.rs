//! Root CA loading and leaf certificate issuance.

use crate::error::Error;
use crate::tls::certificate::{keys_match, trim_serial, IssuedCertificate, SubjectName};
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SerialNumber, SignatureAlgorithm, PKCS_ECDSA_P256_SHA256,
    PKCS_RSA_SHA256, PKCS_RSA_SHA384, PKCS_RSA_SHA512,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::fmt;
use std::path::Path;
use time::{Duration, OffsetDateTime};

/// Organization placed in the subject of every leaf certificate.
pub const LEAF_ORGANIZATION: &str = "Acme Co";

/// How far before the issuance time a leaf's validity starts.
pub const BACKDATE: Duration = Duration::hours(24);

/// How long a leaf stays valid, counted from `not_before`.
pub const VALIDITY: Duration = Duration::days(365);

static RSA_ALGORITHMS: &[&SignatureAlgorithm] =
    &[&PKCS_RSA_SHA256, &PKCS_RSA_SHA384, &PKCS_RSA_SHA512];

/// The locally controlled root CA: its private key, and an issuer handle rebuilt from its
/// certificate. Loaded once at startup and never mutated.
pub struct CertificateAuthority {
    key: KeyPair,
    issuer: Certificate,
    cert_der: CertificateDer<'static>,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("algorithm", self.key.algorithm())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load the CA from a PEM encoded PKCS#8 private key and a PEM encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CALoad`] if either file can't be read, doesn't parse, or if the key
    /// doesn't belong to the certificate.
    pub fn load(key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<Self, Error> {
        let key_pem = read_pem_file(key_path.as_ref())?;
        let cert_pem = read_pem_file(cert_path.as_ref())?;
        Self::from_pem(&key_pem, &cert_pem)
    }

    /// Build the CA from in-memory PEM strings.
    ///
    /// # Errors
    ///
    /// See [`CertificateAuthority::load`].
    pub fn from_pem(key_pem: &str, cert_pem: &str) -> Result<Self, Error> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|err| Error::CALoad(format!("invalid CA private key: {err}")))?;

        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
            .map_err(|err| Error::CALoad(format!("invalid CA certificate PEM: {err}")))?;
        {
            let cert = pem
                .parse_x509()
                .map_err(|err| Error::CALoad(format!("invalid CA certificate: {err}")))?;
            if !keys_match(&cert, &key) {
                return Err(Error::CALoad(
                    "CA private key does not match CA certificate".to_string(),
                ));
            }
        }

        let issuer = CertificateParams::from_ca_cert_pem(cert_pem)
            .and_then(|params| params.self_signed(&key))
            .map_err(|err| Error::CALoad(format!("unusable CA certificate: {err}")))?;

        Ok(CertificateAuthority {
            key,
            issuer,
            cert_der: CertificateDer::from(pem.contents),
        })
    }

    /// The CA certificate exactly as loaded.
    #[must_use]
    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Issue a leaf certificate for a comma separated list of DNS names and IP literals, with a
    /// fresh P-256 key. Every call mints a new key and serial number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCertificate`] if the subject is empty or holds an invalid name,
    /// and [`Error::Certificate`] if key generation or signing fails.
    pub fn issue(&self, subject: &str) -> Result<IssuedCertificate, Error> {
        let subject_names = SubjectName::parse_list(subject)?;
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

        let now = OffsetDateTime::now_utc();
        // X.509 validity has one second resolution.
        let now = now.replace_nanosecond(0).unwrap_or(now);
        let not_before = now - BACKDATE;
        let not_after = not_before + VALIDITY;
        let serial = random_serial();

        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.not_before = not_before;
        params.not_after = not_after;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, LEAF_ORGANIZATION);
        params.distinguished_name = dn;
        params.key_usages = key_usages(key.algorithm());
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = true;
        params.subject_alt_names = subject_names
            .iter()
            .map(SubjectName::to_san)
            .collect::<Result<_, _>>()?;

        let cert = params.signed_by(&key, &self.issuer, &self.key)?;
        tracing::debug!(subject, "issued leaf certificate");

        Ok(IssuedCertificate {
            subject_names,
            serial,
            not_before,
            not_after,
            cert_der: cert.der().clone(),
            key_der: PrivatePkcs8KeyDer::from(key.serialize_der()),
        })
    }
}

fn read_pem_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|err| Error::CALoad(format!("{}: {err}", path.display())))
}

/// Leaf key usage: digital signature always, key encipherment only for RSA keys.
fn key_usages(algorithm: &SignatureAlgorithm) -> Vec<KeyUsagePurpose> {
    let mut usages = vec![KeyUsagePurpose::DigitalSignature];
    if RSA_ALGORITHMS.iter().any(|rsa| *rsa == algorithm) {
        usages.push(KeyUsagePurpose::KeyEncipherment);
    }
    usages
}

/// A random 128 bit serial number.
fn random_serial() -> Vec<u8> {
    trim_serial(&rand::random::<u128>().to_be_bytes())
}
