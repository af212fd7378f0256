use crate::error::Error;
use rcgen::{KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::fmt;
use std::net::IpAddr;
use time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::X509Certificate;

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// One subject alternative name of a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubjectName {
    Dns(String),
    Ip(IpAddr),
}

impl SubjectName {
    /// Split a comma separated subject into names. Tokens that parse as IP literals become IP
    /// names, everything else is a DNS name (wildcards included).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCertificate`] if the subject holds no names.
    pub fn parse_list(subject: &str) -> Result<Vec<SubjectName>, Error> {
        let names: Vec<SubjectName> = subject
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| match token.parse::<IpAddr>() {
                Ok(ip) => SubjectName::Ip(ip),
                Err(_) => SubjectName::Dns(token.to_string()),
            })
            .collect();
        if names.is_empty() {
            return Err(Error::InvalidCertificate(format!(
                "no subject names in \"{subject}\""
            )));
        }
        Ok(names)
    }

    pub(super) fn to_san(&self) -> Result<SanType, Error> {
        Ok(match self {
            SubjectName::Dns(name) => SanType::DnsName(name.clone().try_into()?),
            SubjectName::Ip(ip) => SanType::IpAddress(*ip),
        })
    }
}

impl fmt::Display for SubjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectName::Dns(name) => write!(f, "{name}"),
            SubjectName::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// A leaf certificate signed by the [`CertificateAuthority`][super::CertificateAuthority],
/// together with its freshly generated private key.
#[derive(Debug)]
pub struct IssuedCertificate {
    pub subject_names: Vec<SubjectName>,
    /// Big-endian serial number without leading zero bytes.
    pub serial: Vec<u8>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivatePkcs8KeyDer<'static>,
}

impl Clone for IssuedCertificate {
    fn clone(&self) -> Self {
        IssuedCertificate {
            subject_names: self.subject_names.clone(),
            serial: self.serial.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            cert_der: self.cert_der.clone(),
            key_der: self.key_der.clone_key(),
        }
    }
}

impl IssuedCertificate {
    #[must_use]
    pub fn cert_pem(&self) -> String {
        pem::encode(&pem::Pem::new(CERTIFICATE_TAG, self.cert_der.to_vec()))
    }

    #[must_use]
    pub fn key_pem(&self) -> String {
        pem::encode(&pem::Pem::new(
            PRIVATE_KEY_TAG,
            self.key_der.secret_pkcs8_der().to_vec(),
        ))
    }

    /// Reload a bundle previously written with [`IssuedCertificate::cert_pem`] and
    /// [`IssuedCertificate::key_pem`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCertificate`] if either PEM is malformed, the key isn't a usable
    /// PKCS#8 key, or the key doesn't belong to the certificate.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, Error> {
        let cert_der = decode_pem(cert_pem, CERTIFICATE_TAG)?;
        let key_der = decode_pem(key_pem, PRIVATE_KEY_TAG)?;

        let key = KeyPair::try_from(key_der.as_slice())
            .map_err(|err| Error::InvalidCertificate(format!("unusable private key: {err}")))?;
        let (_, cert) = x509_parser::parse_x509_certificate(&cert_der)
            .map_err(|err| Error::InvalidCertificate(format!("unparsable certificate: {err}")))?;
        if !keys_match(&cert, &key) {
            return Err(Error::InvalidCertificate(
                "private key does not match certificate".to_string(),
            ));
        }

        let issued = IssuedCertificate {
            subject_names: subject_names(&cert)?,
            serial: trim_serial(cert.raw_serial()),
            not_before: cert.validity().not_before.to_datetime(),
            not_after: cert.validity().not_after.to_datetime(),
            cert_der: CertificateDer::from(cert_der.clone()),
            key_der: PrivatePkcs8KeyDer::from(key_der),
        };
        Ok(issued)
    }
}

pub(super) fn keys_match(cert: &X509Certificate<'_>, key: &KeyPair) -> bool {
    cert.public_key().subject_public_key.data.as_ref() == key.public_key_raw()
}

pub(super) fn trim_serial(serial: &[u8]) -> Vec<u8> {
    let start = serial
        .iter()
        .position(|byte| *byte != 0)
        .unwrap_or(serial.len().saturating_sub(1));
    serial[start..].to_vec()
}

fn decode_pem(input: &str, tag: &str) -> Result<Vec<u8>, Error> {
    let block = pem::parse(input)
        .map_err(|err| Error::InvalidCertificate(format!("invalid PEM: {err}")))?;
    if block.tag() != tag {
        return Err(Error::InvalidCertificate(format!(
            "expected a {tag} PEM block, found {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

fn subject_names(cert: &X509Certificate<'_>) -> Result<Vec<SubjectName>, Error> {
    let san = cert
        .subject_alternative_name()
        .map_err(|err| Error::InvalidCertificate(format!("bad subject alt names: {err}")))?;
    let Some(san) = san else {
        return Ok(Vec::new());
    };
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(Ok(SubjectName::Dns((*dns).to_string()))),
            GeneralName::IPAddress(bytes) => Some(ip_from_bytes(bytes).map(SubjectName::Ip)),
            _ => None,
        })
        .collect()
}

fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr, Error> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::from(octets));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::from(octets));
    }
    Err(Error::InvalidCertificate(format!(
        "IP subject name has {} bytes",
        bytes.len()
    )))
}
