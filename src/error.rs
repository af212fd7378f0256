//! Error types.

use std::net::SocketAddr;
use trust_dns_server::client::rr::LowerName;
use trust_dns_server::proto::error::ProtoError;

/// Error enumerates the possible MITM Crab error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the CA private key or certificate can't be read or parsed, or when the
    /// private key doesn't belong to the certificate. Always fatal at startup: no listener is
    /// bound without CA material.
    #[error("unable to load CA material: {0}")]
    CALoad(String),

    /// Returned when a leaf certificate can't be generated or signed by the
    /// [`CertificateAuthority`][crate::tls::CertificateAuthority].
    #[error("certificate issuance failed: {0}")]
    Certificate(#[from] rcgen::Error),

    /// Returned when a subject or a PEM bundle doesn't describe a usable leaf certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Returned when rustls rejects an issued certificate while building a TLS server config.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// Returned when a TLS client doesn't complete its handshake within the request timeout.
    #[error("TLS handshake with {0} timed out")]
    HandshakeTimeout(SocketAddr),

    /// Returned when a record name in [`DnsConfig::records`][crate::config::DnsConfig::records]
    /// is not fully qualified (it must end with a `.`).
    #[error("record name is not a fully qualified name: \"{0}\"")]
    NotFQDN(LowerName),

    /// Returned when a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when a request host or path would resolve outside the content root. Served to
    /// clients as a 404, the same as missing content.
    #[error("invalid content path: host \"{host}\", path \"{path}\"")]
    InvalidContentPath { host: String, path: String },

    /// Returned when a listener can't be bound.
    #[error("unable to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when loading the [`Config`][crate::config::Config] fails due to invalid JSON.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when the DNS server encounters a generic DNS protocol error.
    #[error("DNS error")]
    DNSError(#[from] ProtoError),

    /// Returned when the plaintext or TLS HTTP listener fails.
    #[error("HTTP error")]
    Http(#[from] hyper::Error),

    /// Returned when a listener task panics or is cancelled.
    #[error("listener task failed")]
    Listener(#[from] tokio::task::JoinError),
}
