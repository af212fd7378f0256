use crate::content::{DynContentStore, FileContentStore};
use crate::error::Error;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use trust_dns_server::client::rr::LowerName;

pub type Shared = Arc<Config>;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub tls: TlsConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DnsConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "default_dns_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Exact-match A records, keyed by fully qualified name.
    #[serde(default)]
    pub records: HashMap<LowerName, Ipv4Addr>,
    /// Answer for any unmatched name containing `ntp`.
    #[serde(default)]
    pub ntp: Option<Ipv4Addr>,
    /// Answer for any name nothing else matched.
    #[serde(default)]
    pub wildcard: Option<Ipv4Addr>,
    #[serde(default)]
    pub keyword_fallbacks: Vec<KeywordFallback>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeywordFallback {
    pub keyword: String,
    pub address: Ipv4Addr,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct HttpConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_tls_bind_addr")]
    pub tls_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TlsConfig {
    pub ca_key_path: PathBuf,
    pub ca_cert_path: PathBuf,
    #[serde(default)]
    pub mode: CertificateMode,
    /// Append the CA certificate to every served chain.
    #[serde(default)]
    pub include_ca_in_chain: bool,
    /// Most server names with a cached certificate in `per_host` mode. Names past the limit
    /// get the wildcard certificate.
    #[serde(default = "default_max_cached_hosts")]
    pub max_cached_hosts: usize,
}

/// How the TLS listener picks the certificate it presents.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateMode {
    /// One certificate for `*`, issued at startup and served for every handshake.
    #[default]
    Wildcard,
    /// A certificate per requested server name, issued on first use and cached.
    PerHost,
}

fn enabled() -> bool {
    true
}

fn default_dns_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 53))
}

fn default_http_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_tls_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_cached_hosts() -> usize {
    1024
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            enabled: true,
            bind_addr: default_dns_bind_addr(),
            records: HashMap::default(),
            ntp: None,
            wildcard: None,
            keyword_fallbacks: Vec::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            enabled: true,
            bind_addr: default_http_bind_addr(),
            tls_bind_addr: default_tls_bind_addr(),
            request_timeout: default_request_timeout(),
            content_dir: default_content_dir(),
        }
    }
}

impl Config {
    /// Load and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IO`] if the file can't be read, [`Error::InvalidJSON`] if it isn't a
    /// valid config document, and [`Error::NotFQDN`] or [`Error::InvalidConfig`] if
    /// validation fails.
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        Self::try_from_reader(BufReader::new(f))
    }

    /// Load and validate a JSON config document from any reader.
    ///
    /// # Errors
    ///
    /// See [`Config::try_from_file`].
    pub fn try_from_reader(reader: impl Read) -> Result<Self, Error> {
        let conf: Config = serde_json::from_reader(reader)?;
        conf.validate()?;
        Ok(conf)
    }

    /// The content store backing the host router, rooted at
    /// [`HttpConfig::content_dir`].
    #[must_use]
    pub fn content_store(&self) -> DynContentStore {
        Arc::new(FileContentStore::new(&self.http.content_dir))
    }

    fn validate(&self) -> Result<(), Error> {
        if let Some(name) = self.dns.records.keys().find(|name| !name.is_fqdn()) {
            return Err(Error::NotFQDN(name.clone()));
        }
        if self
            .dns
            .keyword_fallbacks
            .iter()
            .any(|fallback| fallback.keyword.trim().is_empty())
        {
            return Err(Error::InvalidConfig(
                "keyword fallbacks need a non-empty keyword".to_string(),
            ));
        }
        if self.http.request_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "http.request_timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const MINIMAL: &str = r#"{ "tls": { "ca_key_path": "ca.key", "ca_cert_path": "ca.pem" } }"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::try_from_reader(MINIMAL.as_bytes()).unwrap();

        assert!(config.dns.enabled);
        assert_eq!(config.dns.bind_addr, SocketAddr::from(([0, 0, 0, 0], 53)));
        assert!(config.dns.records.is_empty());
        assert_eq!(config.dns.wildcard, None);
        assert_eq!(config.http.bind_addr.port(), 80);
        assert_eq!(config.http.tls_bind_addr.port(), 443);
        assert_eq!(config.http.request_timeout, Duration::from_secs(15));
        assert_eq!(config.http.content_dir, PathBuf::from("data"));
        assert_eq!(config.tls.mode, CertificateMode::Wildcard);
        assert!(!config.tls.include_ca_in_chain);
        assert_eq!(config.tls.max_cached_hosts, 1024);
    }

    #[test]
    fn full_config() {
        let json = r#"{
            "dns": {
                "bind_addr": "127.0.0.1:5353",
                "records": { "Google.com.": "1.2.3.4", "pool.ntp.org.": "192.168.2.1" },
                "ntp": "10.0.0.5",
                "wildcard": "9.9.9.9",
                "keyword_fallbacks": [ { "keyword": "time", "address": "10.0.0.6" } ]
            },
            "http": { "enabled": false, "request_timeout": 3, "content_dir": "/srv/mitm" },
            "tls": {
                "ca_key_path": "http/ca.key",
                "ca_cert_path": "http/ca.pem",
                "mode": "per_host",
                "include_ca_in_chain": true,
                "max_cached_hosts": 16
            }
        }"#;
        let config = Config::try_from_reader(json.as_bytes()).unwrap();

        let google = LowerName::from_str("google.com.").unwrap();
        assert_eq!(
            config.dns.records.get(&google),
            Some(&Ipv4Addr::new(1, 2, 3, 4))
        );
        assert_eq!(config.dns.ntp, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            config.dns.keyword_fallbacks,
            vec![KeywordFallback {
                keyword: "time".to_string(),
                address: Ipv4Addr::new(10, 0, 0, 6),
            }]
        );
        assert!(!config.http.enabled);
        assert_eq!(config.http.request_timeout, Duration::from_secs(3));
        assert_eq!(config.tls.mode, CertificateMode::PerHost);
        assert!(config.tls.include_ca_in_chain);
        assert_eq!(config.tls.max_cached_hosts, 16);
    }

    #[test]
    fn rejects_relative_record_names() {
        let json = r#"{
            "dns": { "records": { "google.com": "1.2.3.4" } },
            "tls": { "ca_key_path": "ca.key", "ca_cert_path": "ca.pem" }
        }"#;
        let err = Config::try_from_reader(json.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::NotFQDN(_)));
    }

    #[test]
    fn rejects_empty_keyword() {
        let json = r#"{
            "dns": { "keyword_fallbacks": [ { "keyword": " ", "address": "1.1.1.1" } ] },
            "tls": { "ca_key_path": "ca.key", "ca_cert_path": "ca.pem" }
        }"#;
        let err = Config::try_from_reader(json.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn requires_ca_paths() {
        let err = Config::try_from_reader("{}".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidJSON(_)));
    }
}
