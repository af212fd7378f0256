use crate::config::{CertificateMode, TlsConfig};
use crate::error::Error;
use crate::tls::authority::CertificateAuthority;
use crate::tls::certificate::IssuedCertificate;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::PrivateKeyDer;
use rustls::ServerConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Subject of the certificate served when no per-host certificate is selected.
pub const WILDCARD_SUBJECT: &str = "*";

/// Per-host certificates kept by [`CertificateIssuer::new`].
pub const DEFAULT_MAX_CACHED_HOSTS: usize = 1024;

type HostCell = Arc<OnceCell<Arc<ServerConfig>>>;

/// Owns the TLS server configuration of the HTTPS listener and picks the configuration used
/// for each handshake.
pub struct CertificateIssuer {
    ca: Arc<CertificateAuthority>,
    mode: CertificateMode,
    include_ca_in_chain: bool,
    provider: Arc<CryptoProvider>,
    wildcard: IssuedCertificate,
    default_config: Arc<ServerConfig>,
    per_host: Mutex<HashMap<String, HostCell>>,
    max_cached_hosts: usize,
}

impl CertificateIssuer {
    /// Issue the wildcard certificate and build the default server configuration around it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] or [`Error::InvalidCertificate`] if the wildcard
    /// certificate can't be issued, and [`Error::Tls`] if rustls rejects it.
    pub fn build_tls_config(
        ca: Arc<CertificateAuthority>,
        config: &TlsConfig,
    ) -> Result<Self, Error> {
        Ok(Self::new(ca, config.mode, config.include_ca_in_chain)?
            .with_max_cached_hosts(config.max_cached_hosts))
    }

    /// See [`CertificateIssuer::build_tls_config`].
    ///
    /// # Errors
    ///
    /// See [`CertificateIssuer::build_tls_config`].
    pub fn new(
        ca: Arc<CertificateAuthority>,
        mode: CertificateMode,
        include_ca_in_chain: bool,
    ) -> Result<Self, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let wildcard = ca.issue(WILDCARD_SUBJECT)?;
        let default_config = server_config(&provider, &ca, &wildcard, include_ca_in_chain)?;
        Ok(CertificateIssuer {
            ca,
            mode,
            include_ca_in_chain,
            provider,
            wildcard,
            default_config,
            per_host: Mutex::new(HashMap::new()),
            max_cached_hosts: DEFAULT_MAX_CACHED_HOSTS,
        })
    }

    /// Cap the number of names with a per-host certificate. Once full, handshakes for new
    /// names are served the wildcard certificate and nothing is evicted.
    #[must_use]
    pub fn with_max_cached_hosts(mut self, max_cached_hosts: usize) -> Self {
        self.max_cached_hosts = max_cached_hosts;
        self
    }

    #[must_use]
    pub fn mode(&self) -> CertificateMode {
        self.mode
    }

    /// The certificate every handshake gets unless a per-host one is selected.
    #[must_use]
    pub fn wildcard(&self) -> &IssuedCertificate {
        &self.wildcard
    }

    #[must_use]
    pub fn default_config(&self) -> Arc<ServerConfig> {
        self.default_config.clone()
    }

    /// Handshake hook, run once per TLS connection after the ClientHello is read and before
    /// the handshake completes. `None` means "use [`CertificateIssuer::default_config`]".
    ///
    /// In [`CertificateMode::Wildcard`] this only observes the handshake. In
    /// [`CertificateMode::PerHost`] it returns a configuration whose certificate names the
    /// requested server, issuing it on first use. Concurrent handshakes for the same name share
    /// a single issuance. Once [`CertificateIssuer::with_max_cached_hosts`] names are cached,
    /// new names get `None`.
    ///
    /// # Errors
    ///
    /// Returns an issuance error if a per-host certificate can't be minted. Only the
    /// connection that triggered the issuance is affected; the next handshake for the same
    /// name tries again.
    pub async fn select_certificate(
        &self,
        remote: SocketAddr,
        server_name: Option<&str>,
    ) -> Result<Option<Arc<ServerConfig>>, Error> {
        info!(%remote, server_name = server_name.unwrap_or_default(), "TLS connection");

        let Some(server_name) = server_name else {
            return Ok(None);
        };
        match self.mode {
            CertificateMode::Wildcard => Ok(None),
            CertificateMode::PerHost => self.per_host_config(server_name).await,
        }
    }

    /// Names with a cached per-host certificate.
    #[must_use]
    pub fn cached_hosts(&self) -> Vec<String> {
        let per_host = self.per_host.lock().unwrap_or_else(PoisonError::into_inner);
        per_host
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(host, _)| host.clone())
            .collect()
    }

    async fn per_host_config(
        &self,
        server_name: &str,
    ) -> Result<Option<Arc<ServerConfig>>, Error> {
        let host = server_name.to_lowercase();
        let cell = {
            let mut per_host = self.per_host.lock().unwrap_or_else(PoisonError::into_inner);
            if !per_host.contains_key(&host) && per_host.len() >= self.max_cached_hosts {
                warn!(
                    %host,
                    limit = self.max_cached_hosts,
                    "per-host certificate cache full, serving wildcard"
                );
                return Ok(None);
            }
            per_host.entry(host.clone()).or_default().clone()
        };
        let config = cell
            .get_or_try_init(|| async {
                let issued = self.ca.issue(&host)?;
                info!(%host, "issued per-host certificate");
                server_config(&self.provider, &self.ca, &issued, self.include_ca_in_chain)
            })
            .await?;
        Ok(Some(config.clone()))
    }
}

fn server_config(
    provider: &Arc<CryptoProvider>,
    ca: &CertificateAuthority,
    issued: &IssuedCertificate,
    include_ca_in_chain: bool,
) -> Result<Arc<ServerConfig>, Error> {
    let mut chain = vec![issued.cert_der.clone()];
    if include_ca_in_chain {
        chain.push(ca.certificate_der().clone());
    }
    let mut config = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, PrivateKeyDer::Pkcs8(issued.key_der.clone_key()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::certificate::SubjectName;
    use crate::tls::testing::test_ca;

    fn remote() -> SocketAddr {
        SocketAddr::from(([192, 168, 7, 40], 51_234))
    }

    fn issuer(mode: CertificateMode) -> Arc<CertificateIssuer> {
        let (ca, _) = test_ca();
        Arc::new(CertificateIssuer::new(Arc::new(ca), mode, false).unwrap())
    }

    #[test]
    fn wildcard_issued_up_front() {
        let issuer = issuer(CertificateMode::Wildcard);
        assert_eq!(
            issuer.wildcard().subject_names,
            vec![SubjectName::Dns("*".to_string())]
        );
        assert_eq!(
            issuer.default_config().alpn_protocols,
            vec![b"http/1.1".to_vec()]
        );
    }

    #[tokio::test]
    async fn wildcard_mode_only_observes() {
        let issuer = issuer(CertificateMode::Wildcard);
        for name in [Some("api.example.com"), Some("google.com"), None] {
            let selected = issuer.select_certificate(remote(), name).await.unwrap();
            assert!(selected.is_none());
        }
        assert!(issuer.cached_hosts().is_empty());
    }

    #[tokio::test]
    async fn per_host_mode_without_sni_falls_back() {
        let issuer = issuer(CertificateMode::PerHost);
        let selected = issuer.select_certificate(remote(), None).await.unwrap();
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn per_host_mode_caches_by_lowercased_name() {
        let issuer = issuer(CertificateMode::PerHost);
        let first = issuer
            .select_certificate(remote(), Some("API.example.com"))
            .await
            .unwrap()
            .unwrap();
        let second = issuer
            .select_certificate(remote(), Some("api.example.com"))
            .await
            .unwrap()
            .unwrap();
        let other = issuer
            .select_certificate(remote(), Some("apple.com"))
            .await
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(!Arc::ptr_eq(&first, &issuer.default_config()));
        let mut hosts = issuer.cached_hosts();
        hosts.sort();
        assert_eq!(hosts, vec!["api.example.com", "apple.com"]);
    }

    #[tokio::test]
    async fn full_cache_serves_wildcard_to_new_names() {
        let (ca, _) = test_ca();
        let issuer = CertificateIssuer::new(Arc::new(ca), CertificateMode::PerHost, false)
            .unwrap()
            .with_max_cached_hosts(2);
        for name in ["apple.com", "google.com"] {
            let selected = issuer.select_certificate(remote(), Some(name)).await.unwrap();
            assert!(selected.is_some(), "{name}");
        }

        let overflow = issuer
            .select_certificate(remote(), Some("icloud.com"))
            .await
            .unwrap();
        assert!(overflow.is_none());

        let cached = issuer
            .select_certificate(remote(), Some("Apple.com"))
            .await
            .unwrap();
        assert!(cached.is_some());
        let mut hosts = issuer.cached_hosts();
        hosts.sort();
        assert_eq!(hosts, vec!["apple.com", "google.com"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_host_mode_issues_once_under_concurrency() {
        let issuer = issuer(CertificateMode::PerHost);
        let handshakes: Vec<_> = (0..32)
            .map(|_| {
                let issuer = issuer.clone();
                tokio::spawn(async move {
                    issuer
                        .select_certificate(remote(), Some("resident-api.luxerone.com"))
                        .await
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();

        let mut configs = Vec::new();
        for handshake in handshakes {
            configs.push(handshake.await.unwrap());
        }
        assert!(configs.iter().all(|config| Arc::ptr_eq(config, &configs[0])));
        assert_eq!(issuer.cached_hosts(), vec!["resident-api.luxerone.com"]);
    }
}
