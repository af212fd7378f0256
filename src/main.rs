use anyhow::{anyhow, Result};
use is_terminal::IsTerminal;
use mitmcrab::error::Error::DNSError;
use mitmcrab::{CertificateAuthority, CertificateIssuer, Config, DualListenerServer, Shared};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("mitmcrab".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    if !config.dns.enabled && !config.http.enabled {
        return Err(anyhow!("both dns and http are disabled, nothing to do"));
    }

    if std::io::stdout().is_terminal() {
        println!("{}", mitmcrab::crab::CRAB);
    }

    let mut dns_handle = if config.dns.enabled {
        tracing::info!("DNS listening on UDP {}", &config.dns.bind_addr);
        let dns_server = mitmcrab::dns::new(config.clone()).await?;
        Some(tokio::spawn(dns_server.block_until_done()))
    } else {
        None
    };

    let (stop_http, http_stopped) = oneshot::channel::<()>();
    let mut http_handle = if config.http.enabled {
        let ca = CertificateAuthority::load(&config.tls.ca_key_path, &config.tls.ca_cert_path)?;
        tracing::info!(
            "loaded CA from {}, certificate mode {:?}",
            config.tls.ca_cert_path.display(),
            config.tls.mode
        );
        let issuer = CertificateIssuer::build_tls_config(Arc::new(ca), &config.tls)?;
        let router = mitmcrab::new_http_router(config.clone(), config.content_store());
        let server = DualListenerServer::bind(config.clone(), router, Arc::new(issuer)).await?;
        Some(tokio::spawn(server.serve(async move {
            // A dropped sender also means stop.
            let _ = http_stopped.await;
        })))
    } else {
        None
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        dns_res = finished(dns_handle.as_mut()) => {
            dns_res?.map_err(DNSError)?;
            return Err(anyhow!("DNS server stopped"));
        }
        http_res = finished(http_handle.as_mut()) => {
            http_res??;
            return Err(anyhow!("HTTP listeners stopped"));
        }
    }

    let _ = stop_http.send(());
    if let Some(http_handle) = http_handle {
        http_handle.await??;
    }
    tracing::info!("goodbye");
    Ok(())
}

/// Wait for a spawned server, or forever if it was never started.
async fn finished<T>(handle: Option<&mut JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mitmcrab=info,tower_http=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<Shared> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            let config = Config::try_from_file(&config_file)?;
            tracing::debug!("loaded config from {config_file}");
            Ok(Arc::new(config))
        }
    }
}
