use crate::config::Shared;
use crate::error::Error;
use crate::tls::CertificateIssuer;
use axum::Router;
use hyper::server::conn::Http;
use rustls::server::Acceptor;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_io_timeout::TimeoutStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, field, info, warn, Instrument, Span};

/// Delay before accepting again after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

type TimedStream = Pin<Box<TimeoutStream<TcpStream>>>;

/// The plaintext and TLS listeners, serving the same router.
pub struct DualListenerServer {
    router: Router,
    issuer: Arc<CertificateIssuer>,
    timeout: Duration,
    plaintext: TcpListener,
    tls: TcpListener,
    plaintext_addr: SocketAddr,
    tls_addr: SocketAddr,
}

impl DualListenerServer {
    /// Bind `http.bind_addr` and `http.tls_bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if either address can't be bound.
    pub async fn bind(
        config: Shared,
        router: Router,
        issuer: Arc<CertificateIssuer>,
    ) -> Result<Self, Error> {
        let plaintext = bind(config.http.bind_addr).await?;
        let tls = bind(config.http.tls_bind_addr).await?;
        let plaintext_addr = plaintext.local_addr()?;
        let tls_addr = tls.local_addr()?;
        Ok(DualListenerServer {
            router,
            issuer,
            timeout: config.http.request_timeout,
            plaintext,
            tls,
            plaintext_addr,
            tls_addr,
        })
    }

    #[must_use]
    pub fn plaintext_addr(&self) -> SocketAddr {
        self.plaintext_addr
    }

    #[must_use]
    pub fn tls_addr(&self) -> SocketAddr {
        self.tls_addr
    }

    /// Serve both listeners until `shutdown` resolves or either listener stops.
    ///
    /// Whichever happens first, the other listener is told to stop and awaited before this
    /// returns. Stopped listeners accept no new connections. The first listener error, if any,
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] or [`Error::IO`] if a listener fails, and [`Error::Listener`]
    /// if a listener task panics.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        info!(addr = %self.plaintext_addr, "HTTP listening");
        info!(addr = %self.tls_addr, "HTTPS listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        let plaintext = tokio::spawn(serve_plaintext(
            self.plaintext,
            self.router.clone(),
            self.timeout,
            stop_rx.clone(),
        ));
        let tls = tokio::spawn(serve_tls(
            self.tls,
            self.router,
            self.issuer,
            self.timeout,
            stop_rx,
        ));
        supervise(plaintext, tls, shutdown, stop_tx).await
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

enum Exit {
    Shutdown,
    Plaintext(Result<(), Error>),
    Tls(Result<(), Error>),
}

async fn supervise(
    mut plaintext: JoinHandle<Result<(), Error>>,
    mut tls: JoinHandle<Result<(), Error>>,
    shutdown: impl Future<Output = ()>,
    stop: watch::Sender<bool>,
) -> Result<(), Error> {
    tokio::pin!(shutdown);
    let exit = tokio::select! {
        () = &mut shutdown => Exit::Shutdown,
        res = &mut plaintext => Exit::Plaintext(joined(res)),
        res = &mut tls => Exit::Tls(joined(res)),
    };
    stop.send_replace(true);

    match exit {
        Exit::Shutdown => {
            info!("stopping HTTP listeners");
            let plaintext = joined(plaintext.await);
            let tls = joined(tls.await);
            plaintext.and(tls)
        }
        Exit::Plaintext(res) => {
            warn!(ok = res.is_ok(), "HTTP listener stopped, stopping HTTPS listener");
            res.and(joined(tls.await))
        }
        Exit::Tls(res) => {
            warn!(ok = res.is_ok(), "HTTPS listener stopped, stopping HTTP listener");
            res.and(joined(plaintext.await))
        }
    }
}

fn joined(res: Result<Result<(), Error>, JoinError>) -> Result<(), Error> {
    res?
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Wrap an accepted connection so a single read or write that stalls longer than `timeout`
/// fails and drops the connection.
fn with_timeouts(stream: TcpStream, timeout: Duration) -> TimedStream {
    let mut stream = TimeoutStream::new(stream);
    stream.set_read_timeout(Some(timeout));
    stream.set_write_timeout(Some(timeout));
    Box::pin(stream)
}

/// Accept until stopped, handing every connection to its own task.
async fn accept_loop<F, Fut>(
    listener: TcpListener,
    listener_name: &'static str,
    stop: watch::Receiver<bool>,
    mut handle: F,
) -> Result<(), Error>
where
    F: FnMut(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let stopping = stopped(stop);
    tokio::pin!(stopping);

    loop {
        let (stream, remote) = tokio::select! {
            () = &mut stopping => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(listener = listener_name, %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        tokio::spawn(handle(stream, remote));
    }
}

async fn serve_plaintext(
    listener: TcpListener,
    router: Router,
    timeout: Duration,
    stop: watch::Receiver<bool>,
) -> Result<(), Error> {
    accept_loop(listener, "HTTP", stop, move |stream, remote| {
        let router = router.clone();
        async move {
            if let Err(err) = serve_http(with_timeouts(stream, timeout), router, timeout).await {
                debug!(%err, "HTTP connection dropped");
            }
        }
        .instrument(tracing::info_span!("http", %remote))
    })
    .await
}

async fn serve_tls(
    listener: TcpListener,
    router: Router,
    issuer: Arc<CertificateIssuer>,
    timeout: Duration,
    stop: watch::Receiver<bool>,
) -> Result<(), Error> {
    accept_loop(listener, "HTTPS", stop, move |stream, remote| {
        let router = router.clone();
        let issuer = issuer.clone();
        async move {
            let stream = with_timeouts(stream, timeout);
            let stream = match handshake(stream, remote, &issuer, timeout).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%err, "TLS handshake failed");
                    return;
                }
            };
            if let Err(err) = serve_http(stream, router, timeout).await {
                debug!(%err, "TLS connection dropped");
            }
        }
        .instrument(tracing::info_span!("tls", %remote, server_name = field::Empty))
    })
    .await
}

/// Read the ClientHello, let the issuer pick a certificate, and finish the handshake. The
/// requested name is recorded on the current span.
async fn handshake(
    stream: TimedStream,
    remote: SocketAddr,
    issuer: &CertificateIssuer,
    timeout: Duration,
) -> Result<TlsStream<TimedStream>, Error> {
    let start = tokio::time::timeout(timeout, LazyConfigAcceptor::new(Acceptor::default(), stream))
        .await
        .map_err(|_| Error::HandshakeTimeout(remote))??;

    let server_name = start.client_hello().server_name().map(str::to_string);
    if let Some(name) = &server_name {
        Span::current().record("server_name", field::display(name));
    }
    let config = issuer
        .select_certificate(remote, server_name.as_deref())
        .await?
        .unwrap_or_else(|| issuer.default_config());

    let stream = tokio::time::timeout(timeout, start.into_stream(config))
        .await
        .map_err(|_| Error::HandshakeTimeout(remote))??;
    Ok(stream)
}

async fn serve_http<S>(stream: S, router: Router, timeout: Duration) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    Http::new()
        .http1_only(true)
        .http1_header_read_timeout(timeout)
        .serve_connection(stream, router)
        .await?;
    Ok(())
}
