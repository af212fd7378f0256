use crate::config::Shared;
use crate::dns::handlers::Handler;
use crate::error::Error;
use tokio::net::UdpSocket;
use trust_dns_server::ServerFuture;

/// Bind the configured UDP address and build the DNS server around it.
///
/// # Errors
///
/// Returns [`Error::Bind`] if the UDP socket can't be bound.
pub async fn new(config: Shared) -> Result<ServerFuture<Handler>, Error> {
    let udp_addr = config.dns.bind_addr;
    let socket = UdpSocket::bind(udp_addr)
        .await
        .map_err(|source| Error::Bind {
            addr: udp_addr,
            source,
        })?;
    Ok(with_socket(&config, socket))
}

/// Build the DNS server around an already bound UDP socket.
#[must_use]
pub fn with_socket(config: &Shared, socket: UdpSocket) -> ServerFuture<Handler> {
    let mut dns_server = ServerFuture::new(Handler::new(config));
    dns_server.register_socket(socket);
    dns_server
}
