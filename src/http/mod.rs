//! Plaintext and TLS HTTP listeners serving canned per-host content.
//!
//! Both listeners share one router. Every request, on any host and any path, is answered from
//! the [`ContentStore`][crate::content::ContentStore] using the lowercased `Host` (without
//! port) and the request path:
//!
//! * `200 OK` with the stored bytes and their `Content-Type` when the store has content.
//! * `404 Not Found` when it doesn't.
//! * `405 Method Not Allowed` for anything other than `GET` and `HEAD`.
//! * `408 Request Timeout` when the request takes longer than
//!   [`HttpConfig::request_timeout`][crate::config::HttpConfig::request_timeout].
//! * `500 Internal Server Error` when the handler panics. The panic is logged and the listener
//!   keeps serving.
//!
//! When MITM Crab sits behind a reverse proxy, `X-Forwarded-Host` (or the `host` parameter of
//! `Forwarded`) is used as the request host, and the forwarded client address and scheme end up
//! in the access log.
//!
//! E.g. with `data/example.com/index.html` on disk and DNS pointing `example.com` at MITM Crab:
//!
//! ```bash
//! ❯ curl http://example.com/index.html
//! <h1>not the real example</h1>
//! ❯ curl --cacert http/ca.pem https://example.com/index.html
//! <h1>not the real example</h1>
//! ❯ curl -s -o /dev/null -w '%{http_code}\n' http://example.com/missing
//! 404
//! ```
//!
//! The TLS listener's certificate selection is described in [`crate::tls`].
//!
//! # Lifecycle
//!
//! [`DualListenerServer::serve`] runs both listeners until the caller's shutdown future
//! resolves or one of the listeners stops. In either case the other listener is stopped too,
//! so the process never keeps serving on just one of them.

mod middleware;
mod routes;
pub mod server;

use crate::config::Shared;
use crate::content::DynContentStore;
use axum::Router;

pub use server::DualListenerServer;

/// Build the router served by both listeners.
#[must_use]
pub fn router(config: Shared, content: DynContentStore) -> Router {
    routes::new(routes::AppState { config, content })
}
