use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::net::IpAddr;
use tracing::{error, Span};

const FORWARDED: &str = "forwarded";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_REAL_IP: &str = "x-real-ip";

/// Span for access logging. `host`, `client` and `scheme` are filled in by
/// [`normalize_proxy_headers`].
pub(super) fn make_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        host = tracing::field::Empty,
        client = tracing::field::Empty,
        scheme = tracing::field::Empty,
    )
}

/// Honour reverse proxy headers: `X-Forwarded-Host` (or `Forwarded: host=`) replaces the
/// `Host` header, and the forwarded client address and scheme are recorded on the request
/// span.
pub(super) async fn normalize_proxy_headers<B>(
    mut request: Request<B>,
    next: Next<B>,
) -> Response {
    let forwarded = Forwarded::from_headers(request.headers());
    let span = Span::current();

    if let Some(host) = forwarded.host {
        if let Ok(value) = HeaderValue::from_str(&host) {
            request.headers_mut().insert(header::HOST, value);
        }
    }
    if let Some(host) = request.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
        span.record("host", host);
    }
    if let Some(client) = forwarded.client {
        span.record("client", tracing::field::display(client));
    }
    if let Some(scheme) = forwarded.scheme {
        span.record("scheme", scheme.as_str());
    }

    next.run(request).await
}

/// Turn a handler panic into a 500 response.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %details, "request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Forwarded {
    host: Option<String>,
    client: Option<IpAddr>,
    scheme: Option<String>,
}

impl Forwarded {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut forwarded = Forwarded::default();

        // RFC 7239 first, then the de facto X- headers override it.
        if let Some(value) = header_str(headers, FORWARDED) {
            let first = value.split(',').next().unwrap_or_default();
            for pair in first.split(';') {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                let value = value.trim().trim_matches('"');
                match key.trim().to_ascii_lowercase().as_str() {
                    "host" => forwarded.host = Some(value.to_string()),
                    "proto" => forwarded.scheme = Some(value.to_ascii_lowercase()),
                    "for" => forwarded.client = parse_ip(value),
                    _ => {}
                }
            }
        }

        if let Some(host) = first_value(headers, X_FORWARDED_HOST) {
            forwarded.host = Some(host.to_string());
        }
        if let Some(scheme) = first_value(headers, X_FORWARDED_PROTO) {
            forwarded.scheme = Some(scheme.to_ascii_lowercase());
        }
        if let Some(client) = first_value(headers, X_FORWARDED_FOR)
            .or_else(|| first_value(headers, X_REAL_IP))
            .and_then(parse_ip)
        {
            forwarded.client = Some(client);
        }
        forwarded
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    header_str(headers, name)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Accepts `1.2.3.4`, `1.2.3.4:5678`, `[::1]` and `[::1]:5678`.
fn parse_ip(value: &str) -> Option<IpAddr> {
    if let Ok(ip) = value.parse() {
        return Some(ip);
    }
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next().and_then(|ip| ip.parse().ok());
    }
    value
        .rsplit_once(':')
        .and_then(|(ip, _port)| ip.parse().ok())
}
