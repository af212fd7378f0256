use crate::config::Shared;
use crate::content::DynContentStore;
use crate::error::Error;
use crate::http::middleware::{handle_panic, make_span, normalize_proxy_headers};
use axum::extract::State;
use axum::http::header::{self, HeaderMap};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{middleware, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{debug, error, Level};

#[derive(Clone)]
pub(super) struct AppState {
    pub config: Shared,
    pub content: DynContentStore,
}

/// Router shared by the plaintext and TLS listeners.
pub(super) fn new(state: AppState) -> Router {
    let timeout = state.config.http.request_timeout;
    Router::new()
        .fallback(serve_content)
        .layer(middleware::from_fn(normalize_proxy_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

async fn serve_content(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response();
    }

    let host = request_host(&headers, &uri).unwrap_or_default();
    let path = uri.path();
    match state.content.fetch(&host, path).await {
        Ok(Some(content)) => (
            [(header::CONTENT_TYPE, content.content_type)],
            content.body,
        )
            .into_response(),
        Ok(None) => {
            debug!(%host, %path, "no content");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err @ Error::InvalidContentPath { .. }) => {
            debug!(%err, "rejected content path");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            error!(%host, %path, %err, "content lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Lowercased request host without a port, from the `Host` header or an absolute URI.
fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let authority = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(axum::http::uri::Authority::as_str))?;
    let host = if let Some(rest) = authority.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    Some(host.trim_end_matches('.').to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::content::{Content, ContentStore, InMemoryContentStore};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const CONFIG: &str = r#"{
        "http": { "request_timeout": 2 },
        "tls": { "ca_key_path": "ca.key", "ca_cert_path": "ca.pem" }
    }"#;

    struct PanickingStore;

    #[async_trait::async_trait]
    impl ContentStore for PanickingStore {
        async fn fetch(&self, _host: &str, _path: &str) -> Result<Option<Content>, Error> {
            panic!("store exploded");
        }
    }

    struct SlowStore;

    #[async_trait::async_trait]
    impl ContentStore for SlowStore {
        async fn fetch(&self, _host: &str, _path: &str) -> Result<Option<Content>, Error> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    fn router(content: DynContentStore) -> Router {
        let config = Arc::new(Config::try_from_reader(CONFIG.as_bytes()).unwrap());
        new(AppState { config, content })
    }

    fn example_router() -> Router {
        router(Arc::new(
            InMemoryContentStore::default()
                .with("example.com", "/", "text/html", "<h1>hello</h1>")
                .with("api.example.com", "/v1/status", "application/json", r#"{"ok":true}"#),
        ))
    }

    fn get(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    async fn body(response: Response) -> Vec<u8> {
        hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn serves_exact_bytes() {
        let response = example_router()
            .oneshot(get("api.example.com", "/v1/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(body(response).await, br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn unknown_host_or_path_is_not_found() {
        for (host, path) in [("example.com", "/missing"), ("nowhere.test", "/")] {
            let response = example_router().oneshot(get(host, path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{host}{path}");
        }
    }

    #[tokio::test]
    async fn host_is_lowercased_and_port_stripped() {
        let response = example_router()
            .oneshot(get("EXAMPLE.com:8080", "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, b"<h1>hello</h1>");
    }

    #[tokio::test]
    async fn forwarded_host_wins() {
        let request = Request::builder()
            .uri("/v1/status")
            .header(header::HOST, "127.0.0.1:8080")
            .header("x-forwarded-host", "api.example.com")
            .header("x-forwarded-for", "192.168.7.40")
            .body(Body::empty())
            .unwrap();
        let response = example_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn only_get_and_head() {
        let head = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .header(header::HOST, "example.com")
            .body(Body::empty())
            .unwrap();
        let response = example_router().oneshot(head).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::HOST, "example.com")
            .body(Body::from("x"))
            .unwrap();
        let response = example_router().oneshot(post).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn panic_becomes_500() {
        let response = router(Arc::new(PanickingStore))
            .oneshot(get("example.com", "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await, b"Internal Server Error");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let response = router(Arc::new(SlowStore))
            .oneshot(get("example.com", "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn host_forms() {
        let uri = Uri::from_static("/");
        let host = |value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::HOST, value.parse().unwrap());
            request_host(&headers, &uri)
        };
        assert_eq!(host("Apple.COM"), Some("apple.com".to_string()));
        assert_eq!(host("apple.com.:443"), Some("apple.com".to_string()));
        assert_eq!(host("[::1]:80"), Some("::1".to_string()));
        assert_eq!(
            request_host(
                &HeaderMap::new(),
                &Uri::from_static("http://Google.com/x")
            ),
            Some("google.com".to_string())
        );
        assert_eq!(request_host(&HeaderMap::new(), &uri), None);
    }
}
