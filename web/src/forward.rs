//! The api-service's view of the data-service.
//!
//! Reads, updates and deletes are not handled by the intake service itself:
//! they are forwarded verbatim to the data-service and its response is relayed
//! back. [`DataService`] is the seam. `marquee-server` implements it over HTTP;
//! [`LocalDataService`] dispatches into an in-process router.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, Method, Request, StatusCode, header};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tower::ServiceExt;

/// Largest response body relayed back to the caller.
pub const MAX_FORWARDED_BODY: usize = 4 * 1024 * 1024;

/// Request headers passed through to the data-service.
const REQUEST_HEADERS: [&str; 4] = [
    "content-type",
    "accept",
    "x-expected-version",
    "x-correlation-id",
];

/// A request to relay.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// HTTP method.
    pub method: Method,
    /// Path plus query string, e.g. `/api/movies?page=2`.
    pub path_and_query: String,
    /// Relayed request headers.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Bytes,
}

impl ForwardRequest {
    /// Build a relay request, keeping only the headers the data-service reads.
    #[must_use]
    pub fn new(method: Method, path_and_query: impl Into<String>, headers: &HeaderMap, body: Bytes) -> Self {
        let mut kept = HeaderMap::new();
        for name in REQUEST_HEADERS {
            if let Some(value) = headers.get(name) {
                kept.insert(HeaderName::from_static(name), value.clone());
            }
        }
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: kept,
            body,
        }
    }
}

/// The data-service's answer.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    /// Status as returned.
    pub status: StatusCode,
    /// Content type, if any.
    pub content_type: Option<axum::http::HeaderValue>,
    /// Raw body.
    pub body: Bytes,
}

/// Relay failures. The data-service's own error statuses are not failures:
/// they are relayed as responses.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The request could not be built.
    #[error("Invalid forward request: {0}")]
    InvalidRequest(String),

    /// The data-service could not be reached.
    #[error("Data service unreachable: {0}")]
    Unreachable(String),

    /// The data-service answered with something unreadable.
    #[error("Invalid response from data service: {0}")]
    InvalidResponse(String),
}

/// Boxed future returned by [`DataService::forward`].
pub type ForwardFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ForwardedResponse, ForwardError>> + Send + 'a>>;

/// Where the api-service sends everything it does not handle itself.
pub trait DataService: Send + Sync {
    /// Relay one request.
    ///
    /// # Errors
    ///
    /// [`ForwardError`] if no response could be obtained.
    fn forward(&self, request: ForwardRequest) -> ForwardFuture<'_>;
}

/// Dispatches forwarded requests into a router in the same process.
#[derive(Clone, Debug)]
pub struct LocalDataService {
    router: Router,
}

impl LocalDataService {
    /// Wrap a data-service router.
    #[must_use]
    pub const fn new(router: Router) -> Self {
        Self { router }
    }
}

impl DataService for LocalDataService {
    fn forward(&self, request: ForwardRequest) -> ForwardFuture<'_> {
        Box::pin(async move {
            let mut builder = Request::builder()
                .method(request.method)
                .uri(request.path_and_query);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            let http_request = builder
                .body(Body::from(request.body))
                .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

            let response = self
                .router
                .clone()
                .oneshot(http_request)
                .await
                .unwrap_or_else(|never| match never {});
            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(body, MAX_FORWARDED_BODY)
                .await
                .map_err(|e| ForwardError::InvalidResponse(e.to_string()))?;

            Ok(ForwardedResponse {
                status: parts.status,
                content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
                body,
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[test]
    fn only_known_headers_are_relayed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("x-expected-version", "2".parse().unwrap());
        headers.insert(header::COOKIE, "session=1".parse().unwrap());

        let request = ForwardRequest::new(Method::PATCH, "/api/movies/1", &headers, Bytes::new());

        assert_eq!(request.headers.len(), 2);
        assert!(request.headers.get(header::COOKIE).is_none());
    }

    #[tokio::test]
    async fn local_service_relays_status_and_body() {
        let router = Router::new().route(
            "/api/ping",
            get(|| async { (StatusCode::IM_A_TEAPOT, "pong") }),
        );
        let service = LocalDataService::new(router);

        let response = service
            .forward(ForwardRequest::new(
                Method::GET,
                "/api/ping",
                &HeaderMap::new(),
                Bytes::new(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
        assert_eq!(response.body, Bytes::from_static(b"pong"));
    }
}
