//! The HTTP relay against a live local listener.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::get;
use marquee_server::HttpDataService;
use marquee_web::forward::{DataService, ForwardError, ForwardRequest};
use std::time::Duration;
use tokio::net::TcpListener;

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn relays_method_path_headers_and_status() {
    let router = Router::new().route(
        "/api/movies/:id",
        get(|headers: HeaderMap| async move {
            let version = headers
                .get("x-expected-version")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            (
                StatusCode::IM_A_TEAPOT,
                [("content-type", "application/json")],
                format!("{{\"version\":\"{version}\"}}"),
            )
        }),
    );
    let base = serve(router).await;
    let service = HttpDataService::new(&format!("{base}/"), Duration::from_secs(5)).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("x-expected-version", "3".parse().unwrap());
    let response = service
        .forward(ForwardRequest::new(
            Method::GET,
            "/api/movies/1?x=y",
            &headers,
            Bytes::new(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
    assert_eq!(response.content_type.unwrap(), "application/json");
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["version"], "3");
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = HttpDataService::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let err = service
        .forward(ForwardRequest::new(
            Method::GET,
            "/api/movies",
            &HeaderMap::new(),
            Bytes::new(),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::Unreachable(_)), "got {err:?}");
}
