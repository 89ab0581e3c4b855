//! Health and metrics endpoints.

use crate::state::DataState;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use marquee_runtime::metrics::MetricsRecorder;
use serde_json::json;

/// Liveness of the api-service.
///
/// ```text
/// GET /health -> 200 {"status":"available"}
/// ```
#[allow(clippy::unused_async)]
pub async fn liveness() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "available" })))
}

/// Readiness of the data-service.
///
/// 200 when the configured probe passes (or none is configured),
/// 503 with the probe's message otherwise.
pub async fn readiness(State(state): State<DataState>) -> (StatusCode, Json<serde_json::Value>) {
    let Some(probe) = state.readiness.as_ref() else {
        return liveness().await;
    };
    match probe.check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "available" }))),
        Err(reason) => {
            tracing::warn!(%reason, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "reason": reason })),
            )
        }
    }
}

/// Prometheus exposition, or 404 when no recorder is installed.
#[allow(clippy::unused_async)]
pub async fn metrics(State(recorder): State<Option<MetricsRecorder>>) -> Response {
    match recorder {
        Some(recorder) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            recorder.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let (status, Json(body)) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "available");
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_is_not_found() {
        let response = metrics(State(None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
