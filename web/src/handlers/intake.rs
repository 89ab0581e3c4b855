//! The api-service: create intake and relay.
//!
//! Creates are validated against the current clock, published through the
//! producer gateway and acknowledged with `202 Accepted` and the correlation
//! identity the caller can later poll. Nothing is written to storage here.

use crate::error::AppError;
use crate::extractors::RequestCorrelation;
use crate::forward::{ForwardError, ForwardRequest};
use crate::state::ApiState;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use marquee_core::intent::IntentPayload;
use marquee_core::validator::ValidationContext;
use serde_json::json;

/// `POST /api/movies`, `POST /api/reviews`
pub async fn create<T: IntentPayload>(
    State(state): State<ApiState>,
    RequestCorrelation(correlation_id): RequestCorrelation,
    body: Result<Json<T>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let Json(draft) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    draft
        .validated(&ValidationContext::from_clock(state.clock.as_ref()))
        .map_err(AppError::validation)?;

    let correlation_id = state.gateway.publish(correlation_id, draft).await?;
    tracing::info!(kind = %T::KIND, %correlation_id, "Intent accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "correlation_id": correlation_id,
        })),
    ))
}

/// Everything else under `/api/` goes to the data-service unchanged.
pub async fn forward(
    State(state): State<ApiState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if !uri.path().starts_with("/api/") {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("no route for {}", uri.path()),
            "NOT_FOUND",
        ));
    }
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_owned(), ToString::to_string);

    let relayed = state
        .data
        .forward(ForwardRequest::new(method, path_and_query, &headers, body))
        .await
        .map_err(|err| match err {
            ForwardError::Unreachable(_) => {
                AppError::unavailable("data service unavailable").with_source(err)
            }
            ForwardError::InvalidRequest(_) => AppError::bad_request(err.to_string()),
            ForwardError::InvalidResponse(_) => {
                AppError::bad_gateway("invalid response from data service").with_source(err)
            }
        })?;

    let mut response = Response::new(Body::from(relayed.body));
    *response.status_mut() = relayed.status;
    if let Some(content_type) = relayed.content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response.into_response())
}
