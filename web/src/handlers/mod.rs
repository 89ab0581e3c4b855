//! HTTP handlers.
//!
//! - [`intake`]: api-service create endpoints and the data-service relay
//! - [`entities`]: data-service reads, updates and deletes, generic over
//!   [`entities::Resource`]
//! - [`reports`]: data-service aggregate reports
//! - [`health`]: liveness/readiness and metrics

pub mod entities;
pub mod health;
pub mod intake;
pub mod reports;

use crate::error::AppError;
use axum::Json;
use marquee_core::correlation::CorrelationId;
use marquee_core::validator::Validator;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Parse a positive numeric identity from a path segment.
pub(crate) fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::bad_request("invalid id"))
}

/// Parse a correlation identity from a path segment.
pub(crate) fn parse_correlation(raw: &str) -> Result<CorrelationId, AppError> {
    raw.parse::<CorrelationId>()
        .map_err(|_| AppError::bad_request("invalid correlation_id"))
}

/// Parse an optional query parameter, recording `message` against `field`
/// when the raw value does not parse.
pub(crate) fn parse_param<T: FromStr>(
    v: &mut Validator,
    field: &str,
    raw: Option<&str>,
    message: &str,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;
    let parsed = raw.parse().ok();
    v.check(parsed.is_some(), field, message);
    parsed
}

/// Wrap `value` as `{ key: value }`.
pub(crate) fn envelope(key: &str, value: impl Serialize) -> Result<Json<Value>, AppError> {
    let value = serde_json::to_value(value)
        .map_err(|e| AppError::internal("failed to encode response").with_source(e))?;
    let mut body = Map::new();
    body.insert(key.to_owned(), value);
    Ok(Json(Value::Object(body)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(parse_id("0").is_err());
        assert!(parse_id("-3").is_err());
        assert!(parse_id("abc").is_err());
    }

    #[test]
    fn params_record_parse_failures() {
        let mut v = Validator::new();
        assert_eq!(parse_param::<u32>(&mut v, "page", Some("3"), "bad"), Some(3));
        assert_eq!(parse_param::<u32>(&mut v, "page", None, "bad"), None);
        assert_eq!(parse_param::<u32>(&mut v, "page", Some(" "), "bad"), None);
        assert!(v.is_valid());

        assert_eq!(parse_param::<u32>(&mut v, "page", Some("two"), "must be an integer value"), None);
        assert_eq!(v.errors().get("page"), Some("must be an integer value"));
    }

    #[test]
    fn envelope_nests_under_key() {
        let Json(body) = envelope("movie", serde_json::json!({"id": 1})).unwrap();
        assert_eq!(body["movie"]["id"], 1);
    }
}
