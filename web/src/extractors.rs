//! Custom Axum extractors.
//!
//! - [`RequestCorrelation`]: a caller-supplied `X-Correlation-ID`, if any
//! - [`ExpectedVersion`]: optional `X-Expected-Version` precondition for PATCH
//!
//! Both reject malformed header values with a 400 rather than ignoring them:
//! a caller that sends an identity expects it to be used.

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use marquee_core::correlation::CorrelationId;

/// Header carrying a caller-chosen correlation identity.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Header carrying the version a caller last read.
pub const EXPECTED_VERSION_HEADER: &str = "X-Expected-Version";

/// Correlation identity supplied by the caller.
///
/// `None` when the header is absent; the gateway then generates one.
///
/// # Example
///
/// ```ignore
/// async fn handler(RequestCorrelation(cid): RequestCorrelation) -> String {
///     format!("{cid:?}")
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCorrelation(pub Option<CorrelationId>);

#[async_trait]
impl<S> FromRequestParts<S> for RequestCorrelation
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(CORRELATION_ID_HEADER) else {
            return Ok(Self(None));
        };
        value
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<CorrelationId>().ok())
            .map(|id| Self(Some(id)))
            .ok_or_else(|| AppError::bad_request("invalid X-Correlation-ID header"))
    }
}

/// Version precondition for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedVersion(pub Option<i32>);

#[async_trait]
impl<S> FromRequestParts<S> for ExpectedVersion
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(EXPECTED_VERSION_HEADER) else {
            return Ok(Self(None));
        };
        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .map(|version| Self(Some(version)))
            .ok_or_else(|| AppError::bad_request("invalid X-Expected-Version header"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract<T: FromRequestParts<(), Rejection = AppError>>(
        header: Option<(&str, &str)>,
    ) -> Result<T, AppError> {
        let mut builder = Request::builder().uri("/test");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        T::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let id = CorrelationId::generate();
        let RequestCorrelation(found) =
            extract(Some((CORRELATION_ID_HEADER, &id.to_string()))).await.unwrap();
        assert_eq!(found, Some(id));
    }

    #[tokio::test]
    async fn test_correlation_id_absent() {
        let RequestCorrelation(found) = extract(None).await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_nil_correlation_id_is_rejected() {
        let err = extract::<RequestCorrelation>(Some((
            CORRELATION_ID_HEADER,
            "00000000-0000-0000-0000-000000000000",
        )))
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_expected_version() {
        let ExpectedVersion(found) = extract(Some((EXPECTED_VERSION_HEADER, "3"))).await.unwrap();
        assert_eq!(found, Some(3));

        let err = extract::<ExpectedVersion>(Some((EXPECTED_VERSION_HEADER, "three")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
