//! Data-service reads, updates and deletes.
//!
//! The handlers are written once, generic over [`Resource`], and mounted for
//! both entity kinds by [`crate::routes::data_router`].

use super::{envelope, parse_correlation, parse_id, parse_param};
use crate::error::AppError;
use crate::extractors::ExpectedVersion;
use crate::state::DataState;
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use marquee_core::filters::Filters;
use marquee_core::movie::{Movie, MovieQuery, MovieUpdate};
use marquee_core::record::Entity;
use marquee_core::review::{Review, ReviewQuery, ReviewUpdate};
use marquee_core::store::EntityStore;
use marquee_core::validator::{FieldErrors, ValidationContext, Validate, Validator};
use marquee_runtime::{CorrelationLookup, LookupOutcome};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// An entity kind exposed over HTTP.
pub trait Resource: Entity + Serialize {
    /// Response key for one row, e.g. `movie`.
    const SINGULAR: &'static str;

    /// Response key for a page of rows, e.g. `movies`.
    const PLURAL: &'static str;

    /// PATCH body.
    type Update: DeserializeOwned + Send + 'static;

    /// Raw list query string.
    type Params: DeserializeOwned + Send + 'static;

    /// Merge a partial update into `entity`.
    fn apply(update: Self::Update, entity: &mut Self);

    /// Turn raw list parameters into typed filters.
    ///
    /// # Errors
    ///
    /// Field errors for unparseable or out-of-range values.
    fn parse_params(params: Self::Params) -> Result<(Self::Query, Filters), FieldErrors>;

    /// The store holding this kind.
    fn store(state: &DataState) -> &Arc<dyn EntityStore<Self>>;

    /// The correlation lookup for this kind.
    fn lookup(state: &DataState) -> &CorrelationLookup<Self>;
}

/// Query string of `GET /api/movies`.
#[derive(Debug, Default, Deserialize)]
pub struct MovieParams {
    title: Option<String>,
    /// Comma-separated, e.g. `drama,crime`.
    genres: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
    sort: Option<String>,
}

/// Query string of `GET /api/reviews`.
#[derive(Debug, Default, Deserialize)]
pub struct ReviewParams {
    movie_id: Option<String>,
    author: Option<String>,
    rating: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
    sort: Option<String>,
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

/// Shared page/sort parsing. Errors already in `v` are kept.
fn page_filters(
    mut v: Validator,
    page: Option<&str>,
    page_size: Option<&str>,
    sort: Option<&str>,
    safelist: &[&'static str],
) -> Result<Filters, FieldErrors> {
    let page = parse_param(&mut v, "page", page, "must be an integer value");
    let page_size = parse_param(&mut v, "page_size", page_size, "must be an integer value");

    let filters = match Filters::parse(page, page_size, sort, safelist) {
        Ok(filters) => Some(filters),
        Err(errors) => {
            for (field, message) in errors.iter() {
                v.add_error(field, message);
            }
            None
        }
    };
    v.finish()?;
    Ok(filters.unwrap_or_default())
}

impl Resource for Movie {
    const SINGULAR: &'static str = "movie";
    const PLURAL: &'static str = "movies";

    type Update = MovieUpdate;
    type Params = MovieParams;

    fn apply(update: MovieUpdate, entity: &mut Self) {
        update.apply(entity);
    }

    fn parse_params(params: MovieParams) -> Result<(MovieQuery, Filters), FieldErrors> {
        let query = MovieQuery {
            title: non_blank(params.title),
            genres: params
                .genres
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_owned)
                .collect(),
        };
        let filters = page_filters(
            Validator::new(),
            params.page.as_deref(),
            params.page_size.as_deref(),
            params.sort.as_deref(),
            Self::SORT_SAFELIST,
        )?;
        Ok((query, filters))
    }

    fn store(state: &DataState) -> &Arc<dyn EntityStore<Self>> {
        &state.movies
    }

    fn lookup(state: &DataState) -> &CorrelationLookup<Self> {
        &state.movie_lookup
    }
}

impl Resource for Review {
    const SINGULAR: &'static str = "review";
    const PLURAL: &'static str = "reviews";

    type Update = ReviewUpdate;
    type Params = ReviewParams;

    fn apply(update: ReviewUpdate, entity: &mut Self) {
        update.apply(entity);
    }

    fn parse_params(params: ReviewParams) -> Result<(ReviewQuery, Filters), FieldErrors> {
        let mut v = Validator::new();
        let query = ReviewQuery {
            movie_id: parse_param(&mut v, "movie_id", params.movie_id.as_deref(), "must be an integer value"),
            author: non_blank(params.author),
            rating: parse_param(&mut v, "rating", params.rating.as_deref(), "must be a number"),
        };
        let filters = page_filters(
            v,
            params.page.as_deref(),
            params.page_size.as_deref(),
            params.sort.as_deref(),
            Self::SORT_SAFELIST,
        )?;
        Ok((query, filters))
    }

    fn store(state: &DataState) -> &Arc<dyn EntityStore<Self>> {
        &state.reviews
    }

    fn lookup(state: &DataState) -> &CorrelationLookup<Self> {
        &state.review_lookup
    }
}

/// `GET /api/{kind}/:id`
pub async fn show<R: Resource>(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let entity = R::store(&state).get(id).await?;
    envelope(R::SINGULAR, entity)
}

/// `GET /api/{kind}`
pub async fn list<R: Resource>(
    State(state): State<DataState>,
    params: Result<Query<R::Params>, QueryRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Query(params) = params.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let (query, filters) = R::parse_params(params).map_err(AppError::validation)?;

    let page = R::store(&state).list(&query, &filters).await?;

    let items = serde_json::to_value(&page.items)
        .map_err(|e| AppError::internal("failed to encode response").with_source(e))?;
    let mut body = serde_json::Map::new();
    body.insert(R::PLURAL.to_owned(), items);
    body.insert("metadata".to_owned(), json!(page.metadata));
    Ok(Json(serde_json::Value::Object(body)))
}

/// `PATCH /api/{kind}/:id`
///
/// Fetch, check the optional version precondition, merge, re-validate and
/// compare-and-swap. A concurrent writer between the fetch and the swap
/// surfaces as 409.
pub async fn update<R: Resource>(
    State(state): State<DataState>,
    Path(id): Path<String>,
    ExpectedVersion(expected): ExpectedVersion,
    body: Result<Json<R::Update>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let Json(changes) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let store = R::store(&state);
    let mut entity = store.get(id).await?;

    if let Some(expected) = expected {
        let current = entity.record().version;
        if current != expected {
            return Err(AppError::conflict(format!(
                "{} {id} is at version {current}, not {expected}",
                R::SINGULAR
            )));
        }
    }

    R::apply(changes, &mut entity);
    entity
        .to_draft()
        .validated(&ValidationContext::from_clock(state.clock.as_ref()))
        .map_err(AppError::validation)?;

    let updated = store.update(&entity).await?;
    tracing::debug!(kind = R::SINGULAR, id, version = updated.record().version, "Record updated");
    envelope(R::SINGULAR, updated)
}

/// `DELETE /api/{kind}/:id`
pub async fn delete<R: Resource>(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    R::store(&state).delete(id).await?;
    Ok(Json(json!({ "message": format!("{} successfully deleted", R::SINGULAR) })))
}

/// `GET /api/{kind}/by-correlation/:correlation_id`
///
/// 200 once applied, 422 once rejected, 202 while still in flight, 404 after.
pub async fn by_correlation<R: Resource>(
    State(state): State<DataState>,
    Path(raw): Path<String>,
) -> Result<Response, AppError> {
    let correlation_id = parse_correlation(&raw)?;

    let response = match R::lookup(&state).lookup(correlation_id).await? {
        LookupOutcome::Applied(entity) => envelope(R::SINGULAR, entity)?.into_response(),
        LookupOutcome::Rejected { reason, fields } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "status": "rejected",
                "correlation_id": correlation_id,
                "reason": reason,
                "errors": fields,
            })),
        )
            .into_response(),
        LookupOutcome::Pending => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pending",
                "correlation_id": correlation_id,
            })),
        )
            .into_response(),
        LookupOutcome::NotFound => {
            return Err(AppError::new(
                StatusCode::NOT_FOUND,
                format!("{} with correlation_id {correlation_id} not found", R::SINGULAR),
                "NOT_FOUND",
            ));
        }
    };
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn movie_params_split_genres_and_default_paging() {
        let params = MovieParams {
            title: Some("  godfather ".into()),
            genres: Some("crime, drama,,".into()),
            ..MovieParams::default()
        };
        let (query, filters) = Movie::parse_params(params).unwrap();
        assert_eq!(query.title.as_deref(), Some("godfather"));
        assert_eq!(query.genres, vec!["crime", "drama"]);
        assert_eq!(filters, Filters::default());
    }

    #[test]
    fn bad_paging_and_sort_are_field_errors() {
        let params = MovieParams {
            page: Some("abc".into()),
            page_size: Some("500".into()),
            sort: Some("password".into()),
            ..MovieParams::default()
        };
        let errors = Movie::parse_params(params).unwrap_err();
        assert_eq!(errors.get("page"), Some("must be an integer value"));
        assert_eq!(errors.get("page_size"), Some("must be a maximum of 100"));
        assert_eq!(errors.get("sort"), Some("invalid sort value"));
    }

    #[test]
    fn review_params_parse_numbers() {
        let params = ReviewParams {
            movie_id: Some("7".into()),
            rating: Some("4.5".into()),
            sort: Some("-rating".into()),
            ..ReviewParams::default()
        };
        let (query, filters) = Review::parse_params(params).unwrap();
        assert_eq!(query.movie_id, Some(7));
        assert_eq!(query.rating, Some(4.5));
        assert_eq!(filters.sort.column(), "rating");

        let errors = Review::parse_params(ReviewParams {
            movie_id: Some("seven".into()),
            ..ReviewParams::default()
        })
        .unwrap_err();
        assert_eq!(errors.get("movie_id"), Some("must be an integer value"));
    }
}
