//! Router assembly for the two services.

use crate::handlers::{entities, health, intake, reports};
use crate::state::{ApiState, DataState};
use axum::Router;
use axum::routing::{get, post};
use marquee_core::movie::{Movie, MovieDraft};
use marquee_core::review::{Review, ReviewDraft};
use tower_http::trace::TraceLayer;

/// The data-service: reads, updates, deletes, reports and correlation lookups.
///
/// Static segments (`top`, `by-correlation`) take precedence over `:id`.
pub fn data_router(state: DataState) -> Router {
    Router::new()
        .route("/health", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .route("/api/movies", get(entities::list::<Movie>))
        .route("/api/movies/top", get(reports::top_rated))
        .route("/api/movies/without-reviews", get(reports::without_reviews))
        .route("/api/movies/variance", get(reports::controversial))
        .route("/api/movies/avg-rating", get(reports::avg_rating_by_genre))
        .route(
            "/api/movies/by-correlation/:correlation_id",
            get(entities::by_correlation::<Movie>),
        )
        .route(
            "/api/movies/:id",
            get(entities::show::<Movie>)
                .patch(entities::update::<Movie>)
                .delete(entities::delete::<Movie>),
        )
        .route("/api/reviews", get(entities::list::<Review>))
        .route(
            "/api/reviews/by-correlation/:correlation_id",
            get(entities::by_correlation::<Review>),
        )
        .route(
            "/api/reviews/:id",
            get(entities::show::<Review>)
                .patch(entities::update::<Review>)
                .delete(entities::delete::<Review>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The api-service: create intake, everything else relayed.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/metrics", get(health::metrics))
        .route(
            "/api/movies",
            post(intake::create::<MovieDraft>).fallback(intake::forward),
        )
        .route(
            "/api/reviews",
            post(intake::create::<ReviewDraft>).fallback(intake::forward),
        )
        .fallback(intake::forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
