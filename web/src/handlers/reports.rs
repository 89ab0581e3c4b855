//! Aggregate reports over live movies and reviews.

use super::envelope;
use crate::error::AppError;
use crate::state::DataState;
use axum::Json;
use axum::extract::State;
use serde_json::Value;

/// Rows returned by the ranked reports.
pub const REPORT_LIMIT: u32 = 10;

/// `GET /api/movies/top`: highest average rating first.
pub async fn top_rated(State(state): State<DataState>) -> Result<Json<Value>, AppError> {
    let movies = state.reports.top_rated(REPORT_LIMIT).await?;
    envelope("top_movies", movies)
}

/// `GET /api/movies/without-reviews`
pub async fn without_reviews(State(state): State<DataState>) -> Result<Json<Value>, AppError> {
    let movies = state.reports.without_reviews().await?;
    envelope("movies_without_reviews", movies)
}

/// `GET /api/movies/variance`: most divided opinions first.
pub async fn controversial(State(state): State<DataState>) -> Result<Json<Value>, AppError> {
    let movies = state.reports.controversial(REPORT_LIMIT).await?;
    envelope("movies_variance", movies)
}

/// `GET /api/movies/avg-rating`: average rating per genre.
pub async fn avg_rating_by_genre(State(state): State<DataState>) -> Result<Json<Value>, AppError> {
    let genres = state.reports.avg_rating_by_genre().await?;
    envelope("rating_average", genres)
}
