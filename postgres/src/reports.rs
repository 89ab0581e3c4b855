//! Aggregate reports over live movies and reviews.

use crate::PostgresStore;
use crate::error::classify;
use marquee_core::store::{
    GenreRating, MovieRating, MovieSummary, MovieVariance, ReportSource, StoreFuture,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

const LIVE_RATINGS: &str = "FROM movies m \
     JOIN reviews r ON r.movie_id = m.id AND r.deleted_at IS NULL \
     WHERE m.deleted_at IS NULL";

fn summary_from_row(row: &PgRow) -> Result<MovieSummary, sqlx::Error> {
    Ok(MovieSummary {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        runtime: row.try_get("runtime")?,
    })
}

fn rating_from_row(row: &PgRow) -> Result<MovieRating, sqlx::Error> {
    let movie = summary_from_row(row)?;
    Ok(MovieRating {
        id: movie.id,
        title: movie.title,
        year: movie.year,
        runtime: movie.runtime,
        avg_rating: row.try_get("avg_rating")?,
    })
}

fn variance_from_row(row: &PgRow) -> Result<MovieVariance, sqlx::Error> {
    let movie = summary_from_row(row)?;
    Ok(MovieVariance {
        id: movie.id,
        title: movie.title,
        year: movie.year,
        runtime: movie.runtime,
        variance: row.try_get("variance")?,
    })
}

fn genre_from_row(row: &PgRow) -> Result<GenreRating, sqlx::Error> {
    Ok(GenreRating {
        genre: row.try_get("genre")?,
        avg_rating: row.try_get("avg_rating")?,
    })
}

impl ReportSource for PostgresStore {
    fn top_rated(&self, limit: u32) -> StoreFuture<'_, Vec<MovieRating>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT m.id, m.title, m.year, m.runtime, AVG(r.rating)::float8 AS avg_rating \
                 {LIVE_RATINGS} \
                 GROUP BY m.id \
                 ORDER BY avg_rating DESC, m.id ASC \
                 LIMIT $1"
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

            rows.iter()
                .map(rating_from_row)
                .collect::<Result<_, _>>()
                .map_err(classify)
        })
    }

    fn without_reviews(&self) -> StoreFuture<'_, Vec<MovieSummary>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT m.id, m.title, m.year, m.runtime FROM movies m \
                 WHERE m.deleted_at IS NULL AND NOT EXISTS ( \
                     SELECT 1 FROM reviews r WHERE r.movie_id = m.id AND r.deleted_at IS NULL \
                 ) \
                 ORDER BY m.id ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

            rows.iter()
                .map(summary_from_row)
                .collect::<Result<_, _>>()
                .map_err(classify)
        })
    }

    fn controversial(&self, limit: u32) -> StoreFuture<'_, Vec<MovieVariance>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT m.id, m.title, m.year, m.runtime, VAR_SAMP(r.rating)::float8 AS variance \
                 {LIVE_RATINGS} \
                 GROUP BY m.id \
                 ORDER BY variance DESC NULLS LAST, m.id ASC \
                 LIMIT $1"
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

            rows.iter()
                .map(variance_from_row)
                .collect::<Result<_, _>>()
                .map_err(classify)
        })
    }

    fn avg_rating_by_genre(&self) -> StoreFuture<'_, Vec<GenreRating>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT g.genre, AVG(r.rating)::float8 AS avg_rating \
                 FROM movies m \
                 CROSS JOIN LATERAL unnest(m.genres) AS g(genre) \
                 JOIN reviews r ON r.movie_id = m.id AND r.deleted_at IS NULL \
                 WHERE m.deleted_at IS NULL \
                 GROUP BY g.genre \
                 ORDER BY avg_rating DESC, g.genre ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

            rows.iter()
                .map(genre_from_row)
                .collect::<Result<_, _>>()
                .map_err(classify)
        })
    }
}
