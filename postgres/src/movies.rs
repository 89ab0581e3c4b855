//! Movie rows.

use crate::PostgresStore;
use crate::error::{classify, classify_insert};
use crate::query::{ListQuery, push_text_match, record_from_row};
use marquee_core::correlation::CorrelationId;
use marquee_core::filters::{Filters, Page};
use marquee_core::movie::{Movie, MovieDraft, MovieQuery};
use marquee_core::record::EntityKind;
use marquee_core::store::{EntityStore, StoreError, StoreFuture};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

const MOVIE_COLUMNS: &str =
    "id, correlation_id, version, created_at, updated_at, deleted_at, title, year, runtime, genres";

fn movie_from_row(row: &PgRow) -> Result<Movie, sqlx::Error> {
    Ok(Movie {
        record: record_from_row(row)?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        runtime: row.try_get("runtime")?,
        genres: row.try_get("genres")?,
    })
}

impl EntityStore<Movie> for PostgresStore {
    fn insert<'a>(&'a self, correlation_id: CorrelationId, draft: &'a MovieDraft) -> StoreFuture<'a, Movie> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "INSERT INTO movies (correlation_id, title, year, runtime, genres) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {MOVIE_COLUMNS}"
            ))
            .bind(correlation_id.as_uuid())
            .bind(&draft.title)
            .bind(draft.year)
            .bind(draft.runtime)
            .bind(&draft.genres)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_insert(EntityKind::Movie, correlation_id, None, e))?;

            let movie = movie_from_row(&row).map_err(classify)?;
            tracing::debug!(
                id = movie.record.id,
                correlation_id = %correlation_id,
                "Inserted movie"
            );
            Ok(movie)
        })
    }

    fn update<'a>(&'a self, entity: &'a Movie) -> StoreFuture<'a, Movie> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE movies \
                 SET title = $1, year = $2, runtime = $3, genres = $4, \
                     version = version + 1, updated_at = now() \
                 WHERE id = $5 AND version = $6 AND deleted_at IS NULL \
                 RETURNING {MOVIE_COLUMNS}"
            ))
            .bind(&entity.title)
            .bind(entity.year)
            .bind(entity.runtime)
            .bind(&entity.genres)
            .bind(entity.record.id)
            .bind(entity.record.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or(StoreError::EditConflict {
                kind: EntityKind::Movie,
                id: entity.record.id,
                expected_version: entity.record.version,
            })?;

            movie_from_row(&row).map_err(classify)
        })
    }

    fn delete(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE movies SET deleted_at = now(), updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::not_found(EntityKind::Movie, id));
            }
            Ok(())
        })
    }

    fn get(&self, id: i64) -> StoreFuture<'_, Movie> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1 AND deleted_at IS NULL"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Movie, id))?;

            movie_from_row(&row).map_err(classify)
        })
    }

    fn get_by_correlation(&self, correlation_id: CorrelationId) -> StoreFuture<'_, Movie> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {MOVIE_COLUMNS} FROM movies \
                 WHERE correlation_id = $1 AND deleted_at IS NULL"
            ))
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Movie,
                key: correlation_id.to_string(),
            })?;

            movie_from_row(&row).map_err(classify)
        })
    }

    fn correlation_exists(&self, correlation_id: CorrelationId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM movies WHERE correlation_id = $1)")
                .bind(correlation_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(classify)
        })
    }

    fn list<'a>(&'a self, query: &'a MovieQuery, filters: &'a Filters) -> StoreFuture<'a, Page<Movie>> {
        Box::pin(async move {
            let title = query.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
            ListQuery {
                table: "movies",
                columns: MOVIE_COLUMNS,
                push_filters: |builder: &mut QueryBuilder<'static, Postgres>| {
                    if let Some(title) = title {
                        push_text_match(builder, "title", title);
                    }
                    if !query.genres.is_empty() {
                        builder.push(" AND genres @> ").push_bind(query.genres.clone());
                    }
                },
                filters,
            }
            .fetch(&self.pool, movie_from_row)
            .await
        })
    }
}
