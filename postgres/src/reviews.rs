//! Review rows.
//!
//! Insert first looks for an earlier row under the same correlation identity,
//! so a redelivered review reads as a duplicate even after its movie is gone.
//! It then checks for a live parent movie inside the insert transaction,
//! holding a share lock on it so a concurrent soft delete waits. The unique
//! index and the foreign key still back both checks up.

use crate::PostgresStore;
use crate::error::{classify, classify_insert};
use crate::query::{ListQuery, push_text_match, record_from_row};
use marquee_core::correlation::CorrelationId;
use marquee_core::filters::{Filters, Page};
use marquee_core::record::EntityKind;
use marquee_core::review::{Review, ReviewDraft, ReviewQuery};
use marquee_core::store::{EntityStore, StoreError, StoreFuture};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

const REVIEW_COLUMNS: &str =
    "id, correlation_id, version, created_at, updated_at, deleted_at, movie_id, rating, comment, author";

fn review_from_row(row: &PgRow) -> Result<Review, sqlx::Error> {
    Ok(Review {
        record: record_from_row(row)?,
        movie_id: row.try_get("movie_id")?,
        rating: row.try_get("rating")?,
        comment: row.try_get("comment")?,
        author: row.try_get("author")?,
    })
}

impl EntityStore<Review> for PostgresStore {
    fn insert<'a>(&'a self, correlation_id: CorrelationId, draft: &'a ReviewDraft) -> StoreFuture<'a, Review> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(classify)?;

            let used: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reviews WHERE correlation_id = $1)")
                    .bind(correlation_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(classify)?;
            if used {
                return Err(StoreError::DuplicateCorrelation {
                    kind: EntityKind::Review,
                    correlation_id,
                });
            }

            let parent: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM movies WHERE id = $1 AND deleted_at IS NULL FOR SHARE",
            )
            .bind(draft.movie_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?;
            if parent.is_none() {
                return Err(StoreError::ReferenceNotFound {
                    kind: EntityKind::Movie,
                    id: draft.movie_id,
                });
            }

            let row = sqlx::query(&format!(
                "INSERT INTO reviews (correlation_id, movie_id, rating, comment, author) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {REVIEW_COLUMNS}"
            ))
            .bind(correlation_id.as_uuid())
            .bind(draft.movie_id)
            .bind(draft.rating)
            .bind(&draft.comment)
            .bind(&draft.author)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                classify_insert(EntityKind::Review, correlation_id, Some(draft.movie_id), e)
            })?;
            tx.commit().await.map_err(classify)?;

            let review = review_from_row(&row).map_err(classify)?;
            tracing::debug!(
                id = review.record.id,
                movie_id = review.movie_id,
                correlation_id = %correlation_id,
                "Inserted review"
            );
            Ok(review)
        })
    }

    fn update<'a>(&'a self, entity: &'a Review) -> StoreFuture<'a, Review> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE reviews \
                 SET rating = $1, comment = $2, version = version + 1, updated_at = now() \
                 WHERE id = $3 AND version = $4 AND deleted_at IS NULL \
                 RETURNING {REVIEW_COLUMNS}"
            ))
            .bind(entity.rating)
            .bind(&entity.comment)
            .bind(entity.record.id)
            .bind(entity.record.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or(StoreError::EditConflict {
                kind: EntityKind::Review,
                id: entity.record.id,
                expected_version: entity.record.version,
            })?;

            review_from_row(&row).map_err(classify)
        })
    }

    fn delete(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE reviews SET deleted_at = now(), updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::not_found(EntityKind::Review, id));
            }
            Ok(())
        })
    }

    fn get(&self, id: i64) -> StoreFuture<'_, Review> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1 AND deleted_at IS NULL"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Review, id))?;

            review_from_row(&row).map_err(classify)
        })
    }

    fn get_by_correlation(&self, correlation_id: CorrelationId) -> StoreFuture<'_, Review> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews \
                 WHERE correlation_id = $1 AND deleted_at IS NULL"
            ))
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Review,
                key: correlation_id.to_string(),
            })?;

            review_from_row(&row).map_err(classify)
        })
    }

    fn correlation_exists(&self, correlation_id: CorrelationId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reviews WHERE correlation_id = $1)")
                .bind(correlation_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(classify)
        })
    }

    fn list<'a>(&'a self, query: &'a ReviewQuery, filters: &'a Filters) -> StoreFuture<'a, Page<Review>> {
        Box::pin(async move {
            let author = query.author.as_deref().map(str::trim).filter(|a| !a.is_empty());
            ListQuery {
                table: "reviews",
                columns: REVIEW_COLUMNS,
                push_filters: |builder: &mut QueryBuilder<'static, Postgres>| {
                    if let Some(movie_id) = query.movie_id {
                        builder.push(" AND movie_id = ").push_bind(movie_id);
                    }
                    if let Some(author) = author {
                        push_text_match(builder, "author", author);
                    }
                    if let Some(rating) = query.rating {
                        builder.push(" AND rating = ").push_bind(rating);
                    }
                },
                filters,
            }
            .fetch(&self.pool, review_from_row)
            .await
        })
    }
}
