//! Storage traits and the storage error taxonomy.
//!
//! # Contracts
//!
//! - `insert` assigns identity and version 1. A second insert under the same
//!   correlation identity fails with [`StoreError::DuplicateCorrelation`], even
//!   if the first row has since been soft-deleted.
//! - `update` is a compare-and-swap on `(id, version)` as the caller read them.
//!   Zero matched rows means [`StoreError::EditConflict`]; the store never
//!   retries on the caller's behalf. A successful update increments the
//!   version by exactly one.
//! - `delete` soft-deletes. Absent or already-deleted rows are
//!   [`StoreError::NotFound`].
//! - Reads never return soft-deleted rows.
//!
//! Implementations: `PostgresStore` (`marquee-postgres`) and `InMemoryStore`
//! (`marquee-testing`).
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so stores can be shared as `Arc<dyn EntityStore<E>>`.

use crate::correlation::CorrelationId;
use crate::filters::{Filters, Page};
use crate::record::{Entity, EntityKind};
use crate::validator::FieldErrors;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every storage operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Class of a violated database constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Unique index.
    Unique,
    /// Foreign key.
    ForeignKey,
    /// CHECK constraint.
    Check,
    /// NOT NULL column.
    NotNull,
    /// Anything else in the integrity-constraint class.
    Other,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unique => "unique",
            Self::ForeignKey => "foreign key",
            Self::Check => "check",
            Self::NotNull => "not null",
            Self::Other => "integrity",
        })
    }
}

/// Errors surfaced by storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row of this kind already exists under the correlation identity.
    #[error("Duplicate correlation id {correlation_id} for {kind}")]
    DuplicateCorrelation {
        /// Entity kind.
        kind: EntityKind,
        /// Conflicting correlation identity.
        correlation_id: CorrelationId,
    },

    /// The referenced parent entity does not exist.
    #[error("Referenced {kind} {id} not found")]
    ReferenceNotFound {
        /// Kind of the missing parent.
        kind: EntityKind,
        /// Identity of the missing parent.
        id: i64,
    },

    /// The row was changed (or deleted) since the caller read it.
    #[error("Edit conflict on {kind} {id} at version {expected_version}")]
    EditConflict {
        /// Entity kind.
        kind: EntityKind,
        /// Row identity.
        id: i64,
        /// Version the caller held.
        expected_version: i32,
    },

    /// No live row matches.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Entity kind.
        kind: EntityKind,
        /// The identity or correlation id searched for.
        key: String,
    },

    /// A constraint other than the ones classified above was violated.
    #[error("{kind} constraint violated: {}", .constraint.as_deref().unwrap_or("unnamed"))]
    Constraint {
        /// Constraint class.
        kind: ConstraintKind,
        /// Constraint name, when the backend reports one.
        constraint: Option<String>,
    },

    /// The backend cannot be reached (pool exhausted, connection refused).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Unclassified backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// The query could not be built from the given filters.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Backend(_))
    }

    /// Shorthand for [`StoreError::NotFound`] by numeric identity.
    #[must_use]
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        Self::NotFound {
            kind,
            key: id.to_string(),
        }
    }
}

/// Persistence for one entity kind.
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Insert a new row created by the intent with `correlation_id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateCorrelation`] if the identity was used before;
    /// [`StoreError::ReferenceNotFound`] if a parent is missing.
    fn insert<'a>(&'a self, correlation_id: CorrelationId, draft: &'a E::Draft) -> StoreFuture<'a, E>;

    /// Compare-and-swap update of the domain fields of `entity`.
    ///
    /// Returns the stored row with its new version.
    ///
    /// # Errors
    ///
    /// [`StoreError::EditConflict`] when `(id, version)` no longer matches.
    fn update<'a>(&'a self, entity: &'a E) -> StoreFuture<'a, E>;

    /// Soft-delete by identity.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if there is no live row.
    fn delete(&self, id: i64) -> StoreFuture<'_, ()>;

    /// Fetch by identity.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if there is no live row.
    fn get(&self, id: i64) -> StoreFuture<'_, E>;

    /// Fetch by correlation identity.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no live row was created under it.
    fn get_by_correlation(&self, correlation_id: CorrelationId) -> StoreFuture<'_, E>;

    /// Whether any row, live or soft-deleted, was created under `correlation_id`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn correlation_exists(&self, correlation_id: CorrelationId) -> StoreFuture<'_, bool>;

    /// Filtered, sorted, paginated listing. Pages past the end are empty.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn list<'a>(&'a self, query: &'a E::Query, filters: &'a Filters) -> StoreFuture<'a, Page<E>>;
}

/// Why an intent was terminally rejected by a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Business rules failed.
    ValidationFailed,
    /// The parent entity does not exist.
    ReferenceNotFound,
    /// The store refused the row on a constraint.
    ConstraintViolation,
}

impl RejectionReason {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::ReferenceNotFound => "reference_not_found",
            Self::ConstraintViolation => "constraint_violation",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RejectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation_failed" => Ok(Self::ValidationFailed),
            "reference_not_found" => Ok(Self::ReferenceNotFound),
            "constraint_violation" => Ok(Self::ConstraintViolation),
            other => Err(format!("unknown rejection reason: {other}")),
        }
    }
}

/// A terminal rejection recorded against a correlation identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    /// Entity kind of the intent.
    pub kind: EntityKind,
    /// Correlation identity of the intent.
    pub correlation_id: CorrelationId,
    /// Rejection class.
    pub reason: RejectionReason,
    /// Field violations, empty unless the reason is validation.
    pub fields: FieldErrors,
    /// When the consumer rejected it.
    pub rejected_at: DateTime<Utc>,
}

/// Durable record of rejected intents, so lookups can tell "rejected" from
/// "still in flight".
pub trait RejectionLedger: Send + Sync {
    /// Record a rejection. A second rejection for the same `(kind, correlation_id)`
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn record_rejection<'a>(&'a self, rejection: &'a RejectionRecord) -> StoreFuture<'a, ()>;

    /// Look up a rejection.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn find_rejection(
        &self,
        kind: EntityKind,
        correlation_id: CorrelationId,
    ) -> StoreFuture<'_, Option<RejectionRecord>>;
}

/// A movie with its average rating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovieRating {
    /// Movie identity.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Runtime.
    pub runtime: i32,
    /// Mean rating over live reviews.
    pub avg_rating: f64,
}

/// A movie with the sample variance of its ratings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovieVariance {
    /// Movie identity.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Runtime.
    pub runtime: i32,
    /// Sample variance, absent with fewer than two reviews.
    pub variance: Option<f64>,
}

/// Identity and headline fields of a movie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieSummary {
    /// Movie identity.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Runtime.
    pub runtime: i32,
}

/// Average rating across every movie of a genre.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenreRating {
    /// Genre name.
    pub genre: String,
    /// Mean rating.
    pub avg_rating: f64,
}

/// Aggregate read models over movies and reviews.
///
/// Soft-deleted movies and reviews are excluded from every report.
pub trait ReportSource: Send + Sync {
    /// Highest average rating first.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn top_rated(&self, limit: u32) -> StoreFuture<'_, Vec<MovieRating>>;

    /// Movies with no live review, by identity.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn without_reviews(&self) -> StoreFuture<'_, Vec<MovieSummary>>;

    /// Highest rating variance first; movies with a single review sort last.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn controversial(&self, limit: u32) -> StoreFuture<'_, Vec<MovieVariance>>;

    /// Average rating per genre, highest first.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn avg_rating_by_genre(&self) -> StoreFuture<'_, Vec<GenreRating>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_errors_are_transient() {
        assert!(StoreError::Unavailable("pool timed out".into()).is_transient());
        assert!(StoreError::Backend("io".into()).is_transient());
        assert!(!StoreError::not_found(EntityKind::Movie, 1).is_transient());
        assert!(
            !StoreError::DuplicateCorrelation {
                kind: EntityKind::Review,
                correlation_id: CorrelationId::generate(),
            }
            .is_transient()
        );
        assert!(
            !StoreError::EditConflict {
                kind: EntityKind::Movie,
                id: 1,
                expected_version: 2,
            }
            .is_transient()
        );
    }

    #[test]
    fn not_found_message_names_the_kind() {
        assert_eq!(
            StoreError::not_found(EntityKind::Review, 12).to_string(),
            "review not found: 12"
        );
    }

    #[test]
    fn reason_round_trips_through_str() {
        for reason in [
            RejectionReason::ValidationFailed,
            RejectionReason::ReferenceNotFound,
            RejectionReason::ConstraintViolation,
        ] {
            assert_eq!(reason.as_str().parse::<RejectionReason>(), Ok(reason));
        }
    }
}
