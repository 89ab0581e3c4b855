//! Mapping from `sqlx` errors onto the store error taxonomy.
//!
//! Integrity violations are classified by SQLSTATE (through
//! [`sqlx::error::ErrorKind`]) and by constraint name. Message text is never
//! inspected.

use marquee_core::correlation::CorrelationId;
use marquee_core::record::EntityKind;
use marquee_core::store::{ConstraintKind, StoreError};
use sqlx::error::ErrorKind;
use thiserror::Error;

/// Errors opening or migrating the database.
#[derive(Error, Debug)]
pub enum PostgresError {
    /// The pool could not connect.
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connect(#[source] sqlx::Error),

    /// A migration failed.
    #[error("Migration failed: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),
}

/// Unique constraint over the correlation identity of each table.
pub(crate) const fn correlation_constraint(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Movie => "movies_correlation_id_key",
        EntityKind::Review => "reviews_correlation_id_key",
    }
}

/// Foreign key from reviews to their movie.
pub(crate) const REVIEW_MOVIE_FKEY: &str = "reviews_movie_id_fkey";

/// Classify an error without operation context.
pub(crate) fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            let kind = match db.kind() {
                ErrorKind::UniqueViolation => ConstraintKind::Unique,
                ErrorKind::ForeignKeyViolation => ConstraintKind::ForeignKey,
                ErrorKind::CheckViolation => ConstraintKind::Check,
                ErrorKind::NotNullViolation => ConstraintKind::NotNull,
                _ if db.code().is_some_and(|code| code.starts_with("23")) => ConstraintKind::Other,
                _ => return StoreError::Backend(db.to_string()),
            };
            StoreError::Constraint {
                kind,
                constraint: db.constraint().map(str::to_owned),
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

/// Classify an insert failure, recognising the correlation and parent constraints.
pub(crate) fn classify_insert(
    kind: EntityKind,
    correlation_id: CorrelationId,
    parent_id: Option<i64>,
    err: sqlx::Error,
) -> StoreError {
    match classify(err) {
        StoreError::Constraint {
            kind: ConstraintKind::Unique,
            constraint: Some(name),
        } if name == correlation_constraint(kind) => StoreError::DuplicateCorrelation {
            kind,
            correlation_id,
        },
        StoreError::Constraint {
            kind: ConstraintKind::ForeignKey,
            constraint: Some(name),
        } if name == REVIEW_MOVIE_FKEY => StoreError::ReferenceNotFound {
            kind: EntityKind::Movie,
            id: parent_id.unwrap_or_default(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_transient() {
        let err = classify(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_row_is_backend() {
        assert!(matches!(
            classify(sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn correlation_constraints_are_per_table() {
        assert_ne!(
            correlation_constraint(EntityKind::Movie),
            correlation_constraint(EntityKind::Review)
        );
    }
}
