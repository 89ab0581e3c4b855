//! Shared persistence columns and the entity abstraction.
//!
//! Every durable entity embeds a [`VersionedRecord`] by value: store-assigned
//! identity, the correlation identity it was created under, the optimistic-lock
//! version counter, and audit timestamps. Entity-specific fields live next to it.

use crate::correlation::CorrelationId;
use crate::validator::Validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of entity that flow through the intake pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A movie.
    Movie,
    /// A review of a movie.
    Review,
}

impl EntityKind {
    /// Stable lowercase name used in logs, metrics and the rejection ledger.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "review" => Ok(Self::Review),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Version counter value for a freshly inserted record.
pub const INITIAL_VERSION: i32 = 1;

/// Columns every entity row carries.
///
/// - `id` is assigned by the store on insert and never changes.
/// - `correlation_id` is set once at insert and never overwritten.
/// - `version` starts at [`INITIAL_VERSION`] and increases by exactly one per
///   successful update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Store-assigned identity.
    pub id: i64,
    /// Correlation identity of the intent that created this row.
    pub correlation_id: CorrelationId,
    /// Optimistic-lock version counter.
    pub version: i32,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last successful update time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Deleted rows are invisible to reads.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl VersionedRecord {
    /// A new record as the store creates it on insert.
    #[must_use]
    pub const fn inserted(id: i64, correlation_id: CorrelationId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            correlation_id,
            version: INITIAL_VERSION,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns `true` if the record has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A durable entity kind with its insert payload and list filters.
///
/// Implemented by [`Movie`](crate::movie::Movie) and
/// [`Review`](crate::review::Review). Store implementations are written once
/// against this trait where they can, and per entity where the schema differs.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Insert payload: everything but the store-owned columns.
    type Draft: Validate + Clone + fmt::Debug + Send + Sync + 'static;

    /// Entity-specific list filters.
    type Query: Default + Clone + fmt::Debug + Send + Sync + 'static;

    /// The kind tag for this entity.
    const KIND: EntityKind;

    /// Columns a caller may sort by (without the `-` prefix).
    const SORT_SAFELIST: &'static [&'static str];

    /// Borrow the shared persistence columns.
    fn record(&self) -> &VersionedRecord;

    /// Mutably borrow the shared persistence columns.
    fn record_mut(&mut self) -> &mut VersionedRecord;

    /// Build the entity from its shared columns and insert payload.
    fn from_draft(record: VersionedRecord, draft: Self::Draft) -> Self;

    /// The current domain fields as an insert payload (used for re-validation).
    fn to_draft(&self) -> Self::Draft;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_record_starts_at_version_one() {
        let now = Utc::now();
        let record = VersionedRecord::inserted(7, CorrelationId::generate(), now);
        assert_eq!(record.version, INITIAL_VERSION);
        assert_eq!(record.created_at, record.updated_at);
        assert!(!record.is_deleted());
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [EntityKind::Movie, EntityKind::Review] {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
        assert!("actor".parse::<EntityKind>().is_err());
    }
}
