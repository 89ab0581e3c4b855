//! The review entity.
//!
//! A review belongs to exactly one movie. The parent must exist (and not be
//! soft-deleted) when the review is inserted; stores check this at write time.

use crate::record::{Entity, EntityKind, VersionedRecord};
use crate::validator::{ValidationContext, Validate, Validator};
use serde::{Deserialize, Serialize};

/// Lowest accepted rating.
pub const MIN_RATING: f32 = 0.5;

/// Highest accepted rating.
pub const MAX_RATING: f32 = 5.0;

/// Maximum comment length in characters.
pub const MAX_COMMENT_CHARS: usize = 1000;

/// Maximum author length in characters.
pub const MAX_AUTHOR_CHARS: usize = 50;

/// A persisted review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Identity, version and audit columns.
    #[serde(flatten)]
    pub record: VersionedRecord,
    /// Parent movie identity.
    pub movie_id: i64,
    /// Rating between 0.5 and 5.0.
    pub rating: f32,
    /// Free-text comment.
    pub comment: String,
    /// Display name of the reviewer.
    pub author: String,
}

/// The domain fields of a review, as carried by a create intent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewDraft {
    /// Parent movie identity.
    #[serde(default)]
    pub movie_id: i64,
    /// Rating.
    #[serde(default)]
    pub rating: f32,
    /// Comment.
    #[serde(default)]
    pub comment: String,
    /// Author.
    #[serde(default)]
    pub author: String,
}

impl Validate for ReviewDraft {
    fn validate(&self, v: &mut Validator, _ctx: &ValidationContext) {
        v.check(self.movie_id != 0, "movie_id", "must be provided");
        v.check(self.movie_id > 0, "movie_id", "must be a positive integer");

        v.check(
            (MIN_RATING..=MAX_RATING).contains(&self.rating),
            "rating",
            "must be between 0.5 and 5.0",
        );

        v.check(!self.comment.trim().is_empty(), "comment", "must be provided");
        v.check(
            self.comment.chars().count() <= MAX_COMMENT_CHARS,
            "comment",
            "must not be more than 1000 characters",
        );

        v.check(!self.author.trim().is_empty(), "author", "must be provided");
        v.check(
            self.author.chars().count() <= MAX_AUTHOR_CHARS,
            "author",
            "must not be more than 50 characters",
        );
    }
}

/// Partial update for the synchronous PATCH path.
///
/// Only the rating and comment may change; parent and author are fixed at insert.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewUpdate {
    /// New rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    /// New comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ReviewUpdate {
    /// Apply onto a fetched review.
    pub fn apply(self, review: &mut Review) {
        if let Some(rating) = self.rating {
            review.rating = rating;
        }
        if let Some(comment) = self.comment {
            review.comment = comment;
        }
    }
}

/// List filters for reviews.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewQuery {
    /// Only reviews of this movie.
    pub movie_id: Option<i64>,
    /// Free-text match on the author.
    pub author: Option<String>,
    /// Exact rating.
    pub rating: Option<f32>,
}

impl Entity for Review {
    type Draft = ReviewDraft;
    type Query = ReviewQuery;

    const KIND: EntityKind = EntityKind::Review;
    const SORT_SAFELIST: &'static [&'static str] = &["id", "rating", "author"];

    fn record(&self) -> &VersionedRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut VersionedRecord {
        &mut self.record
    }

    fn from_draft(record: VersionedRecord, draft: ReviewDraft) -> Self {
        Self {
            record,
            movie_id: draft.movie_id,
            rating: draft.rating,
            comment: draft.comment,
            author: draft.author,
        }
    }

    fn to_draft(&self) -> ReviewDraft {
        ReviewDraft {
            movie_id: self.movie_id,
            rating: self.rating,
            comment: self.comment.clone(),
            author: self.author.clone(),
        }
    }
}
