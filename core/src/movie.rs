//! The movie entity.

use crate::record::{Entity, EntityKind, VersionedRecord};
use crate::validator::{ValidationContext, Validate, Validator, unique};
use serde::{Deserialize, Serialize};

/// Earliest accepted release year.
pub const MIN_YEAR: i32 = 1888;

/// Maximum title length in bytes.
pub const MAX_TITLE_BYTES: usize = 500;

/// Maximum number of genres per movie.
pub const MAX_GENRES: usize = 5;

/// A persisted movie.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    /// Identity, version and audit columns.
    #[serde(flatten)]
    pub record: VersionedRecord,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Runtime in minutes.
    pub runtime: i32,
    /// Genre names, unique within the movie.
    pub genres: Vec<String>,
}

/// The domain fields of a movie, as carried by a create intent.
///
/// Missing numeric fields deserialize to zero so that the rules report them as
/// "must be provided" rather than failing the whole payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieDraft {
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Release year.
    #[serde(default)]
    pub year: i32,
    /// Runtime in minutes.
    #[serde(default)]
    pub runtime: i32,
    /// Genre names.
    #[serde(default)]
    pub genres: Vec<String>,
}

impl Validate for MovieDraft {
    fn validate(&self, v: &mut Validator, ctx: &ValidationContext) {
        v.check(!self.title.is_empty(), "title", "must be provided");
        v.check(
            self.title.len() <= MAX_TITLE_BYTES,
            "title",
            "must not be more than 500 bytes long",
        );

        v.check(self.year != 0, "year", "must be provided");
        v.check(self.year >= MIN_YEAR, "year", "must be greater than 1888");
        v.check(self.year <= ctx.current_year, "year", "must not be in the future");

        v.check(self.runtime != 0, "runtime", "must be provided");
        v.check(self.runtime > 0, "runtime", "must be a positive integer");

        v.check(!self.genres.is_empty(), "genres", "must be provided");
        v.check(
            self.genres.len() <= MAX_GENRES,
            "genres",
            "must not contain more than 5 genres",
        );
        v.check(unique(&self.genres), "genres", "must not contain duplicate values");
    }
}

/// Partial update for the synchronous PATCH path. Absent fields keep their value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieUpdate {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New release year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// New runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<i32>,
    /// Replacement genre list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
}

impl MovieUpdate {
    /// Apply onto a fetched movie. The record columns are left untouched so the
    /// store can compare-and-swap on the version the caller read.
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

/// List filters for movies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieQuery {
    /// Free-text match on the title.
    pub title: Option<String>,
    /// Movies must carry every one of these genres.
    pub genres: Vec<String>,
}

impl Entity for Movie {
    type Draft = MovieDraft;
    type Query = MovieQuery;

    const KIND: EntityKind = EntityKind::Movie;
    const SORT_SAFELIST: &'static [&'static str] = &["id", "title", "year", "runtime"];

    fn record(&self) -> &VersionedRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut VersionedRecord {
        &mut self.record
    }

    fn from_draft(record: VersionedRecord, draft: MovieDraft) -> Self {
        Self {
            record,
            title: draft.title,
            year: draft.year,
            runtime: draft.runtime,
            genres: draft.genres,
        }
    }

    fn to_draft(&self) -> MovieDraft {
        MovieDraft {
            title: self.title.clone(),
            year: self.year,
            runtime: self.runtime,
            genres: self.genres.clone(),
        }
    }
}
