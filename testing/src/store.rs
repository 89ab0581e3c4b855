//! In-memory entity store.
//!
//! Implements [`EntityStore`] for movies and reviews, the [`RejectionLedger`],
//! and the [`ReportSource`] over plain collections behind one mutex, with the
//! same contracts as the Postgres store: unique correlation identities that
//! survive soft delete, compare-and-swap updates, duplicate then parent checks on review insert.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use marquee_core::correlation::CorrelationId;
use marquee_core::environment::{Clock, SystemClock};
use marquee_core::filters::{Filters, Metadata, Page, SortDirection};
use marquee_core::movie::{Movie, MovieDraft, MovieQuery};
use marquee_core::record::{Entity, EntityKind, VersionedRecord};
use marquee_core::review::{Review, ReviewDraft, ReviewQuery};
use marquee_core::store::{
    EntityStore, GenreRating, MovieRating, MovieSummary, MovieVariance, RejectionLedger,
    RejectionRecord, ReportSource, StoreError, StoreFuture,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    movies: BTreeMap<i64, Movie>,
    reviews: BTreeMap<i64, Review>,
    rejections: HashMap<(EntityKind, CorrelationId), RejectionRecord>,
    next_movie_id: i64,
    next_review_id: i64,
    failing_ops: usize,
}

impl Inner {
    fn check_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_ops > 0 {
            self.failing_ops -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn live_movie(&self, id: i64) -> Option<&Movie> {
        self.movies.get(&id).filter(|m| !m.record.is_deleted())
    }

    fn live_reviews(&self) -> impl Iterator<Item = &Review> {
        self.reviews.values().filter(|r| {
            !r.record.is_deleted() && self.live_movie(r.movie_id).is_some()
        })
    }

    fn ratings_by_movie(&self) -> BTreeMap<i64, Vec<f64>> {
        let mut ratings: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for review in self.live_reviews() {
            ratings
                .entry(review.movie_id)
                .or_default()
                .push(f64::from(review.rating));
        }
        ratings
    }
}

/// In-memory store for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use marquee_testing::InMemoryStore;
/// use marquee_core::correlation::CorrelationId;
/// use marquee_core::movie::{Movie, MovieDraft};
/// use marquee_core::store::EntityStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let draft = MovieDraft { title: "Heat".into(), year: 1995, runtime: 170, genres: vec!["crime".into()] };
/// let movie = EntityStore::<Movie>::insert(&store, CorrelationId::generate(), &draft).await?;
/// assert_eq!(movie.record.version, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that timestamps rows with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_movie_id: 1,
                next_review_id: 1,
                ..Inner::default()
            })),
            clock,
        }
    }

    /// Make the next `n` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().unwrap().failing_ops = n;
    }

    /// Number of movie rows, including soft-deleted ones.
    #[must_use]
    pub fn movie_rows(&self) -> usize {
        self.inner.lock().unwrap().movies.len()
    }

    /// Number of review rows, including soft-deleted ones.
    #[must_use]
    pub fn review_rows(&self) -> usize {
        self.inner.lock().unwrap().reviews.len()
    }

    /// Number of recorded rejections.
    #[must_use]
    pub fn rejection_count(&self) -> usize {
        self.inner.lock().unwrap().rejections.len()
    }
}

fn paginate<E: Clone>(
    mut rows: Vec<E>,
    filters: &Filters,
    cmp: impl Fn(&E, &E, &str) -> Ordering,
    id: impl Fn(&E) -> i64,
) -> Page<E> {
    let column = filters.sort.column();
    let direction = filters.sort.direction();
    rows.sort_by(|a, b| {
        let primary = match direction {
            SortDirection::Asc => cmp(a, b, column),
            SortDirection::Desc => cmp(b, a, column),
        };
        primary.then_with(|| id(a).cmp(&id(b)))
    });

    let total = rows.len() as u64;
    let offset = usize::try_from(filters.offset()).unwrap_or(usize::MAX);
    let items = rows
        .into_iter()
        .skip(offset)
        .take(filters.limit() as usize)
        .collect();
    Page {
        items,
        metadata: Metadata::calculate(total, filters.page, filters.page_size),
    }
}

fn lexemes(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Approximates `to_tsvector('simple', text) @@ plainto_tsquery('simple', terms)`:
/// every term must appear as a whole word, case-insensitively. Terms without
/// any lexeme form an empty query, which matches nothing.
fn matches_terms(text: &str, terms: &str) -> bool {
    let wanted = lexemes(terms);
    if wanted.is_empty() {
        return false;
    }
    let words = lexemes(text);
    wanted.iter().all(|t| words.contains(t))
}

fn compare_movies(a: &Movie, b: &Movie, column: &str) -> Ordering {
    match column {
        "title" => a.title.cmp(&b.title),
        "year" => a.year.cmp(&b.year),
        "runtime" => a.runtime.cmp(&b.runtime),
        _ => a.record.id.cmp(&b.record.id),
    }
}

fn compare_reviews(a: &Review, b: &Review, column: &str) -> Ordering {
    match column {
        "rating" => a.rating.total_cmp(&b.rating),
        "author" => a.author.cmp(&b.author),
        _ => a.record.id.cmp(&b.record.id),
    }
}

fn mean(values: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    #[allow(clippy::cast_precision_loss)]
    let denom = (values.len() - 1) as f64;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / denom)
}

fn summary(movie: &Movie) -> MovieSummary {
    MovieSummary {
        id: movie.record.id,
        title: movie.title.clone(),
        year: movie.year,
        runtime: movie.runtime,
    }
}

impl EntityStore<Movie> for InMemoryStore {
    fn insert<'a>(&'a self, correlation_id: CorrelationId, draft: &'a MovieDraft) -> StoreFuture<'a, Movie> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            if inner
                .movies
                .values()
                .any(|m| m.record.correlation_id == correlation_id)
            {
                return Err(StoreError::DuplicateCorrelation {
                    kind: EntityKind::Movie,
                    correlation_id,
                });
            }
            let id = inner.next_movie_id;
            inner.next_movie_id += 1;
            let record = VersionedRecord::inserted(id, correlation_id, self.clock.now());
            let movie = Movie::from_draft(record, draft.clone());
            inner.movies.insert(id, movie.clone());
            Ok(movie)
        })
    }

    fn update<'a>(&'a self, entity: &'a Movie) -> StoreFuture<'a, Movie> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let now = self.clock.now();
            let conflict = StoreError::EditConflict {
                kind: EntityKind::Movie,
                id: entity.record.id,
                expected_version: entity.record.version,
            };
            let stored = inner
                .movies
                .get_mut(&entity.record.id)
                .filter(|m| !m.record.is_deleted() && m.record.version == entity.record.version)
                .ok_or(conflict)?;
            stored.title.clone_from(&entity.title);
            stored.year = entity.year;
            stored.runtime = entity.runtime;
            stored.genres.clone_from(&entity.genres);
            stored.record.version += 1;
            stored.record.updated_at = now;
            Ok(stored.clone())
        })
    }

    fn delete(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let now = self.clock.now();
            let movie = inner
                .movies
                .get_mut(&id)
                .filter(|m| !m.record.is_deleted())
                .ok_or_else(|| StoreError::not_found(EntityKind::Movie, id))?;
            movie.record.deleted_at = Some(now);
            Ok(())
        })
    }

    fn get(&self, id: i64) -> StoreFuture<'_, Movie> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            inner
                .live_movie(id)
                .cloned()
                .ok_or_else(|| StoreError::not_found(EntityKind::Movie, id))
        })
    }

    fn get_by_correlation(&self, correlation_id: CorrelationId) -> StoreFuture<'_, Movie> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            inner
                .movies
                .values()
                .find(|m| m.record.correlation_id == correlation_id && !m.record.is_deleted())
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind: EntityKind::Movie,
                    key: correlation_id.to_string(),
                })
        })
    }

    fn correlation_exists(&self, correlation_id: CorrelationId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            Ok(inner
                .movies
                .values()
                .any(|m| m.record.correlation_id == correlation_id))
        })
    }

    fn list<'a>(&'a self, query: &'a MovieQuery, filters: &'a Filters) -> StoreFuture<'a, Page<Movie>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let title = query.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
            let rows: Vec<Movie> = inner
                .movies
                .values()
                .filter(|m| !m.record.is_deleted())
                .filter(|m| title.is_none_or(|t| matches_terms(&m.title, t)))
                .filter(|m| query.genres.iter().all(|g| m.genres.contains(g)))
                .cloned()
                .collect();
            Ok(paginate(rows, filters, compare_movies, |m| m.record.id))
        })
    }
}

impl EntityStore<Review> for InMemoryStore {
    fn insert<'a>(&'a self, correlation_id: CorrelationId, draft: &'a ReviewDraft) -> StoreFuture<'a, Review> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            if inner
                .reviews
                .values()
                .any(|r| r.record.correlation_id == correlation_id)
            {
                return Err(StoreError::DuplicateCorrelation {
                    kind: EntityKind::Review,
                    correlation_id,
                });
            }
            if inner.live_movie(draft.movie_id).is_none() {
                return Err(StoreError::ReferenceNotFound {
                    kind: EntityKind::Movie,
                    id: draft.movie_id,
                });
            }
            let id = inner.next_review_id;
            inner.next_review_id += 1;
            let record = VersionedRecord::inserted(id, correlation_id, self.clock.now());
            let review = Review::from_draft(record, draft.clone());
            inner.reviews.insert(id, review.clone());
            Ok(review)
        })
    }

    fn update<'a>(&'a self, entity: &'a Review) -> StoreFuture<'a, Review> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let now = self.clock.now();
            let conflict = StoreError::EditConflict {
                kind: EntityKind::Review,
                id: entity.record.id,
                expected_version: entity.record.version,
            };
            let stored = inner
                .reviews
                .get_mut(&entity.record.id)
                .filter(|r| !r.record.is_deleted() && r.record.version == entity.record.version)
                .ok_or(conflict)?;
            stored.rating = entity.rating;
            stored.comment.clone_from(&entity.comment);
            stored.record.version += 1;
            stored.record.updated_at = now;
            Ok(stored.clone())
        })
    }

    fn delete(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let now = self.clock.now();
            let review = inner
                .reviews
                .get_mut(&id)
                .filter(|r| !r.record.is_deleted())
                .ok_or_else(|| StoreError::not_found(EntityKind::Review, id))?;
            review.record.deleted_at = Some(now);
            Ok(())
        })
    }

    fn get(&self, id: i64) -> StoreFuture<'_, Review> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            inner
                .reviews
                .get(&id)
                .filter(|r| !r.record.is_deleted())
                .cloned()
                .ok_or_else(|| StoreError::not_found(EntityKind::Review, id))
        })
    }

    fn get_by_correlation(&self, correlation_id: CorrelationId) -> StoreFuture<'_, Review> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            inner
                .reviews
                .values()
                .find(|r| r.record.correlation_id == correlation_id && !r.record.is_deleted())
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind: EntityKind::Review,
                    key: correlation_id.to_string(),
                })
        })
    }

    fn correlation_exists(&self, correlation_id: CorrelationId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            Ok(inner
                .reviews
                .values()
                .any(|r| r.record.correlation_id == correlation_id))
        })
    }

    fn list<'a>(&'a self, query: &'a ReviewQuery, filters: &'a Filters) -> StoreFuture<'a, Page<Review>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let author = query.author.as_deref().map(str::trim).filter(|a| !a.is_empty());
            let rows: Vec<Review> = inner
                .reviews
                .values()
                .filter(|r| !r.record.is_deleted())
                .filter(|r| query.movie_id.is_none_or(|id| r.movie_id == id))
                .filter(|r| author.is_none_or(|a| matches_terms(&r.author, a)))
                .filter(|r| query.rating.is_none_or(|rating| r.rating.total_cmp(&rating).is_eq()))
                .cloned()
                .collect();
            Ok(paginate(rows, filters, compare_reviews, |r| r.record.id))
        })
    }
}

impl RejectionLedger for InMemoryStore {
    fn record_rejection<'a>(&'a self, rejection: &'a RejectionRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            inner
                .rejections
                .entry((rejection.kind, rejection.correlation_id))
                .or_insert_with(|| rejection.clone());
            Ok(())
        })
    }

    fn find_rejection(
        &self,
        kind: EntityKind,
        correlation_id: CorrelationId,
    ) -> StoreFuture<'_, Option<RejectionRecord>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            Ok(inner.rejections.get(&(kind, correlation_id)).cloned())
        })
    }
}

impl ReportSource for InMemoryStore {
    fn top_rated(&self, limit: u32) -> StoreFuture<'_, Vec<MovieRating>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let mut rows: Vec<MovieRating> = inner
                .ratings_by_movie()
                .into_iter()
                .filter_map(|(id, ratings)| {
                    let movie = inner.live_movie(id)?;
                    Some(MovieRating {
                        id,
                        title: movie.title.clone(),
                        year: movie.year,
                        runtime: movie.runtime,
                        avg_rating: mean(&ratings),
                    })
                })
                .collect();
            rows.sort_by(|a, b| b.avg_rating.total_cmp(&a.avg_rating).then(a.id.cmp(&b.id)));
            rows.truncate(limit as usize);
            Ok(rows)
        })
    }

    fn without_reviews(&self) -> StoreFuture<'_, Vec<MovieSummary>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let rated = inner.ratings_by_movie();
            Ok(inner
                .movies
                .values()
                .filter(|m| !m.record.is_deleted() && !rated.contains_key(&m.record.id))
                .map(summary)
                .collect())
        })
    }

    fn controversial(&self, limit: u32) -> StoreFuture<'_, Vec<MovieVariance>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let mut rows: Vec<MovieVariance> = inner
                .ratings_by_movie()
                .into_iter()
                .filter_map(|(id, ratings)| {
                    let movie = inner.live_movie(id)?;
                    Some(MovieVariance {
                        id,
                        title: movie.title.clone(),
                        year: movie.year,
                        runtime: movie.runtime,
                        variance: sample_variance(&ratings),
                    })
                })
                .collect();
            // NULLS LAST, then highest variance first
            rows.sort_by(|a, b| match (a.variance, b.variance) {
                (Some(x), Some(y)) => y.total_cmp(&x).then(a.id.cmp(&b.id)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.id.cmp(&b.id),
            });
            rows.truncate(limit as usize);
            Ok(rows)
        })
    }

    fn avg_rating_by_genre(&self) -> StoreFuture<'_, Vec<GenreRating>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check_failure()?;
            let mut by_genre: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for (id, ratings) in inner.ratings_by_movie() {
                if let Some(movie) = inner.live_movie(id) {
                    for genre in &movie.genres {
                        by_genre
                            .entry(genre.clone())
                            .or_default()
                            .extend(ratings.iter().copied());
                    }
                }
            }
            let mut rows: Vec<GenreRating> = by_genre
                .into_iter()
                .map(|(genre, ratings)| GenreRating {
                    avg_rating: mean(&ratings),
                    genre,
                })
                .collect();
            rows.sort_by(|a, b| {
                b.avg_rating
                    .total_cmp(&a.avg_rating)
                    .then_with(|| a.genre.cmp(&b.genre))
            });
            Ok(rows)
        })
    }
}
