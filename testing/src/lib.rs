//! # Marquee Testing
//!
//! Testing utilities for the Marquee catalog.
//!
//! This crate provides:
//! - [`InMemoryChannel`]: a message channel with per-group committed offsets
//!   and redelivery of uncommitted messages
//! - [`InMemoryStore`]: the storage traits over plain collections, with
//!   failure injection
//! - [`FixedClock`]: deterministic time
//! - Fixtures for valid drafts
//!
//! ## Example
//!
//! ```
//! use marquee_testing::{InMemoryStore, fixtures::movie_draft};
//! use marquee_core::{CorrelationId, movie::Movie, store::EntityStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStore::new();
//! let movie = EntityStore::<Movie>::insert(&store, CorrelationId::generate(), &movie_draft("Heat")).await?;
//! assert_eq!(movie.title, "Heat");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod store;

use chrono::{DateTime, Utc};
use marquee_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::advance`].
    ///
    /// # Example
    ///
    /// ```
    /// use marquee_testing::mocks::FixedClock;
    /// use marquee_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2);
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward. Clones share the same time.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Valid drafts for tests.
pub mod fixtures {
    use marquee_core::movie::MovieDraft;
    use marquee_core::review::ReviewDraft;

    /// A valid movie draft with the given title.
    #[must_use]
    pub fn movie_draft(title: &str) -> MovieDraft {
        MovieDraft {
            title: title.to_string(),
            year: 1995,
            runtime: 120,
            genres: vec!["drama".to_string()],
        }
    }

    /// A valid review of `movie_id`.
    #[must_use]
    pub fn review_draft(movie_id: i64, rating: f32) -> ReviewDraft {
        ReviewDraft {
            movie_id,
            rating,
            comment: "Worth a watch".to_string(),
            author: "critic".to_string(),
        }
    }
}

/// Property-based testing strategies.
pub mod properties {
    use marquee_core::movie::MovieDraft;
    use proptest::prelude::*;

    /// Movie drafts that pass every rule for any year from 2024 on.
    pub fn valid_movie_draft() -> impl Strategy<Value = MovieDraft> {
        (
            "[A-Za-z][A-Za-z ]{0,40}",
            1888i32..=2024,
            1i32..400,
            proptest::sample::subsequence(vec!["drama", "comedy", "horror", "action", "sci-fi"], 1..=5),
        )
            .prop_map(|(title, year, runtime, genres)| MovieDraft {
                title,
                year,
                runtime,
                genres: genres.into_iter().map(str::to_string).collect(),
            })
    }
}

/// Test helpers.
pub mod helpers {
    /// Install a fmt subscriber honoring `RUST_LOG`. Safe to call repeatedly.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use channel::InMemoryChannel;
pub use mocks::{FixedClock, test_clock};
pub use store::InMemoryStore;

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::validator::{ValidationContext, Validate};
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn advance_is_shared_between_clones() {
        let clock = test_clock();
        let other = clock.clone();
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(other.now().timestamp() - test_clock().now().timestamp(), 30);
    }

    #[test]
    fn fixtures_are_valid() {
        let ctx = ValidationContext::from_clock(&test_clock());
        assert!(fixtures::movie_draft("Heat").validated(&ctx).is_ok());
        assert!(fixtures::review_draft(1, 4.0).validated(&ctx).is_ok());
    }

    proptest! {
        #[test]
        fn generated_movies_validate(draft in properties::valid_movie_draft()) {
            let ctx = ValidationContext { current_year: 2024 };
            prop_assert!(draft.validated(&ctx).is_ok());
        }
    }
}
