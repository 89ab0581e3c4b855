//! # Marquee Core
//!
//! Domain types and seams for the Marquee movie catalog.
//!
//! Writes enter the system as [`intent::MutationIntent`]s: the producing edge
//! validates a candidate, stamps it with a [`correlation::CorrelationId`] and
//! publishes it to a [`channel::MessageChannel`]. A consumer worker re-validates
//! and applies it to an [`store::EntityStore`], where the correlation identity is
//! the idempotency key. Reads go straight to the store.
//!
//! ## Modules
//!
//! - [`correlation`]: the correlation identity
//! - [`record`]: shared persistence columns and the [`record::Entity`] trait
//! - [`validator`]: field-level rule evaluation
//! - [`movie`], [`review`]: the two entity kinds and their rules
//! - [`intent`]: the on-the-wire mutation envelope
//! - [`filters`]: pagination, sort allow-lists and result metadata
//! - [`store`]: storage traits and errors
//! - [`channel`]: durable message channel trait and errors
//! - [`environment`]: injected dependencies (time)

pub mod channel;
pub mod correlation;
pub mod filters;
pub mod intent;
pub mod movie;
pub mod record;
pub mod review;
pub mod store;
pub mod validator;

pub use correlation::CorrelationId;
pub use record::{Entity, EntityKind, VersionedRecord};

/// Injected dependencies.
///
/// Everything time-dependent reads the clock through [`environment::Clock`] so
/// that validation and lookup windows are deterministic under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Abstracts the current time.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{DateTime, TimeZone, Utc};
    /// use marquee_core::environment::Clock;
    ///
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    ///
    /// let clock = FixedClock { time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() };
    /// assert_eq!(clock.now().timestamp(), 1_704_067_200);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
