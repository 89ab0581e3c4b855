//! Correlation lookup: what became of an accepted intent.
//!
//! A record under the correlation identity wins. A record that was applied and
//! later soft-deleted reads as `NotFound`. Otherwise a rejection recorded
//! by the worker is reported. Otherwise the intent is `Pending` while the
//! timestamp embedded in its UUIDv7 identity is younger than the pending window,
//! and `NotFound` after that. Identities without a timestamp (caller-supplied
//! v4 ids) go straight to `NotFound` once nothing is stored under them.

use marquee_core::correlation::CorrelationId;
use marquee_core::environment::Clock;
use marquee_core::record::Entity;
use marquee_core::store::{EntityStore, RejectionLedger, RejectionReason, StoreError};
use marquee_core::validator::FieldErrors;
use std::sync::Arc;
use std::time::Duration;

/// Default pending window.
pub const DEFAULT_PENDING_WINDOW: Duration = Duration::from_secs(300);

/// Result of a correlation lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome<E> {
    /// The intent was applied.
    Applied(E),
    /// The intent was terminally rejected by the worker.
    Rejected {
        /// Rejection class.
        reason: RejectionReason,
        /// Field errors, for validation failures.
        fields: FieldErrors,
    },
    /// Not applied yet, still within the pending window.
    Pending,
    /// Nothing known, and too old to still be in flight.
    NotFound,
}

/// Resolves correlation identities for entity `E`.
pub struct CorrelationLookup<E: Entity> {
    store: Arc<dyn EntityStore<E>>,
    ledger: Arc<dyn RejectionLedger>,
    clock: Arc<dyn Clock>,
    pending_window: Duration,
}

impl<E: Entity> Clone for CorrelationLookup<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            clock: Arc::clone(&self.clock),
            pending_window: self.pending_window,
        }
    }
}

impl<E: Entity> CorrelationLookup<E> {
    /// Create a lookup with [`DEFAULT_PENDING_WINDOW`].
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore<E>>,
        ledger: Arc<dyn RejectionLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            pending_window: DEFAULT_PENDING_WINDOW,
        }
    }

    /// Override the pending window.
    #[must_use]
    pub const fn with_pending_window(mut self, window: Duration) -> Self {
        self.pending_window = window;
        self
    }

    /// Resolve `correlation_id`.
    ///
    /// # Errors
    ///
    /// Store or ledger failures other than "not found".
    pub async fn lookup(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<LookupOutcome<E>, StoreError> {
        match self.store.get_by_correlation(correlation_id).await {
            Ok(entity) => return Ok(LookupOutcome::Applied(entity)),
            Err(StoreError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        if self.store.correlation_exists(correlation_id).await? {
            return Ok(LookupOutcome::NotFound);
        }

        if let Some(rejection) = self.ledger.find_rejection(E::KIND, correlation_id).await? {
            return Ok(LookupOutcome::Rejected {
                reason: rejection.reason,
                fields: rejection.fields,
            });
        }

        let window =
            chrono::Duration::from_std(self.pending_window).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let in_flight = correlation_id
            .created_at()
            .is_some_and(|created| now.signed_duration_since(created) <= window);

        Ok(if in_flight {
            LookupOutcome::Pending
        } else {
            LookupOutcome::NotFound
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use marquee_core::movie::Movie;
    use marquee_core::record::EntityKind;
    use marquee_core::store::RejectionRecord;
    use marquee_core::validator::Validator;
    use marquee_testing::fixtures::movie_draft;
    use marquee_testing::{FixedClock, InMemoryStore};
    use uuid::{NoContext, Timestamp, Uuid};

    fn v7_at(clock: &FixedClock) -> CorrelationId {
        let secs = u64::try_from(clock.now().timestamp()).unwrap();
        CorrelationId::from_uuid(Uuid::new_v7(Timestamp::from_unix(NoContext, secs, 0)))
    }

    fn setup() -> (InMemoryStore, FixedClock, CorrelationLookup<Movie>) {
        let store = InMemoryStore::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap());
        let lookup = CorrelationLookup::<Movie>::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
        )
        .with_pending_window(Duration::from_secs(60));
        (store, clock, lookup)
    }

    #[tokio::test]
    async fn applied_record_wins() {
        let (store, clock, lookup) = setup();
        let cid = v7_at(&clock);
        EntityStore::<Movie>::insert(&store, cid, &movie_draft("Heat"))
            .await
            .unwrap();

        match lookup.lookup(cid).await.unwrap() {
            LookupOutcome::Applied(movie) => assert_eq!(movie.title, "Heat"),
            other => panic!("expected applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recorded_rejection_is_reported() {
        let (store, clock, lookup) = setup();
        let cid = v7_at(&clock);
        let mut validator = Validator::new();
        validator.add_error("year", "must not be in the future");
        let fields = validator.finish().unwrap_err();
        store
            .record_rejection(&RejectionRecord {
                kind: EntityKind::Movie,
                correlation_id: cid,
                reason: RejectionReason::ValidationFailed,
                fields: fields.clone(),
                rejected_at: clock.now(),
            })
            .await
            .unwrap();

        assert_eq!(
            lookup.lookup(cid).await.unwrap(),
            LookupOutcome::Rejected {
                reason: RejectionReason::ValidationFailed,
                fields,
            }
        );
    }

    #[tokio::test]
    async fn fresh_identity_is_pending_until_window_passes() {
        let (_, clock, lookup) = setup();
        let cid = v7_at(&clock);

        assert_eq!(lookup.lookup(cid).await.unwrap(), LookupOutcome::Pending);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(lookup.lookup(cid).await.unwrap(), LookupOutcome::NotFound);
    }

    #[tokio::test]
    async fn applied_then_deleted_is_not_found() {
        let (store, clock, lookup) = setup();
        let cid = v7_at(&clock);
        let movie = EntityStore::<Movie>::insert(&store, cid, &movie_draft("Heat"))
            .await
            .unwrap();
        EntityStore::<Movie>::delete(&store, movie.record.id)
            .await
            .unwrap();

        assert_eq!(lookup.lookup(cid).await.unwrap(), LookupOutcome::NotFound);
    }

    #[tokio::test]
    async fn untimestamped_identity_is_not_found() {
        let (_, _, lookup) = setup();
        let cid = CorrelationId::from_uuid(Uuid::new_v4());
        assert_eq!(lookup.lookup(cid).await.unwrap(), LookupOutcome::NotFound);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let (store, clock, lookup) = setup();
        store.fail_next(1);
        let err = lookup.lookup(v7_at(&clock)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
