//! Intent handlers: turn one channel payload into one store outcome.
//!
//! A handler decodes, validates and applies a create intent, and classifies the
//! result. Everything it returns as `Ok` is terminal and the worker commits the
//! offset. `Err` is reserved for transient store failures, which the worker
//! retries without committing.

use marquee_core::correlation::CorrelationId;
use marquee_core::environment::Clock;
use marquee_core::intent::{IntentPayload, MutationIntent};
use marquee_core::movie::Movie;
use marquee_core::record::{Entity, EntityKind};
use marquee_core::review::Review;
use marquee_core::store::{
    EntityStore, RejectionLedger, RejectionReason, RejectionRecord, StoreError,
};
use marquee_core::validator::{FieldErrors, ValidationContext};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Why a message was terminally rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The payload is not an intent of this kind. Nothing is recorded.
    Malformed(String),
    /// Business rules failed.
    Invalid(FieldErrors),
    /// The referenced parent does not exist.
    ReferenceNotFound {
        /// Kind of the missing parent.
        kind: EntityKind,
        /// Identity of the missing parent.
        id: i64,
    },
    /// The store refused the row on a constraint validation did not cover.
    Constraint(String),
}

impl Rejection {
    const fn reason(&self) -> Option<RejectionReason> {
        match self {
            Self::Malformed(_) => None,
            Self::Invalid(_) => Some(RejectionReason::ValidationFailed),
            Self::ReferenceNotFound { .. } => Some(RejectionReason::ReferenceNotFound),
            Self::Constraint(_) => Some(RejectionReason::ConstraintViolation),
        }
    }
}

/// Terminal result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new row was inserted.
    Applied {
        /// Store-assigned identity.
        id: i64,
        /// Correlation identity of the intent.
        correlation_id: CorrelationId,
    },
    /// A row already exists under this correlation identity (redelivery).
    AlreadyApplied {
        /// Correlation identity of the intent.
        correlation_id: CorrelationId,
    },
    /// The intent can never be applied.
    Rejected {
        /// Correlation identity, when the payload carried a usable one.
        correlation_id: Option<CorrelationId>,
        /// Why.
        rejection: Rejection,
    },
}

impl Outcome {
    /// Metric and log label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::AlreadyApplied { .. } => "duplicate",
            Self::Rejected {
                rejection: Rejection::Malformed(_),
                ..
            } => "malformed",
            Self::Rejected {
                rejection: Rejection::Invalid(_),
                ..
            } => "invalid",
            Self::Rejected {
                rejection: Rejection::ReferenceNotFound { .. },
                ..
            } => "reference_not_found",
            Self::Rejected {
                rejection: Rejection::Constraint(_),
                ..
            } => "constraint",
        }
    }
}

/// Future returned by [`IntentHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Outcome, StoreError>> + Send + 'a>>;

/// Applies one channel payload.
pub trait IntentHandler: Send + Sync {
    /// Kind of intent this handler consumes.
    fn kind(&self) -> EntityKind;

    /// Decode, validate and apply `payload`.
    ///
    /// # Errors
    ///
    /// Returns a transient [`StoreError`] when the outcome is not yet known.
    fn handle<'a>(&'a self, payload: &'a [u8]) -> HandlerFuture<'a>;
}

/// Handler for create intents of entity `E`.
pub struct CreateHandler<E: Entity> {
    store: Arc<dyn EntityStore<E>>,
    ledger: Arc<dyn RejectionLedger>,
    clock: Arc<dyn Clock>,
    _entity: PhantomData<fn() -> E>,
}

/// Consumes movie create intents.
pub type MovieHandler = CreateHandler<Movie>;

/// Consumes review create intents.
pub type ReviewHandler = CreateHandler<Review>;

impl<E: Entity> CreateHandler<E> {
    /// Create a handler writing to `store` and recording rejections in `ledger`.
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
            _entity: PhantomData,
        }
    }
}

impl<E> CreateHandler<E>
where
    E: Entity,
    E::Draft: IntentPayload,
{
    async fn apply(&self, payload: &[u8]) -> Result<Outcome, StoreError> {
        let intent = match MutationIntent::<E::Draft>::decode(payload) {
            Ok(intent) => intent,
            Err(err) => {
                return Ok(Outcome::Rejected {
                    correlation_id: None,
                    rejection: Rejection::Malformed(err.to_string()),
                });
            }
        };
        let correlation_id = intent.correlation_id;

        let ctx = ValidationContext::from_clock(self.clock.as_ref());
        if let Err(fields) = intent.validated(&ctx) {
            return self.reject(correlation_id, Rejection::Invalid(fields)).await;
        }

        match self.store.insert(correlation_id, &intent.payload).await {
            Ok(entity) => Ok(Outcome::Applied {
                id: entity.record().id,
                correlation_id,
            }),
            Err(StoreError::DuplicateCorrelation { .. }) => {
                Ok(Outcome::AlreadyApplied { correlation_id })
            }
            Err(StoreError::ReferenceNotFound { kind, id }) => {
                self.reject(correlation_id, Rejection::ReferenceNotFound { kind, id })
                    .await
            }
            Err(err @ StoreError::Constraint { .. }) => {
                self.reject(correlation_id, Rejection::Constraint(err.to_string()))
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn reject(
        &self,
        correlation_id: CorrelationId,
        rejection: Rejection,
    ) -> Result<Outcome, StoreError> {
        let recordable = !correlation_id.is_nil();
        if let (true, Some(reason)) = (recordable, rejection.reason()) {
            let fields = match &rejection {
                Rejection::Invalid(fields) => fields.clone(),
                _ => FieldErrors::default(),
            };
            let record = RejectionRecord {
                kind: E::KIND,
                correlation_id,
                reason,
                fields,
                rejected_at: self.clock.now(),
            };
            self.ledger.record_rejection(&record).await?;
        }
        Ok(Outcome::Rejected {
            correlation_id: recordable.then_some(correlation_id),
            rejection,
        })
    }
}

impl<E> IntentHandler for CreateHandler<E>
where
    E: Entity,
    E::Draft: IntentPayload,
{
    fn kind(&self) -> EntityKind {
        E::KIND
    }

    fn handle<'a>(&'a self, payload: &'a [u8]) -> HandlerFuture<'a> {
        Box::pin(self.apply(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::movie::MovieDraft;
    use marquee_core::review::ReviewDraft;
    use marquee_testing::fixtures::{movie_draft, review_draft};
    use marquee_testing::{InMemoryStore, test_clock};

    fn handlers(store: &InMemoryStore) -> (MovieHandler, ReviewHandler) {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        (
            MovieHandler::new(Arc::new(store.clone()), Arc::new(store.clone()), Arc::clone(&clock)),
            ReviewHandler::new(Arc::new(store.clone()), Arc::new(store.clone()), clock),
        )
    }

    fn encode<T: IntentPayload>(cid: CorrelationId, payload: T) -> Vec<u8> {
        MutationIntent::new(cid, payload).encode().unwrap()
    }

    #[tokio::test]
    async fn applies_then_dedupes_redelivery() {
        let store = InMemoryStore::new();
        let (movies, _) = handlers(&store);
        let bytes = encode(CorrelationId::generate(), movie_draft("Heat"));

        let first = movies.handle(&bytes).await.unwrap();
        assert!(matches!(first, Outcome::Applied { id: 1, .. }));

        let second = movies.handle(&bytes).await.unwrap();
        assert_eq!(second.label(), "duplicate");
        assert_eq!(store.movie_rows(), 1);
    }

    #[tokio::test]
    async fn invalid_intent_is_rejected_and_recorded() {
        let store = InMemoryStore::new();
        let (movies, _) = handlers(&store);
        let cid = CorrelationId::generate();
        let bytes = encode(cid, MovieDraft::default());

        let outcome = movies.handle(&bytes).await.unwrap();
        let fields = match &outcome {
            Outcome::Rejected {
                rejection: Rejection::Invalid(fields),
                correlation_id: Some(id),
            } if *id == cid => fields.clone(),
            _ => FieldErrors::default(),
        };
        assert_eq!(fields.get("title"), Some("must be provided"));

        let recorded = store.find_rejection(EntityKind::Movie, cid).await.unwrap().unwrap();
        assert_eq!(recorded.reason, RejectionReason::ValidationFailed);
        assert_eq!(store.movie_rows(), 0);
    }

    #[tokio::test]
    async fn review_of_missing_movie_is_rejected() {
        let store = InMemoryStore::new();
        let (_, reviews) = handlers(&store);
        let cid = CorrelationId::generate();

        let outcome = reviews.handle(&encode(cid, review_draft(404, 3.0))).await.unwrap();

        assert_eq!(outcome.label(), "reference_not_found");
        assert_eq!(store.review_rows(), 0);
        let recorded = store.find_rejection(EntityKind::Review, cid).await.unwrap().unwrap();
        assert_eq!(recorded.reason, RejectionReason::ReferenceNotFound);
    }

    #[tokio::test]
    async fn redelivered_review_of_deleted_movie_is_not_recorded_as_rejected() {
        let store = InMemoryStore::new();
        let (_, reviews) = handlers(&store);
        let movie = EntityStore::<Movie>::insert(&store, CorrelationId::generate(), &movie_draft("Heat"))
            .await
            .unwrap();
        let cid = CorrelationId::generate();
        let bytes = encode(cid, review_draft(movie.record.id, 4.0));

        assert_eq!(reviews.handle(&bytes).await.unwrap().label(), "applied");
        EntityStore::<Movie>::delete(&store, movie.record.id)
            .await
            .unwrap();

        assert_eq!(reviews.handle(&bytes).await.unwrap().label(), "duplicate");
        assert_eq!(store.rejection_count(), 0);
    }

    #[tokio::test]
    async fn garbage_and_wrong_kind_are_malformed() {
        let store = InMemoryStore::new();
        let (movies, _) = handlers(&store);

        assert_eq!(movies.handle(b"\x00\x01").await.unwrap().label(), "malformed");

        let review_bytes = encode::<ReviewDraft>(CorrelationId::generate(), review_draft(1, 2.0));
        assert_eq!(movies.handle(&review_bytes).await.unwrap().label(), "malformed");
        assert_eq!(store.rejection_count(), 0);
    }

    #[tokio::test]
    async fn transient_store_failure_is_an_error() {
        let store = InMemoryStore::new();
        let (movies, _) = handlers(&store);
        store.fail_next(1);

        let err = movies
            .handle(&encode(CorrelationId::generate(), movie_draft("Ran")))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.movie_rows(), 0);
    }

    #[tokio::test]
    async fn missing_correlation_is_rejected_but_not_recorded() {
        let store = InMemoryStore::new();
        let (movies, _) = handlers(&store);
        let bytes = br#"{"kind":"movie","title":"Heat","year":1995,"runtime":170,"genres":["crime"]}"#;

        let outcome = movies.handle(bytes).await.unwrap();
        assert_eq!(outcome.label(), "invalid");
        assert_eq!(store.rejection_count(), 0);
    }
}
