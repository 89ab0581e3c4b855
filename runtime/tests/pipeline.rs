//! End-to-end intake: gateway -> channel -> workers -> store -> lookup.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use marquee_core::correlation::CorrelationId;
use marquee_core::environment::Clock;
use marquee_core::movie::{Movie, MovieDraft};
use marquee_core::review::Review;
use marquee_core::store::{EntityStore, RejectionReason, StoreError};
use marquee_runtime::{
    ConsumerWorker, CorrelationLookup, LookupOutcome, MovieHandler, ProducerGateway,
    ReviewHandler, RetryPolicy,
};
use marquee_testing::fixtures::{movie_draft, review_draft};
use marquee_testing::helpers::init_tracing;
use marquee_testing::{InMemoryChannel, InMemoryStore, test_clock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct Pipeline {
    channel: InMemoryChannel,
    store: InMemoryStore,
    gateway: ProducerGateway,
    movies: CorrelationLookup<Movie>,
    reviews: CorrelationLookup<Review>,
    shutdown: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    fn start() -> Self {
        init_tracing();
        let channel = InMemoryChannel::new();
        let store = InMemoryStore::new();
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let (shutdown, _) = broadcast::channel(1);
        let fast = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build();

        let movie_worker = ConsumerWorker::new(
            "movies",
            Arc::new(channel.clone()),
            "movies-topic",
            "movies-group",
            Arc::new(MovieHandler::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::clone(&clock),
            )),
            shutdown.subscribe(),
        )
        .with_retry_policy(fast.clone());
        let review_worker = ConsumerWorker::new(
            "reviews",
            Arc::new(channel.clone()),
            "reviews-topic",
            "reviews-group",
            Arc::new(ReviewHandler::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::clone(&clock),
            )),
            shutdown.subscribe(),
        )
        .with_retry_policy(fast);

        Self {
            gateway: ProducerGateway::new(Arc::new(channel.clone())),
            movies: CorrelationLookup::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::clone(&clock),
            ),
            reviews: CorrelationLookup::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                clock,
            ),
            workers: vec![movie_worker.spawn(), review_worker.spawn()],
            channel,
            store,
            shutdown,
        }
    }

    async fn drained(&self, topic: &str, group: &str, offset: i64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.channel.committed_offset(topic, group) < offset {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        for worker in self.workers {
            worker.await.unwrap();
        }
    }
}

#[tokio::test]
async fn movie_then_review_are_applied_and_resolvable() {
    let pipeline = Pipeline::start();

    let movie_cid = pipeline.gateway.publish(None, movie_draft("Heat")).await.unwrap();
    pipeline.drained("movies-topic", "movies-group", 1).await;

    let LookupOutcome::Applied(movie) = pipeline.movies.lookup(movie_cid).await.unwrap() else {
        panic!("movie was not applied");
    };
    assert_eq!(movie.record.version, 1);
    assert_eq!(movie.record.correlation_id, movie_cid);

    let review_cid = pipeline
        .gateway
        .publish(None, review_draft(movie.record.id, 4.5))
        .await
        .unwrap();
    pipeline.drained("reviews-topic", "reviews-group", 1).await;

    match pipeline.reviews.lookup(review_cid).await.unwrap() {
        LookupOutcome::Applied(review) => assert_eq!(review.movie_id, movie.record.id),
        other => panic!("expected applied review, got {other:?}"),
    }
    pipeline.stop().await;
}

#[tokio::test]
async fn review_of_missing_movie_is_rejected_and_committed() {
    let pipeline = Pipeline::start();

    let cid = pipeline.gateway.publish(None, review_draft(41, 3.0)).await.unwrap();
    pipeline.drained("reviews-topic", "reviews-group", 1).await;

    assert_eq!(pipeline.store.review_rows(), 0);
    match pipeline.reviews.lookup(cid).await.unwrap() {
        LookupOutcome::Rejected { reason, .. } => {
            assert_eq!(reason, RejectionReason::ReferenceNotFound);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    pipeline.stop().await;
}

#[tokio::test]
async fn same_correlation_twice_persists_one_row() {
    let pipeline = Pipeline::start();
    let cid = CorrelationId::generate();

    pipeline.gateway.publish(Some(cid), movie_draft("Alien")).await.unwrap();
    pipeline.gateway.publish(Some(cid), movie_draft("Aliens")).await.unwrap();
    pipeline.drained("movies-topic", "movies-group", 2).await;

    assert_eq!(pipeline.store.movie_rows(), 1);
    let LookupOutcome::Applied(movie) = pipeline.movies.lookup(cid).await.unwrap() else {
        panic!("movie was not applied");
    };
    assert_eq!(movie.title, "Alien");
    pipeline.stop().await;
}

#[tokio::test]
async fn invalid_intent_is_dropped_and_reported() {
    let pipeline = Pipeline::start();
    let draft = MovieDraft {
        year: 2099,
        ..movie_draft("Tomorrow")
    };

    let cid = pipeline.gateway.publish(None, draft).await.unwrap();
    pipeline.drained("movies-topic", "movies-group", 1).await;

    assert_eq!(pipeline.store.movie_rows(), 0);
    match pipeline.movies.lookup(cid).await.unwrap() {
        LookupOutcome::Rejected { reason, fields } => {
            assert_eq!(reason, RejectionReason::ValidationFailed);
            assert_eq!(fields.get("year"), Some("must not be in the future"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    pipeline.stop().await;
}

#[tokio::test]
async fn store_outage_stalls_without_losing_the_message() {
    let pipeline = Pipeline::start();
    pipeline.store.fail_next(5);

    let cid = pipeline.gateway.publish(None, movie_draft("Ran")).await.unwrap();
    pipeline.drained("movies-topic", "movies-group", 1).await;

    assert!(matches!(
        pipeline.movies.lookup(cid).await.unwrap(),
        LookupOutcome::Applied(_)
    ));
    pipeline.stop().await;
}

#[tokio::test]
async fn concurrent_updates_from_one_version_admit_a_single_winner() {
    let store = InMemoryStore::new();
    let movie = EntityStore::<Movie>::insert(&store, CorrelationId::generate(), &movie_draft("Heat"))
        .await
        .unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let mut candidate = movie.clone();
            candidate.runtime = 100 + i;
            tokio::spawn(async move { store.update(&candidate).await })
        })
        .collect();

    let mut wins = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => wins += 1,
            Err(err) => assert!(matches!(err, StoreError::EditConflict { .. })),
        }
    }

    assert_eq!(wins, 1);
    let stored = EntityStore::<Movie>::get(&store, movie.record.id).await.unwrap();
    assert_eq!(stored.record.version, 2);
}
