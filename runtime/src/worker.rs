//! Consumer worker: the subscribe, process, commit loop.
//!
//! One worker runs per entity kind. It joins its consumer group, hands every
//! delivery to an [`IntentHandler`], and commits the offset only once the
//! handler returns a terminal [`Outcome`].
//!
//! ```text
//! loop {
//!     subscribe(topic, group)                      -> Subscribed
//!     loop {
//!         next delivery | shutdown                 -> Polling
//!         handle, backing off on transient errors  -> Processing
//!         commit                                   -> Committed
//!     }
//!     stream ended or subscribe failed: wait, resubscribe
//! }
//! shutdown                                         -> Stopping -> Stopped
//! ```
//!
//! Shutdown is observed while polling, while waiting to resubscribe, and while
//! backing off. It is never observed in the middle of a store write: an
//! in-flight message finishes and commits before the worker stops. A shutdown
//! that interrupts a backoff leaves the message uncommitted; it is redelivered to
//! the next subscription and deduplicated by correlation identity.

use crate::handlers::{IntentHandler, Outcome};
use crate::metrics;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use marquee_core::channel::{Delivery, MessageChannel, MessageStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Observable lifecycle state of a [`ConsumerWorker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, not yet subscribed.
    Starting,
    /// Joined the consumer group.
    Subscribed,
    /// Waiting for the next delivery.
    Polling,
    /// Handling a delivery, including transient-error backoff.
    Processing,
    /// The last delivery's offset was committed.
    Committed,
    /// Shutdown observed; closing the subscription.
    Stopping,
    /// The loop has exited.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Resubscribe,
    Stop,
}

/// Long-running consumer for one topic.
///
/// # Example
///
/// ```rust,ignore
/// let (shutdown_tx, _) = broadcast::channel(1);
/// let worker = ConsumerWorker::new(
///     "movies",
///     channel,
///     "movies-topic",
///     "movies-group",
///     Arc::new(MovieHandler::new(store.clone(), store, clock)),
///     shutdown_tx.subscribe(),
/// );
/// let handle = worker.spawn();
/// ```
pub struct ConsumerWorker {
    name: String,
    channel: Arc<dyn MessageChannel>,
    topic: String,
    group: String,
    handler: Arc<dyn IntentHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_policy: RetryPolicy,
    resubscribe_delay: Duration,
    state: watch::Sender<WorkerState>,
}

impl std::fmt::Debug for ConsumerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWorker")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConsumerWorker {
    /// Create a worker.
    ///
    /// Store retries default to 100ms doubling up to 30s, with jitter, and never
    /// give up. Resubscription waits 5 seconds.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn MessageChannel>,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn IntentHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            name: name.into(),
            channel,
            topic: topic.into(),
            group: group.into(),
            handler,
            shutdown,
            retry_policy: RetryPolicy::builder().jitter(true).build(),
            resubscribe_delay: Duration::from_secs(5),
            state,
        }
    }

    /// Override the store backoff schedule. `max_retries` is ignored.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the wait before resubscribing.
    #[must_use]
    pub const fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Watch the worker's state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run the worker on a background task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        let kind = self.handler.kind().as_str();
        info!(worker = %self.name, kind, topic = %self.topic, group = %self.group, "Consumer worker started");

        loop {
            let subscribed = tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                result = self.channel.subscribe(&self.topic, &self.group) => result,
            };

            match subscribed {
                Ok(stream) => {
                    self.set_state(WorkerState::Subscribed);
                    info!(worker = %self.name, topic = %self.topic, group = %self.group, "Subscribed");
                    if self.consume(stream).await == Flow::Stop {
                        break;
                    }
                    warn!(
                        worker = %self.name,
                        delay_ms = millis(self.resubscribe_delay),
                        "Subscription ended, resubscribing"
                    );
                }
                Err(err) => {
                    error!(
                        worker = %self.name,
                        topic = %self.topic,
                        error = %err,
                        delay_ms = millis(self.resubscribe_delay),
                        "Failed to subscribe, retrying"
                    );
                }
            }

            if self.pause(self.resubscribe_delay).await == Flow::Stop {
                break;
            }
        }

        self.set_state(WorkerState::Stopping);
        self.set_state(WorkerState::Stopped);
        info!(worker = %self.name, "Consumer worker stopped");
    }

    async fn consume(&mut self, mut stream: MessageStream) -> Flow {
        loop {
            self.set_state(WorkerState::Polling);
            let next = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!(worker = %self.name, "Shutdown signal received");
                    self.set_state(WorkerState::Stopping);
                    return Flow::Stop;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => match self.process(delivery).await {
                    Flow::Continue => {}
                    flow => return flow,
                },
                Some(Err(err)) => {
                    warn!(worker = %self.name, error = %err, "Error receiving from channel");
                }
                None => return Flow::Resubscribe,
            }
        }
    }

    async fn process(&mut self, delivery: Delivery) -> Flow {
        self.set_state(WorkerState::Processing);
        let started = Instant::now();
        let kind = self.handler.kind().as_str();
        let (partition, offset) = (delivery.message.partition, delivery.message.offset);

        let mut attempt = 0;
        let outcome = loop {
            let result = self.handler.handle(&delivery.message.payload).await;
            match result {
                Ok(outcome) => break outcome,
                Err(err) => {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    metrics::record_store_retry(kind);
                    error!(
                        worker = %self.name,
                        kind,
                        partition,
                        offset,
                        attempt,
                        delay_ms = millis(delay),
                        error = %err,
                        "Store unavailable, retrying message"
                    );
                    if self.pause(delay).await == Flow::Stop {
                        warn!(worker = %self.name, partition, offset, "Stopped during backoff, message left uncommitted");
                        return Flow::Stop;
                    }
                    attempt += 1;
                }
            }
        };

        log_outcome(&self.name, kind, partition, offset, &outcome);
        metrics::record_outcome(kind, outcome.label(), started.elapsed());

        match delivery.commit().await {
            Ok(()) => {
                self.set_state(WorkerState::Committed);
                Flow::Continue
            }
            Err(err) => {
                error!(worker = %self.name, partition, offset, error = %err, "Offset commit failed");
                Flow::Resubscribe
            }
        }
    }

    /// Sleep for `delay` unless shutdown arrives first.
    async fn pause(&mut self, delay: Duration) -> Flow {
        tokio::select! {
            biased;
            _ = self.shutdown.recv() => {
                self.set_state(WorkerState::Stopping);
                Flow::Stop
            }
            () = tokio::time::sleep(delay) => Flow::Continue,
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

fn log_outcome(worker: &str, kind: &'static str, partition: i32, offset: i64, outcome: &Outcome) {
    let label = outcome.label();
    match outcome {
        Outcome::Applied { id, correlation_id } => {
            info!(worker, kind, partition, offset, %correlation_id, id, outcome = label, "Intent applied");
        }
        Outcome::AlreadyApplied { correlation_id } => {
            info!(worker, kind, partition, offset, %correlation_id, outcome = label, "Intent already applied");
        }
        Outcome::Rejected {
            correlation_id,
            rejection,
        } => {
            warn!(
                worker,
                kind,
                partition,
                offset,
                correlation_id = ?correlation_id,
                outcome = label,
                rejection = ?rejection,
                "Intent rejected"
            );
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerFuture, MovieHandler};
    use marquee_core::record::EntityKind;
    use marquee_core::correlation::CorrelationId;
    use marquee_core::environment::Clock;
    use marquee_core::intent::MutationIntent;
    use marquee_testing::fixtures::movie_draft;
    use marquee_testing::{InMemoryChannel, InMemoryStore, test_clock};

    const TOPIC: &str = "movies-topic";
    const GROUP: &str = "movies-group";

    struct Harness {
        channel: InMemoryChannel,
        store: InMemoryStore,
        shutdown: broadcast::Sender<()>,
    }

    impl Harness {
        fn new() -> Self {
            let (shutdown, _) = broadcast::channel(1);
            Self {
                channel: InMemoryChannel::new(),
                store: InMemoryStore::new(),
                shutdown,
            }
        }

        fn movie_handler(&self) -> MovieHandler {
            let clock: Arc<dyn Clock> = Arc::new(test_clock());
            MovieHandler::new(
                Arc::new(self.store.clone()),
                Arc::new(self.store.clone()),
                clock,
            )
        }

        fn worker(&self, initial_delay: Duration) -> ConsumerWorker {
            self.worker_with(Arc::new(self.movie_handler()), initial_delay)
        }

        fn worker_with(
            &self,
            handler: Arc<dyn IntentHandler>,
            initial_delay: Duration,
        ) -> ConsumerWorker {
            ConsumerWorker::new(
                "movies",
                Arc::new(self.channel.clone()),
                TOPIC,
                GROUP,
                handler,
                self.shutdown.subscribe(),
            )
            .with_retry_policy(
                RetryPolicy::builder()
                    .initial_delay(initial_delay)
                    .max_delay(initial_delay)
                    .build(),
            )
            .with_resubscribe_delay(Duration::from_millis(10))
        }

        fn publish_movie(&self, cid: CorrelationId, title: &str) {
            let bytes = MutationIntent::new(cid, movie_draft(title)).encode().unwrap();
            self.channel.publish_raw(TOPIC, Some(&cid.to_string()), &bytes);
        }

        async fn wait_committed(&self, offset: i64) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.channel.committed_offset(TOPIC, GROUP) < offset {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        }
    }

    /// Takes a while before applying, so shutdown can land mid-message.
    struct SlowHandler {
        inner: MovieHandler,
        delay: Duration,
    }

    impl IntentHandler for SlowHandler {
        fn kind(&self) -> EntityKind {
            self.inner.kind()
        }

        fn handle<'a>(&'a self, payload: &'a [u8]) -> HandlerFuture<'a> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.handle(payload).await
            })
        }
    }

    #[tokio::test]
    async fn applies_and_commits() {
        let h = Harness::new();
        let handle = h.worker(Duration::from_millis(1)).spawn();
        h.publish_movie(CorrelationId::generate(), "Heat");

        h.wait_committed(1).await;
        assert_eq!(h.store.movie_rows(), 1);

        h.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn redelivery_is_committed_without_a_second_row() {
        let h = Harness::new();
        let cid = CorrelationId::generate();
        h.publish_movie(cid, "Heat");
        h.publish_movie(cid, "Heat (director's cut)");
        let handle = h.worker(Duration::from_millis(1)).spawn();

        h.wait_committed(2).await;
        assert_eq!(h.store.movie_rows(), 1);

        h.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn poison_message_is_committed() {
        let h = Harness::new();
        h.channel.publish_raw(TOPIC, None, b"not json");
        h.publish_movie(CorrelationId::generate(), "Ran");
        let handle = h.worker(Duration::from_millis(1)).spawn();

        h.wait_committed(2).await;
        assert_eq!(h.store.movie_rows(), 1);

        h.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn transient_store_errors_stall_then_apply() {
        let h = Harness::new();
        h.store.fail_next(3);
        h.publish_movie(CorrelationId::generate(), "Ran");
        let handle = h.worker(Duration::from_millis(1)).spawn();

        h.wait_committed(1).await;
        assert_eq!(h.store.movie_rows(), 1);

        h.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_during_backoff_leaves_message_uncommitted() {
        let h = Harness::new();
        h.store.fail_next(usize::MAX);
        h.publish_movie(CorrelationId::generate(), "Ran");
        let worker = h.worker(Duration::from_secs(60));
        let mut state = worker.state();
        let handle = worker.spawn();

        state
            .wait_for(|s| *s == WorkerState::Processing)
            .await
            .unwrap();
        h.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.channel.committed_offset(TOPIC, GROUP), 0);
        assert_eq!(*state.borrow(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_while_processing_finishes_and_commits() {
        let h = Harness::new();
        let handler = SlowHandler {
            inner: h.movie_handler(),
            delay: Duration::from_millis(100),
        };
        h.publish_movie(CorrelationId::generate(), "Heat");
        let worker = h.worker_with(Arc::new(handler), Duration::from_millis(1));
        let mut state = worker.state();
        let handle = worker.spawn();

        state
            .wait_for(|s| *s == WorkerState::Processing)
            .await
            .unwrap();
        h.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.channel.committed_offset(TOPIC, GROUP), 1);
        assert_eq!(h.store.movie_rows(), 1);
        assert_eq!(*state.borrow(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn resubscribes_after_disconnect() {
        let h = Harness::new();
        let worker = h.worker(Duration::from_millis(1));
        let mut state = worker.state();
        let handle = worker.spawn();

        state.wait_for(|s| *s == WorkerState::Polling).await.unwrap();
        h.channel.disconnect_subscribers();
        h.publish_movie(CorrelationId::generate(), "Heat");

        h.wait_committed(1).await;
        assert_eq!(h.store.movie_rows(), 1);

        h.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn idle_worker_stops_on_signal() {
        let h = Harness::new();
        let worker = h.worker(Duration::from_millis(1));
        let mut state = worker.state();
        let handle = worker.spawn();

        state.wait_for(|s| *s == WorkerState::Polling).await.unwrap();
        h.shutdown.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(*state.borrow(), WorkerState::Stopped);
    }
}
