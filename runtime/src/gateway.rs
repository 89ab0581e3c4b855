//! Producer gateway: the write-intake edge of the pipeline.
//!
//! [`ProducerGateway::publish`] stamps a payload with a correlation identity,
//! serializes it as a [`MutationIntent`], and publishes it on the topic of its
//! entity kind under the kind's partition key. It returns once the broker has
//! acknowledged durable receipt. That means queued, not applied; callers follow
//! up through correlation lookup.

use crate::metrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use marquee_core::channel::{ChannelError, MessageChannel};
use marquee_core::correlation::CorrelationId;
use marquee_core::intent::{IntentPayload, MutationIntent};
use marquee_core::record::EntityKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from [`ProducerGateway::publish`]. Either way the intent was NOT accepted.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The broker did not acknowledge the publish within the retry budget.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(#[source] ChannelError),

    /// The payload could not be serialized.
    #[error("Failed to serialize intent: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Topic per entity kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Topic for movie intents.
    pub movies: String,
    /// Topic for review intents.
    pub reviews: String,
}

impl Topics {
    /// Topic carrying intents of `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Movie => &self.movies,
            EntityKind::Review => &self.reviews,
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            movies: "movies-topic".to_string(),
            reviews: "reviews-topic".to_string(),
        }
    }
}

/// Publishes mutation intents to the channel.
#[derive(Clone)]
pub struct ProducerGateway {
    channel: Arc<dyn MessageChannel>,
    topics: Topics,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for ProducerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerGateway")
            .field("topics", &self.topics)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ProducerGateway {
    /// Create a gateway with default topics and retry policy.
    #[must_use]
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            channel,
            topics: Topics::default(),
            retry_policy: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(2))
                .jitter(true)
                .build(),
        }
    }

    /// Override the topic names.
    #[must_use]
    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Override the publish retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Topics this gateway publishes to.
    #[must_use]
    pub const fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publish a create intent.
    ///
    /// Uses `correlation_id` when the caller supplied a non-nil one, otherwise
    /// generates a fresh UUIDv7. Returns the identity the intent was published
    /// under.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ChannelUnavailable`] if the broker did not acknowledge
    /// within the retry budget; [`GatewayError::Serialization`] if the payload
    /// cannot be encoded.
    pub async fn publish<T: IntentPayload>(
        &self,
        correlation_id: Option<CorrelationId>,
        payload: T,
    ) -> Result<CorrelationId, GatewayError> {
        let correlation_id = correlation_id
            .filter(|id| !id.is_nil())
            .unwrap_or_else(CorrelationId::generate);
        let intent = MutationIntent::new(correlation_id, payload);
        let kind = T::KIND.as_str();
        let topic = self.topics.for_kind(T::KIND);
        let key = intent.partition_key();
        let bytes = intent.encode()?;
        let (key, bytes) = (key.as_str(), bytes.as_slice());

        let started = Instant::now();
        let result = retry_with_predicate(
            self.retry_policy.clone(),
            || self.channel.publish(topic, key, bytes),
            ChannelError::is_retryable,
        )
        .await;

        match result {
            Ok(receipt) => {
                metrics::record_published(kind, started.elapsed());
                tracing::info!(
                    kind,
                    %correlation_id,
                    topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Intent published"
                );
                Ok(correlation_id)
            }
            Err(err) => {
                metrics::record_publish_failure(kind);
                tracing::error!(kind, %correlation_id, topic, error = %err, "Intent not accepted");
                Err(GatewayError::ChannelUnavailable(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::movie::MovieDraft;
    use marquee_core::review::ReviewDraft;
    use marquee_testing::InMemoryChannel;

    fn fast_policy(retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(retries)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    fn review(movie_id: i64) -> ReviewDraft {
        ReviewDraft {
            movie_id,
            rating: 4.0,
            comment: "tense".to_string(),
            author: "kim".to_string(),
        }
    }

    #[tokio::test]
    async fn generates_a_v7_identity_when_absent() {
        let channel = InMemoryChannel::new();
        let gateway = ProducerGateway::new(Arc::new(channel.clone()));

        let cid = gateway.publish(None, MovieDraft::default()).await.unwrap();

        assert!(cid.created_at().is_some());
        let messages = channel.messages("movies-topic");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some(cid.to_string().as_str()));
    }

    #[tokio::test]
    async fn keeps_caller_identity_and_keys_reviews_by_movie() {
        let channel = InMemoryChannel::new();
        let gateway = ProducerGateway::new(Arc::new(channel.clone()));
        let supplied = CorrelationId::generate();

        let cid = gateway.publish(Some(supplied), review(77)).await.unwrap();

        assert_eq!(cid, supplied);
        let messages = channel.messages("reviews-topic");
        assert_eq!(messages[0].key.as_deref(), Some("77"));
        let intent = MutationIntent::<ReviewDraft>::decode(&messages[0].payload).unwrap();
        assert_eq!(intent.correlation_id, supplied);
        assert_eq!(intent.payload.movie_id, 77);
    }

    #[tokio::test]
    async fn nil_identity_is_replaced() {
        let channel = InMemoryChannel::new();
        let gateway = ProducerGateway::new(Arc::new(channel));
        let cid = gateway
            .publish(Some(CorrelationId::nil()), MovieDraft::default())
            .await
            .unwrap();
        assert!(!cid.is_nil());
    }

    #[tokio::test]
    async fn retries_transient_publish_failures() {
        let channel = InMemoryChannel::new();
        channel.fail_next_publishes(2);
        let gateway =
            ProducerGateway::new(Arc::new(channel.clone())).with_retry_policy(fast_policy(3));

        assert!(gateway.publish(None, MovieDraft::default()).await.is_ok());
        assert_eq!(channel.messages("movies-topic").len(), 1);
    }

    #[tokio::test]
    async fn reports_unavailable_when_budget_is_spent() {
        let channel = InMemoryChannel::new();
        channel.fail_next_publishes(10);
        let gateway =
            ProducerGateway::new(Arc::new(channel.clone())).with_retry_policy(fast_policy(2));

        let err = gateway.publish(None, MovieDraft::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChannelUnavailable(_)));
        assert!(channel.messages("movies-topic").is_empty());
    }

    #[tokio::test]
    async fn custom_topics_are_used() {
        let channel = InMemoryChannel::new();
        let gateway = ProducerGateway::new(Arc::new(channel.clone())).with_topics(Topics {
            movies: "m".to_string(),
            reviews: "r".to_string(),
        });
        gateway.publish(None, review(1)).await.unwrap();
        assert_eq!(channel.messages("r").len(), 1);
    }
}
