//! Redpanda message channel for Marquee.
//!
//! Implements [`MessageChannel`] on top of rdkafka, so it works against
//! Redpanda or any Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! - **Durable publish**: the producer runs with `acks=all` and idempotence on;
//!   `publish` resolves only once every in-sync replica has the message, or
//!   fails after the configured timeout.
//! - **Manual commit**: `enable.auto.commit=false`. Each [`Delivery`] carries a
//!   commit hook that synchronously commits `offset + 1` for its partition.
//!   A delivery dropped without commit is redelivered after the next rebalance
//!   or restart.
//! - **Ordering**: per partition. Intents are keyed so that everything touching
//!   the same parent lands on the same partition.
//!
//! # Example
//!
//! ```no_run
//! use marquee_redpanda::RedpandaChannel;
//! use marquee_core::channel::MessageChannel;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = RedpandaChannel::builder()
//!     .brokers("localhost:9092")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! channel.publish("movies-topic", "key", b"{}").await?;
//!
//! let mut stream = channel.subscribe("movies-topic", "movies-group").await?;
//! if let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     // handle delivery.message.payload, then:
//!     delivery.commit().await?;
//! }
//! # Ok(())
//! # }
//! ```

use marquee_core::channel::{
    ChannelError, ChannelMessage, CommitFn, Delivery, MessageChannel, MessageStream, Receipt,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Kafka-protocol [`MessageChannel`].
///
/// One producer is shared by all publishes. Every `subscribe` call creates its
/// own consumer, which leaves the group when the returned stream and all of its
/// deliveries are dropped.
pub struct RedpandaChannel {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    session_timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl std::fmt::Debug for RedpandaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaChannel")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("session_timeout", &self.session_timeout)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .finish_non_exhaustive()
    }
}

impl RedpandaChannel {
    /// Create a channel with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, ChannelError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaChannelBuilder {
        RedpandaChannelBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for a [`RedpandaChannel`].
///
/// # Example
///
/// ```no_run
/// use marquee_redpanda::RedpandaChannel;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = RedpandaChannel::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .timeout(Duration::from_secs(10))
///     .session_timeout(Duration::from_secs(7))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug)]
pub struct RedpandaChannelBuilder {
    brokers: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    session_timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaChannelBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// How long a publish may wait for the broker's acknowledgment.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group session timeout.
    ///
    /// Default: 7 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Deliveries buffered between the Kafka consumer and the subscriber.
    /// Zero is treated as one.
    ///
    /// Default: 64
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a group with no committed offset starts: "earliest" or "latest".
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaChannel`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaChannel, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                ChannelError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let channel = RedpandaChannel {
            producer,
            brokers,
            timeout,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(7)),
            buffer_size: self.buffer_size.unwrap_or(64),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %channel.brokers,
            compression,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            auto_offset_reset = %channel.auto_offset_reset,
            "Redpanda channel created"
        );
        Ok(channel)
    }
}

fn to_message(message: &BorrowedMessage<'_>) -> ChannelMessage {
    ChannelMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

/// Commit hook for one message: commits the offset after it.
fn commit_hook(consumer: Arc<StreamConsumer>, topic: String, partition: i32, offset: i64) -> CommitFn {
    Box::new(move || {
        Box::pin(async move {
            let mut positions = TopicPartitionList::new();
            positions
                .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| ChannelError::CommitFailed(e.to_string()))?;

            tokio::task::spawn_blocking(move || consumer.commit(&positions, CommitMode::Sync))
                .await
                .map_err(|e| ChannelError::CommitFailed(e.to_string()))?
                .map_err(|e| ChannelError::CommitFailed(e.to_string()))?;

            tracing::trace!(topic = %topic, partition, offset, "Offset committed");
            Ok(())
        })
    })
}

impl MessageChannel for RedpandaChannel {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Receipt, ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let record = FutureRecord::to(topic).payload(payload).key(key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, partition, offset, "Message acknowledged");
                    Ok(Receipt { partition, offset })
                }
                Err((kafka_error, _)) => {
                    tracing::warn!(topic, error = %kafka_error, "Publish not acknowledged");
                    Err(ChannelError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| ChannelError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic])
                .map_err(|e| ChannelError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;

            tracing::info!(
                topic,
                group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed"
            );

            let consumer = Arc::new(consumer);
            let consumer_topic = topic.to_string();
            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                loop {
                    let received = tokio::select! {
                        () = tx.closed() => break,
                        received = stream.next() => received,
                    };
                    let Some(received) = received else { break };
                    let item = match received {
                        Ok(message) => {
                            let commit = commit_hook(
                                Arc::clone(&consumer),
                                message.topic().to_string(),
                                message.partition(),
                                message.offset(),
                            );
                            Ok(Delivery::new(to_message(&message), commit))
                        }
                        Err(e) => Err(ChannelError::Transport(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };

                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
                tracing::debug!(topic = %consumer_topic, "Subscriber dropped, closing consumer");
            });

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
