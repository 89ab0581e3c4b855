//! Durable message channel abstraction.
//!
//! The channel carries serialized [`MutationIntent`](crate::intent::MutationIntent)s
//! from the producer gateway to the consumer workers.
//!
//! # Key Principles
//!
//! - **Durable publish**: `publish` resolves only after the broker has
//!   acknowledged the write.
//! - **At-least-once**: a message may be delivered more than once. Consumers
//!   dedupe on the correlation identity.
//! - **Ordered within partition**: messages sharing a key keep publish order.
//! - **Manual commit**: a consumer group's offset advances only when a
//!   [`Delivery`] is explicitly committed. An uncommitted delivery is redelivered
//!   to the next subscription of the same group.
//!
//! # Implementations
//!
//! - `RedpandaChannel` (`marquee-redpanda`) for production.
//! - `InMemoryChannel` (`marquee-testing`) for tests.

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not acknowledge a publish
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to join the consumer group or subscribe
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Offset commit was rejected
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// A received message could not be read
    #[error("Deserialization failed: {0}")]
    Deserialization(String),
}

impl ChannelError {
    /// Whether the same operation may succeed if retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::PublishFailed { .. } | Self::Transport(_)
        )
    }
}

/// Where a published message landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Partition the broker assigned.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// A message as received from the channel.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key, if any.
    pub key: Option<String>,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl fmt::Debug for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelMessage")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Future returned by a commit.
pub type CommitFuture = Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send>>;

/// Commit hook supplied by the channel implementation.
pub type CommitFn = Box<dyn FnOnce() -> CommitFuture + Send>;

/// A received message together with the means to acknowledge it.
///
/// Dropping a delivery without calling [`Delivery::commit`] leaves the offset
/// where it was, so the message is redelivered on the next subscription.
pub struct Delivery {
    /// The received message.
    pub message: ChannelMessage,
    commit: CommitFn,
}

impl Delivery {
    /// Pair a message with its commit hook.
    #[must_use]
    pub fn new(message: ChannelMessage, commit: CommitFn) -> Self {
        Self { message, commit }
    }

    /// Advance the consumer group's offset past this message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::CommitFailed`] if the broker rejects the commit.
    pub async fn commit(self) -> Result<(), ChannelError> {
        (self.commit)().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Delivery, ChannelError>> + Send>>;

/// Trait for message channel implementations.
///
/// # Dyn Compatibility
///
/// Returns boxed futures so channels can be shared as `Arc<dyn MessageChannel>`
/// between the gateway and the workers.
pub trait MessageChannel: Send + Sync {
    /// Publish `payload` to `topic` under `key` and wait for the broker's
    /// durability acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PublishFailed`] on timeout or broker rejection.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Receipt, ChannelError>> + Send + 'a>>;

    /// Join `group` and stream messages from `topic`, starting at the group's
    /// committed offset.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn message() -> ChannelMessage {
        ChannelMessage {
            topic: "movies-topic".to_string(),
            partition: 0,
            offset: 7,
            key: Some("k".to_string()),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn commit_runs_the_hook_once() {
        let committed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&committed);
        let delivery = Delivery::new(
            message(),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        delivery.commit().await.unwrap();
        assert!(committed.load(Ordering::SeqCst));
    }

    #[test]
    fn retryable_errors() {
        assert!(ChannelError::Transport("reset".into()).is_retryable());
        assert!(
            ChannelError::PublishFailed {
                topic: "t".into(),
                reason: "timeout".into()
            }
            .is_retryable()
        );
        assert!(!ChannelError::Deserialization("bad".into()).is_retryable());
        assert!(!ChannelError::CommitFailed("fenced".into()).is_retryable());
    }

    #[test]
    fn debug_hides_payload_bytes() {
        let rendered = format!("{:?}", message());
        assert!(rendered.contains("payload_len: 2"));
    }
}
