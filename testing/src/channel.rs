//! In-memory message channel.
//!
//! Each topic is a single-partition append-only log. Consumer groups track a
//! committed offset per topic; a new subscription starts at that offset, so any
//! delivery that was never committed is delivered again, as a broker would after
//! a consumer restart.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::StreamExt;
use marquee_core::channel::{
    ChannelError, ChannelMessage, Delivery, MessageChannel, MessageStream, Receipt,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Entry {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, Vec<Entry>>,
    committed: HashMap<(String, String), i64>,
    failing_publishes: usize,
    epoch: u64,
}

/// In-memory [`MessageChannel`] with failure injection.
///
/// # Example
///
/// ```
/// use marquee_testing::InMemoryChannel;
/// use marquee_core::channel::MessageChannel;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = InMemoryChannel::new();
/// channel.publish("movies-topic", "key", b"{}").await?;
///
/// let mut stream = channel.subscribe("movies-topic", "movies-group").await?;
/// let delivery = stream.next().await.unwrap()?;
/// delivery.commit().await?;
/// assert_eq!(channel.committed_offset("movies-topic", "movies-group"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryChannel {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl InMemoryChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `publish` fail with a retryable error.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner.lock().unwrap().failing_publishes = n;
    }

    /// Append a message directly, bypassing failure injection. Returns its offset.
    pub fn publish_raw(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> i64 {
        let offset = {
            let mut inner = self.inner.lock().unwrap();
            let log = inner.topics.entry(topic.to_string()).or_default();
            log.push(Entry {
                key: key.map(str::to_string),
                payload: payload.to_vec(),
            });
            i64::try_from(log.len()).unwrap() - 1
        };
        self.notify.notify_waiters();
        offset
    }

    /// Everything published to `topic` so far.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<ChannelMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .topics
            .get(topic)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(i, entry)| to_message(topic, i64::try_from(i).unwrap(), entry))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Next offset `group` will read from `topic`.
    #[must_use]
    pub fn committed_offset(&self, topic: &str, group: &str) -> i64 {
        let inner = self.inner.lock().unwrap();
        inner
            .committed
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// End every open subscription stream, as a broker disconnect would.
    pub fn disconnect_subscribers(&self) {
        self.inner.lock().unwrap().epoch += 1;
        self.notify.notify_waiters();
    }

    fn commit_hook(&self, topic: &str, group: &str, offset: i64) -> marquee_core::channel::CommitFn {
        let inner = Arc::clone(&self.inner);
        let key = (topic.to_string(), group.to_string());
        Box::new(move || {
            Box::pin(async move {
                let mut inner = inner.lock().unwrap();
                let committed = inner.committed.entry(key).or_insert(0);
                *committed = (*committed).max(offset + 1);
                Ok(())
            })
        })
    }
}

fn to_message(topic: &str, offset: i64, entry: &Entry) -> ChannelMessage {
    ChannelMessage {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: entry.key.clone(),
        payload: entry.payload.clone(),
    }
}

impl MessageChannel for InMemoryChannel {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Receipt, ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.failing_publishes > 0 {
                    inner.failing_publishes -= 1;
                    return Err(ChannelError::PublishFailed {
                        topic: topic.to_string(),
                        reason: "injected failure".to_string(),
                    });
                }
            }
            let offset = self.publish_raw(topic, Some(key), payload);
            Ok(Receipt {
                partition: 0,
                offset,
            })
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let channel = self.clone();
            let topic = topic.to_string();
            let group = group.to_string();
            let (mut next, epoch) = {
                let inner = channel.inner.lock().unwrap();
                let start = inner
                    .committed
                    .get(&(topic.clone(), group.clone()))
                    .copied()
                    .unwrap_or(0);
                (start, inner.epoch)
            };

            let stream = async_stream::stream! {
                loop {
                    let notified = channel.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let entry = {
                        let inner = channel.inner.lock().unwrap();
                        if inner.epoch != epoch {
                            break;
                        }
                        inner
                            .topics
                            .get(&topic)
                            .and_then(|log| log.get(usize::try_from(next).unwrap()))
                            .cloned()
                    };

                    match entry {
                        Some(entry) => {
                            let message = to_message(&topic, next, &entry);
                            let commit = channel.commit_hook(&topic, &group, next);
                            next += 1;
                            yield Ok(Delivery::new(message, commit));
                        }
                        None => notified.await,
                    }
                }
            };
            Ok(stream.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered() {
        let channel = InMemoryChannel::new();
        channel.publish("t", "a", b"one").await.unwrap();
        channel.publish("t", "b", b"two").await.unwrap();

        {
            let mut stream = channel.subscribe("t", "g").await.unwrap();
            let first = stream.next().await.unwrap().unwrap();
            first.commit().await.unwrap();
            let second = stream.next().await.unwrap().unwrap();
            assert_eq!(second.message.payload, b"two");
            // dropped without commit
        }

        let mut stream = channel.subscribe("t", "g").await.unwrap();
        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.message.offset, 1);
        assert_eq!(again.message.key.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let channel = InMemoryChannel::new();
        channel.publish("t", "k", b"x").await.unwrap();

        let mut a = channel.subscribe("t", "a").await.unwrap();
        a.next().await.unwrap().unwrap().commit().await.unwrap();

        assert_eq!(channel.committed_offset("t", "a"), 1);
        assert_eq!(channel.committed_offset("t", "b"), 0);
    }

    #[tokio::test]
    async fn subscriber_wakes_on_late_publish() {
        let channel = InMemoryChannel::new();
        let mut stream = channel.subscribe("t", "g").await.unwrap();

        let publisher = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "k", b"late").await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.payload, b"late");
    }

    #[tokio::test]
    async fn injected_publish_failures_are_retryable() {
        let channel = InMemoryChannel::new();
        channel.fail_next_publishes(1);

        let err = channel.publish("t", "k", b"x").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(channel.publish("t", "k", b"x").await.is_ok());
        assert_eq!(channel.messages("t").len(), 1);
    }

    #[tokio::test]
    async fn disconnect_ends_streams() {
        let channel = InMemoryChannel::new();
        let mut stream = channel.subscribe("t", "g").await.unwrap();
        channel.disconnect_subscribers();
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
