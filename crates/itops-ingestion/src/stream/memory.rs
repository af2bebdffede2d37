use super::{dispatch, Message, MessageConsumer, MessageHandler, MessagePublisher, StreamError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Messages buffered per consumer group before publishers wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct GroupQueue {
    sender: mpsc::Sender<Message>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    committed: AtomicI64,
}

impl fmt::Debug for GroupQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupQueue")
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Topic {
    next_offset: i64,
    groups: HashMap<String, Arc<GroupQueue>>,
    /// Messages published before any group subscribed
    backlog: Vec<Message>,
}

#[derive(Debug)]
struct BrokerInner {
    topics: Mutex<HashMap<String, Topic>>,
    capacity: usize,
}

/// In-process message broker.
///
/// Every consumer group of a topic gets its own bounded queue; consumers of
/// the same group share that queue. Messages published while a topic has no
/// group are handed to the first group that subscribes.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe a consumer to `topic` within `group`
    pub fn consumer(&self, topic: &str, group: &str) -> MemoryConsumer {
        MemoryConsumer {
            topic: topic.to_string(),
            group: group.to_string(),
            queue: self.group_queue(topic, group),
            closed: CancellationToken::new(),
        }
    }

    pub fn publisher(&self, topic: &str) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
            topic: topic.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    /// Last committed offset of a group, if any
    pub fn committed(&self, topic: &str, group: &str) -> Option<i64> {
        let topics = self.inner.topics.lock();
        let offset = topics
            .get(topic)?
            .groups
            .get(group)?
            .committed
            .load(Ordering::Acquire);
        (offset >= 0).then_some(offset)
    }

    fn group_queue(&self, topic: &str, group: &str) -> Arc<GroupQueue> {
        let mut topics = self.inner.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();
        if let Some(queue) = entry.groups.get(group) {
            return Arc::clone(queue);
        }

        let backlog = std::mem::take(&mut entry.backlog);
        let (sender, receiver) = mpsc::channel(self.inner.capacity.max(backlog.len()));
        for message in backlog {
            // capacity covers the whole backlog
            let _ = sender.try_send(message);
        }
        let queue = Arc::new(GroupQueue {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            committed: AtomicI64::new(-1),
        });
        entry.groups.insert(group.to_string(), Arc::clone(&queue));
        debug!(topic, group, "Consumer group registered");
        queue
    }

    async fn deliver(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        let (message, senders) = {
            let mut topics = self.inner.topics.lock();
            let entry = topics.entry(topic.to_string()).or_default();
            let message = Message {
                topic: topic.to_string(),
                key: key.to_vec(),
                payload: value.to_vec(),
                partition: 0,
                offset: entry.next_offset,
                timestamp: Utc::now(),
            };
            entry.next_offset += 1;
            if entry.groups.is_empty() {
                entry.backlog.push(message);
                return Ok(());
            }
            let senders: Vec<_> = entry.groups.values().map(|q| q.sender.clone()).collect();
            (message, senders)
        };

        for sender in senders {
            sender
                .send(message.clone())
                .await
                .map_err(|_| StreamError::Closed(topic.to_string()))?;
        }
        Ok(())
    }
}

/// Consumer of one group queue
#[derive(Debug)]
pub struct MemoryConsumer {
    topic: String,
    group: String,
    queue: Arc<GroupQueue>,
    closed: CancellationToken,
}

impl MemoryConsumer {
    fn commit(&self, message: &Message) -> Result<(), StreamError> {
        if self.closed.is_cancelled() {
            return Err(StreamError::Commit(format!(
                "consumer {}/{} closed before offset {}",
                self.topic, self.group, message.offset
            )));
        }
        self.queue.committed.fetch_max(message.offset, Ordering::AcqRel);
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn consume(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), StreamError> {
        info!(topic = %self.topic, group = %self.group, "Consumer started");
        loop {
            let next = async { self.queue.receiver.lock().await.recv().await };
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.closed.cancelled() => break,
                message = next => message,
            };
            let Some(message) = message else {
                break;
            };

            dispatch(handler.as_ref(), &message).await;
            self.commit(&message)?;
        }
        info!(topic = %self.topic, group = %self.group, "Consumer stopped");
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.closed.cancel();
        Ok(())
    }
}

/// Publisher onto one topic
#[derive(Debug)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    topic: String,
    closed: AtomicBool,
}

#[async_trait]
impl MessagePublisher for MemoryPublisher {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed(self.topic.clone()));
        }
        self.broker.deliver(&self.topic, key, value).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records payloads and cancels once `limit` messages were seen.
    struct Recorder {
        seen: Mutex<Vec<String>>,
        limit: usize,
        cancel: CancellationToken,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn new(limit: usize, cancel: &CancellationToken) -> Arc<Self> {
            Self::failing(limit, cancel, None)
        }

        fn failing(
            limit: usize,
            cancel: &CancellationToken,
            fail_on: Option<&'static str>,
        ) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                limit,
                cancel: cancel.clone(),
                fail_on,
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &Message) -> itops_core::Result<()> {
            let body = String::from_utf8_lossy(&message.payload).into_owned();
            let count = {
                let mut seen = self.seen.lock();
                seen.push(body.clone());
                seen.len()
            };
            if count >= self.limit {
                self.cancel.cancel();
            }
            if self.fail_on == Some(body.as_str()) {
                return Err(itops_core::Error::validation("bad payload"));
            }
            Ok(())
        }
    }

    async fn run(consumer: &MemoryConsumer, handler: Arc<Recorder>, cancel: CancellationToken) {
        tokio::time::timeout(Duration::from_secs(5), consumer.consume(cancel, handler))
            .await
            .expect("consumer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_consumption() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("raw", "g1");
        let publisher = broker.publisher("raw");
        for body in ["a", "bad", "c"] {
            publisher.publish(b"k", body.as_bytes()).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let recorder = Recorder::failing(3, &cancel, Some("bad"));
        run(&consumer, Arc::clone(&recorder), cancel).await;

        assert_eq!(recorder.seen(), vec!["a", "bad", "c"]);
        assert_eq!(broker.committed("raw", "g1"), Some(2));
    }

    #[tokio::test]
    async fn test_groups_share_or_fan_out() {
        let broker = MemoryBroker::new();
        let first = broker.consumer("problems", "rca");
        let second = broker.consumer("problems", "rca");
        let audit = broker.consumer("problems", "audit");
        let publisher = broker.publisher("problems");
        for i in 0..4 {
            publisher.publish(b"", i.to_string().as_bytes()).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let shared = Recorder::new(2, &cancel);
        run(&first, Arc::clone(&shared), cancel).await;
        let cancel = CancellationToken::new();
        let rest = Recorder::new(2, &cancel);
        run(&second, Arc::clone(&rest), cancel).await;
        assert_eq!(shared.seen(), vec!["0", "1"]);
        assert_eq!(rest.seen(), vec!["2", "3"]);

        let cancel = CancellationToken::new();
        let all = Recorder::new(4, &cancel);
        run(&audit, Arc::clone(&all), cancel).await;
        assert_eq!(all.seen().len(), 4);
    }

    struct CloseDuringHandle {
        consumer: Arc<MemoryConsumer>,
    }

    #[async_trait]
    impl MessageHandler for CloseDuringHandle {
        async fn handle(&self, _message: &Message) -> itops_core::Result<()> {
            self.consumer.close().await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_fatal() {
        let broker = MemoryBroker::new();
        let consumer = Arc::new(broker.consumer("raw", "g1"));
        broker.publisher("raw").publish(b"k", b"v").await.unwrap();

        let handler = Arc::new(CloseDuringHandle {
            consumer: Arc::clone(&consumer),
        });
        let err = consumer
            .consume(CancellationToken::new(), handler)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Commit(_)));
        assert!(itops_core::Error::from(err).is_fatal());
    }

    #[tokio::test]
    async fn test_closed_publisher_rejects() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher("raw");
        publisher.close().await.unwrap();
        assert!(matches!(
            publisher.publish(b"k", b"v").await,
            Err(StreamError::Closed(_))
        ));
    }
}
