//! Message streams.
//!
//! Consumers deliver messages one at a time to a [`MessageHandler`] and
//! commit each offset after the handler returns, whether or not it failed.
//! A failed commit ends the consume loop with [`StreamError::Commit`], which
//! is fatal to the owning worker.

mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::{MemoryBroker, MemoryConsumer, MemoryPublisher, DEFAULT_QUEUE_CAPACITY};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::config::{Config, StreamConfig, Transport};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Errors raised by message transports
#[derive(Debug, Error)]
pub enum StreamError {
    /// Broker unreachable or fetch failed
    #[error("Failed to reach message broker: {0}")]
    Connection(String),

    /// Invalid transport configuration
    #[error("Invalid stream configuration: {0}")]
    Config(String),

    /// Message could not be delivered
    #[error("Failed to publish message: {0}")]
    Publish(String),

    /// Offset commit failed
    #[error("Failed to commit offset: {0}")]
    Commit(String),

    /// Transport already closed
    #[error("Stream {0} is closed")]
    Closed(String),
}

impl From<StreamError> for itops_core::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Commit(_) => itops_core::Error::Fatal(err.to_string()),
            StreamError::Config(msg) => itops_core::Error::Config(msg),
            other => itops_core::Error::Dependency(other.to_string()),
        }
    }
}

/// One delivered message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Per-message processing callback
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> itops_core::Result<()>;
}

/// Source of messages for one topic and consumer group
#[async_trait]
pub trait MessageConsumer: Send + Sync + Debug {
    /// Deliver messages until `cancel` fires or a commit fails.
    ///
    /// Cancellation returns `Ok(())`.
    async fn consume(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), StreamError>;

    /// Stop consuming and release the subscription
    async fn close(&self) -> Result<(), StreamError>;
}

/// Sink of messages for one topic
#[async_trait]
pub trait MessagePublisher: Send + Sync + Debug {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError>;

    /// Flush pending messages and stop accepting new ones
    async fn close(&self) -> Result<(), StreamError>;
}

/// Run the handler, logging instead of propagating its failure.
pub(crate) async fn dispatch(handler: &dyn MessageHandler, message: &Message) {
    if let Err(e) = handler.handle(message).await {
        error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = %e,
            body = %String::from_utf8_lossy(&message.payload),
            "Message handler failed"
        );
    }
}

/// Builds consumers and publishers for the configured transport
#[derive(Debug, Clone)]
pub enum StreamFactory {
    Memory(MemoryBroker),
    #[cfg(feature = "kafka")]
    Kafka(itops_core::config::MqConfig),
}

impl StreamFactory {
    pub fn from_config(config: &Config) -> Result<Self, StreamError> {
        match config.kafka.transport {
            Transport::Memory => Ok(Self::Memory(MemoryBroker::new())),
            #[cfg(feature = "kafka")]
            Transport::Kafka => Ok(Self::Kafka(config.dep_services.mq.clone())),
            #[cfg(not(feature = "kafka"))]
            Transport::Kafka => Err(StreamError::Config(
                "kafka transport requires the `kafka` feature".to_string(),
            )),
        }
    }

    pub fn consumer(&self, stream: &StreamConfig) -> Result<Arc<dyn MessageConsumer>, StreamError> {
        match self {
            Self::Memory(broker) => Ok(Arc::new(
                broker.consumer(&stream.topic, &stream.consumer_group),
            )),
            #[cfg(feature = "kafka")]
            Self::Kafka(mq) => Ok(Arc::new(kafka::KafkaConsumer::new(mq, stream)?)),
        }
    }

    pub fn publisher(&self, topic: &str) -> Result<Arc<dyn MessagePublisher>, StreamError> {
        match self {
            Self::Memory(broker) => Ok(Arc::new(broker.publisher(topic))),
            #[cfg(feature = "kafka")]
            Self::Kafka(mq) => Ok(Arc::new(kafka::KafkaPublisher::new(mq, topic)?)),
        }
    }
}
