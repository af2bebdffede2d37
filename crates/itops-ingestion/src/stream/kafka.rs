//! Kafka transport backed by `rdkafka`.

use super::{dispatch, Message, MessageConsumer, MessageHandler, MessagePublisher, StreamError};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use itops_core::config::{MqConfig, StreamConfig};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as _};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Prefetch bound per consumer
const QUEUED_MAX_KBYTES: &str = "1024";

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Base client settings: brokers and SASL.
fn client_config(mq: &MqConfig) -> Result<ClientConfig, StreamError> {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", mq.brokers());

    if mq.sasl_enabled() {
        let mechanism = match mq.auth.mechanism.trim() {
            "" | "PLAIN" | "plain" => "PLAIN",
            "SCRAM-SHA-256" => "SCRAM-SHA-256",
            "SCRAM-SHA-512" => "SCRAM-SHA-512",
            other => {
                return Err(StreamError::Config(format!("unsupported SASL mechanism: {other}")))
            }
        };
        config
            .set("security.protocol", "SASL_PLAINTEXT")
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", &mq.auth.username)
            .set("sasl.password", &mq.auth.password);
        info!(brokers = %mq.brokers(), mechanism, "Kafka client uses SASL_PLAINTEXT");
    } else {
        config.set("security.protocol", "PLAINTEXT");
        info!(brokers = %mq.brokers(), "Kafka client uses PLAINTEXT");
    }
    Ok(config)
}

fn to_message(msg: &BorrowedMessage<'_>) -> Message {
    let timestamp = msg
        .timestamp()
        .to_millis()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    Message {
        topic: msg.topic().to_string(),
        key: msg.key().map(<[u8]>::to_vec).unwrap_or_default(),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        partition: msg.partition(),
        offset: msg.offset(),
        timestamp,
    }
}

/// Consumer of one topic within one group, committing manually
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    group: String,
}

impl fmt::Debug for KafkaConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl KafkaConsumer {
    pub fn new(mq: &MqConfig, stream: &StreamConfig) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = client_config(mq)?
            .set("group.id", &stream.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("queued.max.messages.kbytes", QUEUED_MAX_KBYTES)
            .set("socket.connection.setup.timeout.ms", "10000")
            .create()
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        consumer
            .subscribe(&[stream.topic.as_str()])
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        Ok(Self {
            consumer,
            topic: stream.topic.clone(),
            group: stream.consumer_group.clone(),
        })
    }

    fn commit(&self, message: &Message) -> Result<(), StreamError> {
        let mut partitions = TopicPartitionList::new();
        partitions
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| StreamError::Commit(e.to_string()))?;
        self.consumer
            .commit(&partitions, CommitMode::Sync)
            .map_err(|e| StreamError::Commit(e.to_string()))
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumer {
    async fn consume(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), StreamError> {
        info!(topic = %self.topic, group = %self.group, "Kafka consumer started");
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.consumer.recv() => received.map(|m| to_message(&m)),
            };
            let message = received.map_err(|e| StreamError::Connection(e.to_string()))?;

            dispatch(handler.as_ref(), &message).await;
            self.commit(&message)?;
        }
        info!(topic = %self.topic, group = %self.group, "Kafka consumer stopped");
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Producer onto one topic; the message key picks the partition
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaPublisher {
    pub fn new(mq: &MqConfig, topic: &str) -> Result<Self, StreamError> {
        let producer: FutureProducer = client_config(mq)?
            .set("partitioner", "murmur2_random")
            .set("acks", "1")
            .set("compression.type", "snappy")
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(value);
        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| StreamError::Publish(e.to_string()))
    }

    async fn close(&self) -> Result<(), StreamError> {
        if let Err(e) = self.producer.flush(Timeout::After(FLUSH_TIMEOUT)) {
            warn!(topic = %self.topic, error = %e, "Kafka producer flush failed");
            return Err(StreamError::Publish(e.to_string()));
        }
        Ok(())
    }
}
