//! Kafka transport, enabled with the `kafka` feature.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;

use crate::envelope::{Envelope, Message};
use crate::error::{MessagingError, Result};
use crate::transport::{Consumer, Delivery, Publisher};

/// Connection settings shared by the producer and consumer.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub group_id: String,
    /// Where a group without commits starts reading.
    pub auto_offset_reset: String,
    /// How long a send may wait in the producer queue.
    pub send_timeout: Duration,
}

impl KafkaSettings {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            auto_offset_reset: "earliest".to_string(),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Publishes envelopes with a [`FutureProducer`].
pub struct KafkaPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(settings: &KafkaSettings) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| MessagingError::Connect(e.to_string()))?;

        Ok(Self {
            producer,
            send_timeout: settings.send_timeout,
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[tracing::instrument(skip(self, envelope), fields(message_type = %envelope.message_type))]
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<Delivery> {
        let payload = envelope.payload()?;
        let headers = envelope
            .headers()
            .iter()
            .fold(OwnedHeaders::new(), |headers, (name, value)| {
                headers.insert(Header {
                    key: name.as_str(),
                    value: Some(value.as_bytes()),
                })
            });

        let mut record = FutureRecord::<str, Vec<u8>>::to(topic)
            .payload(&payload)
            .headers(headers);
        if let Some(ref key) = envelope.key {
            record = record.key(key.as_str());
        }

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => {
                metrics::counter!("messages_published_total", "topic" => topic.to_string())
                    .increment(1);
                Ok(Delivery {
                    topic: topic.to_string(),
                    partition,
                    offset,
                })
            }
            Err((e, _)) => Err(MessagingError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A consumer-group member backed by a [`StreamConsumer`].
///
/// Auto-commit is off; offsets move only through [`Consumer::commit`].
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(settings: &KafkaSettings) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &settings.auto_offset_reset)
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| MessagingError::Connect(e.to_string()))?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| MessagingError::Consume(e.to_string()))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(MessagingError::Consume(e.to_string())),
            Ok(Ok(message)) => Ok(Some(to_message(&message))),
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| MessagingError::Commit(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| MessagingError::Commit(e.to_string()))
    }
}

fn to_message(message: &BorrowedMessage<'_>) -> Message {
    let headers: HashMap<String, String> = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    let value = header.value?;
                    Some((
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    Message {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        headers,
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}
