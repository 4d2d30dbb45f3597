//! In-process bus.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::envelope::{Envelope, Message};
use crate::error::{MessagingError, Result};
use crate::transport::{Consumer, Delivery, Publisher};

/// A partitioned, offset-tracking bus that lives in memory.
///
/// Behaves like a small broker: messages with the same key land on the same
/// partition in publish order, consumer groups track committed offsets, and
/// a new consumer resumes from its group's last commit. Cloning shares the
/// same bus.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    partitions: i32,
    state: Mutex<BusState>,
    published: Notify,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<(String, String, i32), i64>,
    sequence: u64,
    round_robin: usize,
}

struct Record {
    sequence: u64,
    message: Message,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// A bus with one partition per topic.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            inner: Arc::new(BusInner {
                partitions: partitions.max(1),
                state: Mutex::new(BusState::default()),
                published: Notify::new(),
            }),
        }
    }

    /// Creates a consumer in `group`.
    pub fn consumer(&self, group: impl Into<String>) -> InMemoryConsumer {
        InMemoryConsumer {
            bus: self.clone(),
            group: group.into(),
            topics: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Appends a raw record, bypassing envelope framing.
    pub fn publish_raw(
        &self,
        topic: &str,
        key: Option<&str>,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Delivery {
        let delivery = {
            let mut state = self.lock();
            let partition = match key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % self.inner.partitions as u64) as i32
                }
                None => {
                    state.round_robin = state.round_robin.wrapping_add(1);
                    (state.round_robin % self.inner.partitions as usize) as i32
                }
            };
            state.sequence += 1;
            let sequence = state.sequence;

            let partitions = self.inner.partitions as usize;
            let log = &mut state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| (0..partitions).map(|_| Vec::new()).collect())
                [partition as usize];
            let offset = log.len() as i64;
            log.push(Record {
                sequence,
                message: Message {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    key: key.map(str::to_string),
                    headers,
                    payload,
                },
            });

            Delivery {
                topic: topic.to_string(),
                partition,
                offset,
            }
        };
        self.inner.published.notify_waiters();
        delivery
    }

    /// Every message on `topic`, in publish order.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let state = self.lock();
        let mut records: Vec<&Record> = state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(|r| r.message.clone()).collect()
    }

    /// Message types on `topic`, in publish order.
    pub fn message_types(&self, topic: &str) -> Vec<String> {
        self.messages(topic)
            .iter()
            .filter_map(Message::message_type)
            .collect()
    }

    /// The next offset `group` will read from a partition, if it committed one.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // The state has no invariants a panicking holder could break halfway.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for InMemoryBus {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<Delivery> {
        let payload = envelope.payload()?;
        let headers = envelope.headers().into_iter().collect();
        let delivery = self.publish_raw(topic, envelope.key.as_deref(), headers, payload);
        metrics::counter!("messages_published_total", "topic" => topic.to_string()).increment(1);
        Ok(delivery)
    }
}

/// Consumer half of [`InMemoryBus`].
pub struct InMemoryConsumer {
    bus: InMemoryBus,
    group: String,
    topics: Vec<String>,
    positions: HashMap<(String, i32), i64>,
}

impl InMemoryConsumer {
    fn next_message(&mut self) -> Option<Message> {
        let state = self.bus.lock();
        for topic in &self.topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (partition, log) in partitions.iter().enumerate() {
                let partition = partition as i32;
                let position = self
                    .positions
                    .entry((topic.clone(), partition))
                    .or_insert_with(|| {
                        state
                            .committed
                            .get(&(self.group.clone(), topic.clone(), partition))
                            .copied()
                            .unwrap_or(0)
                    });
                if let Some(record) = log.get(*position as usize) {
                    *position += 1;
                    return Some(record.message.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        self.topics = topics.to_vec();
        self.positions.clear();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        if self.topics.is_empty() {
            return Err(MessagingError::Consume("consumer is not subscribed".to_string()));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let bus = self.bus.clone();
            let notified = bus.inner.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.next_message() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<()> {
        let mut state = self.bus.lock();
        let committed = state
            .committed
            .entry((self.group.clone(), message.topic.clone(), message.partition))
            .or_insert(0);
        *committed = (*committed).max(message.offset + 1);
        Ok(())
    }
}
