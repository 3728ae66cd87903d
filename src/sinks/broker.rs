//! Asynchronous publication to a message broker.
//!
//! The broker client itself sits behind [`BrokerPublisher`] so the crate does
//! not depend on any particular broker library. [`BrokerSink`] puts lines on a
//! bounded queue and a background worker publishes them; callers never wait
//! on the network.

use super::Sink;
use crate::error::{LogweaveError, Result};
use crate::worker::{BoundedWorker, Enqueue, QueueHandler, WorkerConfig};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const DEFAULT_LOG_TOPIC: &str = "logs";
pub const DEFAULT_BROKER_ADDRESS: &str = "localhost:9092";

#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Flush and release the connection. Called once when the owning sink or
    /// recorder shuts down.
    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

/// In-process publisher that keeps everything it is given.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn messages_for(&self, topic: &str) -> Vec<PublishedMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BrokerPublisher for MemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let mut messages = self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        messages.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

/// Keyed record waiting to be published.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub key: String,
    pub payload: String,
}

/// Publishes queued records to one topic.
pub(crate) struct TopicPublisher {
    pub(crate) topic: String,
    pub(crate) publisher: Arc<dyn BrokerPublisher>,
}

#[async_trait]
impl QueueHandler<BrokerRecord> for TopicPublisher {
    async fn handle(&self, record: BrokerRecord) -> Result<()> {
        self.publisher.publish(&self.topic, &record.key, &record.payload).await
    }

    async fn close(&self) -> Result<()> {
        self.publisher.close().await
    }
}

/// Sink that publishes each line keyed by its severity.
pub struct BrokerSink {
    topic: String,
    worker: BoundedWorker<BrokerRecord>,
}

impl BrokerSink {
    pub fn new(topic: impl Into<String>, publisher: Arc<dyn BrokerPublisher>, config: WorkerConfig) -> Result<Self> {
        let topic = topic.into();
        let handler = TopicPublisher {
            topic: topic.clone(),
            publisher,
        };
        let worker = BoundedWorker::start(format!("sink-{}", topic), config, handler)?;
        debug!("Broker sink started for topic {}", topic);
        Ok(Self { topic, worker })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn dropped(&self) -> u64 {
        self.worker.dropped()
    }

    pub fn delivered(&self) -> u64 {
        self.worker.delivered()
    }
}

impl Sink for BrokerSink {
    fn kind(&self) -> &'static str {
        "broker"
    }

    fn write(&self, severity: &str, message: &str) -> Result<()> {
        let record = BrokerRecord {
            key: severity.to_string(),
            payload: message.to_string(),
        };
        match self.worker.try_enqueue(record) {
            Enqueue::Accepted => Ok(()),
            Enqueue::Full => Err(LogweaveError::QueueOverflow(self.topic.clone())),
            Enqueue::Closed => {
                warn!("Broker sink for topic {} is closed, dropping line", self.topic);
                Ok(())
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.worker.shutdown()
    }
}
