//! Action recorders.
//!
//! Three recorders ship with the crate:
//! - [`NoopRecorder`] discards everything and reports itself disabled
//! - [`MemoryRecorder`] keeps a bounded in-process history that can be queried
//! - [`BrokerRecorder`] publishes each action as one JSON line through a
//!   [`BrokerPublisher`] from a bounded background queue
//!
//! [`RecorderRegistry`] builds one by kind name from [`RecorderSettings`],
//! which are usually read from the environment.

use super::model::{Action, ActionClass, OperationType};
use crate::error::Result;
use crate::sinks::{BrokerPublisher, DEFAULT_BROKER_ADDRESS};
use crate::worker::{BoundedWorker, Enqueue, QueueHandler, WorkerConfig};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const RECORDER_TYPE_ENV: &str = "ACTION_RECORDER_TYPE";
pub const RECORDER_ADDRESS_ENV: &str = "ACTION_RECORDER_CONFIG";
pub const RECORDER_TOPIC_ENV: &str = "ACTION_LOG_TOPIC";
pub const DEFAULT_ACTION_TOPIC: &str = "action-logs";
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

pub trait Recorder: Send + Sync {
    fn record(&self, action: Action);

    fn is_enabled(&self) -> bool {
        true
    }

    /// Flush pending actions and stop background work. Idempotent.
    fn shutdown(&self) {}
}

/// Discards every action.
#[derive(Debug, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record(&self, _action: Action) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Bounded in-memory history of actions, oldest first.
///
/// When full, the oldest tenth of the history is evicted to make room.
pub struct MemoryRecorder {
    actions: Mutex<VecDeque<Action>>,
    capacity: usize,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn with_actions<T>(&self, f: impl FnOnce(&VecDeque<Action>) -> T) -> T {
        let actions = self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&actions)
    }

    fn filtered(&self, predicate: impl Fn(&Action) -> bool) -> Vec<Action> {
        self.with_actions(|actions| actions.iter().filter(|a| predicate(a)).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.with_actions(VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn actions(&self) -> Vec<Action> {
        self.filtered(|_| true)
    }

    /// Actions whose actor id or email equals `user`.
    pub fn actions_for_actor(&self, user: &str) -> Vec<Action> {
        self.filtered(|a| a.is_by(user))
    }

    pub fn for_operation(&self, operation: OperationType) -> Vec<Action> {
        self.filtered(|a| a.operation == operation)
    }

    pub fn for_class(&self, class: ActionClass) -> Vec<Action> {
        self.filtered(|a| a.action_class == class)
    }

    pub fn failures(&self) -> Vec<Action> {
        self.filtered(|a| !a.success)
    }

    /// The `n` most recent actions, newest first.
    pub fn recent(&self, n: usize) -> Vec<Action> {
        self.with_actions(|actions| actions.iter().rev().take(n).cloned().collect())
    }

    pub fn counts_by_operation(&self) -> HashMap<OperationType, usize> {
        self.with_actions(|actions| {
            let mut counts = HashMap::new();
            for action in actions {
                *counts.entry(action.operation).or_insert(0) += 1;
            }
            counts
        })
    }

    pub fn clear(&self) {
        self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl Recorder for MemoryRecorder {
    fn record(&self, action: Action) {
        let mut actions = self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if actions.len() >= self.capacity {
            let len = actions.len();
            let evict = (self.capacity / 10).max(1).min(len);
            actions.drain(..evict);
            debug!("Action history full, evicted {} oldest actions", evict);
        }
        actions.push_back(action);
    }
}

/// Publishes actions keyed by actor through a bounded background queue.
pub struct BrokerRecorder {
    topic: String,
    worker: BoundedWorker<Action>,
}

struct ActionPublisher {
    topic: String,
    publisher: Arc<dyn BrokerPublisher>,
}

#[async_trait]
impl QueueHandler<Action> for ActionPublisher {
    async fn handle(&self, action: Action) -> Result<()> {
        self.publisher
            .publish(&self.topic, action.partition_key(), &action.to_structured_log())
            .await
    }

    async fn close(&self) -> Result<()> {
        self.publisher.close().await
    }
}

impl BrokerRecorder {
    pub fn new(topic: impl Into<String>, publisher: Arc<dyn BrokerPublisher>, config: WorkerConfig) -> Result<Self> {
        let topic = topic.into();
        let handler = ActionPublisher {
            topic: topic.clone(),
            publisher,
        };
        let worker = BoundedWorker::start(format!("actions-{}", topic), config, handler)?;
        info!("Action recorder publishing to topic {}", topic);
        Ok(Self { topic, worker })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn delivered(&self) -> u64 {
        self.worker.delivered()
    }

    pub fn dropped(&self) -> u64 {
        self.worker.dropped()
    }
}

impl Recorder for BrokerRecorder {
    fn record(&self, action: Action) {
        match self.worker.try_enqueue(action) {
            Enqueue::Accepted => {}
            Enqueue::Full => debug!("Action queue for {} is full, dropping action", self.topic),
            Enqueue::Closed => debug!("Action recorder for {} is shut down, dropping action", self.topic),
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.worker.shutdown() {
            warn!("Action recorder for {} did not shut down cleanly: {}", self.topic, e);
        }
    }
}

/// Inputs for building a recorder.
#[derive(Clone, Default)]
pub struct RecorderSettings {
    pub kind: Option<String>,
    pub address: Option<String>,
    pub topic: Option<String>,
    pub capacity: Option<usize>,
    pub publisher: Option<Arc<dyn BrokerPublisher>>,
}

impl RecorderSettings {
    /// Read `ACTION_RECORDER_TYPE`, `ACTION_RECORDER_CONFIG` and
    /// `ACTION_LOG_TOPIC`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            kind: var(RECORDER_TYPE_ENV),
            address: var(RECORDER_ADDRESS_ENV),
            topic: var(RECORDER_TOPIC_ENV),
            capacity: None,
            publisher: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn BrokerPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

pub type RecorderFactory = Arc<dyn Fn(&RecorderSettings) -> Result<Arc<dyn Recorder>> + Send + Sync>;

/// Maps recorder kind names to factories. Lookup is case-insensitive.
#[derive(Clone)]
pub struct RecorderRegistry {
    factories: HashMap<String, RecorderFactory>,
}

impl Default for RecorderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        let noop: RecorderFactory = Arc::new(|_: &RecorderSettings| Ok(Arc::new(NoopRecorder) as Arc<dyn Recorder>));
        registry.register("none", noop.clone());
        registry.register("noop", noop);

        let memory: RecorderFactory = Arc::new(|settings: &RecorderSettings| {
            let capacity = settings.capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
            Ok(Arc::new(MemoryRecorder::new(capacity)) as Arc<dyn Recorder>)
        });
        registry.register("memory", memory.clone());
        registry.register("inmemory", memory);

        let broker: RecorderFactory = Arc::new(|settings: &RecorderSettings| {
            let Some(publisher) = settings.publisher.clone() else {
                warn!(
                    "No broker publisher for {}, action recording disabled",
                    settings.address.as_deref().unwrap_or(DEFAULT_BROKER_ADDRESS)
                );
                return Ok(Arc::new(NoopRecorder) as Arc<dyn Recorder>);
            };
            let topic = settings.topic.as_deref().unwrap_or(DEFAULT_ACTION_TOPIC);
            let mut config = WorkerConfig::default();
            if let Some(capacity) = settings.capacity {
                config = config.with_capacity(capacity);
            }
            Ok(Arc::new(BrokerRecorder::new(topic, publisher, config)?) as Arc<dyn Recorder>)
        });
        registry.register("broker", broker.clone());
        registry.register("kafka", broker);

        registry
    }

    pub fn register(&mut self, kind: &str, factory: RecorderFactory) {
        self.factories.insert(kind.to_ascii_lowercase(), factory);
    }

    /// Build the recorder for `settings.kind`. A missing kind means `none`;
    /// an unknown one logs a warning and also yields the no-op recorder.
    pub fn create(&self, settings: &RecorderSettings) -> Result<Arc<dyn Recorder>> {
        let kind = settings.kind.as_deref().unwrap_or("none").trim().to_ascii_lowercase();
        match self.factories.get(&kind) {
            Some(factory) => factory(settings),
            None => {
                warn!("Unknown action recorder type {:?}, action recording disabled", kind);
                Ok(Arc::new(NoopRecorder))
            }
        }
    }
}
