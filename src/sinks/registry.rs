use super::broker::{BrokerPublisher, BrokerSink, DEFAULT_BROKER_ADDRESS, DEFAULT_LOG_TOPIC};
use super::composite::{CompositeSink, TemplatedSink};
use super::console::ConsoleSink;
use super::file::FileSink;
use super::Sink;
use crate::config::{FileTarget, SinkConfig};
use crate::error::{LogweaveError, Result};
use crate::worker::WorkerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a sink from its name and configuration.
pub type SinkFactory = Arc<dyn Fn(&str, &SinkConfig) -> Result<Box<dyn Sink>> + Send + Sync>;

/// Opens a publisher for a broker address (`SinkConfig::address`).
pub type BrokerConnector = Arc<dyn Fn(&str) -> Result<Arc<dyn BrokerPublisher>> + Send + Sync>;

pub const DEFAULT_SINK_KIND: &str = "console";

/// Maps sink kind names to factories.
///
/// Kind lookup is case-insensitive. An unknown kind falls back to the console
/// sink with a warning. Any `files` listed on a non-composite sink are added
/// as extra destinations next to the primary one.
#[derive(Clone)]
pub struct SinkRegistry {
    factories: HashMap<String, SinkFactory>,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkRegistry {
    /// Console, file and composite kinds. Broker kinds need a publisher; see
    /// [`SinkRegistry::with_publisher`].
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        let console: SinkFactory = Arc::new(|name: &str, config: &SinkConfig| {
            let logger = config.logger_name.as_deref().unwrap_or(name);
            Ok(Box::new(ConsoleSink::new(Some(logger), config.category.as_deref())) as Box<dyn Sink>)
        });
        for alias in ["console", "terminal", "log", "tracing", "log4j", "log4j2"] {
            registry.register(alias, console.clone());
        }

        registry.register(
            "file",
            Arc::new(|_name: &str, config: &SinkConfig| {
                Ok(Box::new(FileSink::from_config(config)?) as Box<dyn Sink>)
            }),
        );

        registry.register(
            "composite",
            Arc::new(|_name: &str, config: &SinkConfig| {
                let mut children = Vec::new();
                if config.path.is_some() {
                    children.push(Box::new(FileSink::from_config(config)?) as Box<dyn Sink>);
                }
                children.extend(file_children(&config.files));
                Ok(Box::new(CompositeSink::new(children)) as Box<dyn Sink>)
            }),
        );

        registry
    }

    /// Also register the `broker` and `kafka` kinds, publishing every broker
    /// sink through the one `publisher` whatever its address.
    pub fn with_publisher(self, publisher: Arc<dyn BrokerPublisher>) -> Self {
        self.with_connector(Arc::new(move |_address: &str| Ok(publisher.clone())))
    }

    /// Also register the `broker` and `kafka` kinds. Each broker sink asks
    /// `connector` for a publisher to its configured address, or
    /// [`DEFAULT_BROKER_ADDRESS`] when none is set.
    pub fn with_connector(mut self, connector: BrokerConnector) -> Self {
        let broker: SinkFactory = Arc::new(move |name: &str, config: &SinkConfig| {
            let address = config.address.as_deref().unwrap_or(DEFAULT_BROKER_ADDRESS);
            let topic = config.topic.as_deref().unwrap_or(DEFAULT_LOG_TOPIC);
            let publisher = connector(address)?;
            debug!("Broker sink {} publishing to {} at {}", name, topic, address);

            let mut worker = WorkerConfig::default();
            if let Some(capacity) = config.queue_capacity {
                worker = worker.with_capacity(capacity);
            }
            Ok(Box::new(BrokerSink::new(topic, publisher, worker)?) as Box<dyn Sink>)
        });
        self.register("broker", broker.clone());
        self.register("kafka", broker);
        self
    }

    pub fn register(&mut self, kind: &str, factory: SinkFactory) {
        self.factories.insert(kind.to_ascii_lowercase(), factory);
    }

    pub fn unregister(&mut self, kind: &str) -> Option<SinkFactory> {
        self.factories.remove(&kind.to_ascii_lowercase())
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_ascii_lowercase())
    }

    pub fn create(&self, name: &str, config: &SinkConfig) -> Result<Box<dyn Sink>> {
        let kind = config
            .kind
            .as_deref()
            .unwrap_or(DEFAULT_SINK_KIND)
            .trim()
            .to_ascii_lowercase();

        let factory = match self.factories.get(&kind) {
            Some(factory) => factory,
            None => {
                warn!("Unknown sink kind {:?} for sink {}, using console", kind, name);
                self.factories
                    .get(DEFAULT_SINK_KIND)
                    .ok_or_else(|| LogweaveError::Config("console sink not registered".to_string()))?
            }
        };
        let primary = factory(name, config)?;

        if kind == "composite" || config.files.is_empty() {
            return Ok(primary);
        }

        let mut children = vec![primary];
        children.extend(file_children(&config.files));
        Ok(Box::new(CompositeSink::new(children)))
    }
}

fn file_children(targets: &[FileTarget]) -> Vec<Box<dyn Sink>> {
    targets
        .iter()
        .map(|target| {
            let file: Box<dyn Sink> = Box::new(FileSink::from_target(target));
            match target.format.as_deref() {
                Some(format) => Box::new(TemplatedSink::new(format, file)) as Box<dyn Sink>,
                None => file,
            }
        })
        .collect()
}
