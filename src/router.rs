//! Routing of rendered events to named sinks.
//!
//! The router maps each sink name to a route, which pairs the sink with the
//! formatter for its template. Routes are built the first time a name is
//! used and reused afterwards; a name with no configured sink gets a console
//! route named after it. Once closed, the router builds nothing new.

use crate::config::{RuleStore, SinkConfig};
use crate::error::{LogweaveError, Result};
use crate::formatter::{FormatContext, MessageFormatter};
use crate::sinks::{ConsoleSink, Sink, SinkRegistry};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A materialized sink plus its formatter.
pub struct Route {
    pub sink: Box<dyn Sink>,
    pub formatter: MessageFormatter,
}

impl Route {
    /// Render `context` with this route's template and write it.
    pub fn deliver(&self, severity: &str, context: &FormatContext) -> Result<()> {
        let line = self.formatter.format(context);
        self.sink.write_event(severity, &line, context)
    }
}

#[derive(Default)]
struct RouteTable {
    routes: HashMap<String, Arc<Route>>,
    closed: bool,
}

/// Lazily builds and caches one [`Route`] per sink name.
///
/// Sink configurations come from the rule store and sinks are created by the
/// registry, so any kind registered there can be routed to.
pub struct SinkRouter {
    store: Arc<RuleStore>,
    registry: SinkRegistry,
    table: RwLock<RouteTable>,
}

impl SinkRouter {
    /// Create a router with no routes built yet.
    ///
    /// # Arguments
    ///
    /// * `store` - Source of the sink configurations, looked up by name
    /// * `registry` - Factories for the sink kinds those configurations name
    pub fn new(store: Arc<RuleStore>, registry: SinkRegistry) -> Self {
        Self {
            store,
            registry,
            table: RwLock::new(RouteTable::default()),
        }
    }

    /// Get the route for `sink_name`, building it on first use.
    ///
    /// Concurrent first uses build the route once. A sink that cannot be
    /// created is replaced by a console sink, so this only fails after
    /// [`SinkRouter::close_all`].
    pub fn route(&self, sink_name: &str) -> Result<Arc<Route>> {
        {
            let table = self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if table.closed {
                return Err(closed(sink_name));
            }
            if let Some(route) = table.routes.get(sink_name) {
                return Ok(route.clone());
            }
        }

        let mut table = self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if table.closed {
            return Err(closed(sink_name));
        }
        if let Some(route) = table.routes.get(sink_name) {
            return Ok(route.clone());
        }

        let route = Arc::new(self.build(sink_name));
        table.routes.insert(sink_name.to_string(), route.clone());
        Ok(route)
    }

    /// Render and write one event to the sink named `sink_name`.
    pub fn deliver(&self, sink_name: &str, severity: &str, context: &FormatContext) -> Result<()> {
        self.route(sink_name)?.deliver(severity, context)
    }

    /// Number of sinks built so far.
    pub fn active_routes(&self) -> usize {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner()).routes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner()).closed
    }

    /// Close every sink built so far and stop building new ones.
    pub fn close_all(&self) {
        let routes: Vec<_> = {
            let mut table = self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            table.closed = true;
            table.routes.drain().collect()
        };
        for (name, route) in routes {
            if let Err(e) = route.sink.close() {
                warn!("Failed to close sink {}: {}", name, e);
            }
        }
    }

    fn build(&self, sink_name: &str) -> Route {
        let fallback = SinkConfig::default();
        let config = match self.store.sink(sink_name) {
            Some(config) => config,
            None => {
                debug!("No sink configured as {}, using console", sink_name);
                &fallback
            }
        };

        let sink = match self.registry.create(sink_name, config) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Could not create sink {}: {}; using console", sink_name, e);
                let logger = config.logger_name.as_deref().unwrap_or(sink_name);
                Box::new(ConsoleSink::new(Some(logger), config.category.as_deref())) as Box<dyn Sink>
            }
        };
        debug!("Created {} sink {}", sink.kind(), sink_name);

        Route {
            sink,
            formatter: MessageFormatter::new(config.format.as_deref()),
        }
    }
}

fn closed(sink_name: &str) -> LogweaveError {
    LogweaveError::Sink(format!("router closed, not routing to {}", sink_name))
}
