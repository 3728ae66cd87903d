//! Output destinations for formatted log lines.
//!
//! A [`Sink`] receives one already-rendered line plus its severity. Sinks are
//! created lazily by name through a [`SinkRegistry`] the first time a rule
//! routes to them, and closed when the dispatcher shuts down.

pub mod broker;
pub mod composite;
pub mod console;
pub mod file;
pub mod registry;

pub use broker::{
    BrokerPublisher, BrokerSink, MemoryBroker, PublishedMessage, DEFAULT_BROKER_ADDRESS, DEFAULT_LOG_TOPIC,
};
pub use composite::{CompositeSink, TemplatedSink};
pub use console::ConsoleSink;
pub use file::FileSink;
pub use registry::{BrokerConnector, SinkFactory, SinkRegistry};

use crate::error::Result;
use crate::formatter::FormatContext;

/// A destination for rendered lines.
///
/// Implementations must be shareable across threads: one sink instance
/// serves every rule that routes to its name.
pub trait Sink: Send + Sync {
    /// Short kind name, e.g. `console`.
    fn kind(&self) -> &'static str;

    /// Write one rendered line.
    ///
    /// # Arguments
    ///
    /// * `severity` - The rule's severity label, e.g. `INFO`
    /// * `message` - The line, already rendered by the route's formatter
    fn write(&self, severity: &str, message: &str) -> Result<()>;

    /// Write with access to the event that produced `message`. Sinks that
    /// render their own template override this; the rest just write the line.
    fn write_event(&self, severity: &str, message: &str, context: &FormatContext) -> Result<()> {
        let _ = context;
        self.write(severity, message)
    }

    /// Flush and release resources. Writes after close may fail or reopen.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
