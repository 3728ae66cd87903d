use super::Sink;
use crate::error::Result;
use tracing::Level;

pub const DEFAULT_LOGGER_NAME: &str = "logweave";

/// Passes lines through to the process-wide `tracing` subscriber.
///
/// The logger name and category travel as structured fields so a subscriber
/// can filter on them.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    logger_name: String,
    category: String,
}

impl ConsoleSink {
    pub fn new(logger_name: Option<&str>, category: Option<&str>) -> Self {
        Self {
            logger_name: logger_name.unwrap_or(DEFAULT_LOGGER_NAME).to_string(),
            category: category.unwrap_or_default().to_string(),
        }
    }

    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }
}

/// Map a rule severity onto a `tracing` level. Unknown names log at INFO.
pub fn severity_level(severity: &str) -> Level {
    match severity.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" | "FATAL" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl Sink for ConsoleSink {
    fn kind(&self) -> &'static str {
        "console"
    }

    fn write(&self, severity: &str, message: &str) -> Result<()> {
        let logger = self.logger_name.as_str();
        let category = self.category.as_str();
        let level = severity_level(severity);
        if level == Level::ERROR {
            tracing::error!(logger, category, "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(logger, category, "{}", message);
        } else if level == Level::DEBUG {
            tracing::debug!(logger, category, "{}", message);
        } else if level == Level::TRACE {
            tracing::trace!(logger, category, "{}", message);
        } else {
            tracing::info!(logger, category, "{}", message);
        }
        Ok(())
    }
}
