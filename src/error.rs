//! Error types and result aliases for logweave.
//!
//! [`LogweaveError`] covers every failure the crate can describe. Only the
//! configuration-loading and explicit construction APIs ever hand one back to
//! a caller; the hot-path entry points (`log_*`, `record_*`) swallow them so
//! that instrumentation cannot change the outcome of an instrumented call.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogweaveError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// One method could not be instrumented and was left as it was
    #[error("Weaving error in {target}: {reason}")]
    Weaving { target: String, reason: String },

    #[error("Sink error: {0}")]
    Sink(String),

    /// A bounded delivery queue was full and the newest item was dropped
    #[error("Queue full, dropped item for {0}")]
    QueueOverflow(String),

    #[error("Publish error: {0}")]
    Publish(String),

    /// A background worker did not finish within its shutdown budget
    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl LogweaveError {
    pub(crate) fn weaving(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Weaving {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used by every fallible logweave API.
pub type Result<T> = std::result::Result<T, LogweaveError>;
