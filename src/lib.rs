//! Rule-driven method logging and user-action recording.
//!
//! logweave has two halves that read the same rule sources:
//!
//! - The [`weaver`] runs at build time. It walks a tree of source units and
//!   inserts calls to the runtime at the entry, return and exception points
//!   of every method a rule selects.
//! - The runtime receives those calls. [`dispatcher`] renders each event with
//!   the rule's template ([`formatter`]) and routes it to the rule's sink
//!   ([`router`], [`sinks`]); [`action`] records who did what to which entity
//!   for methods of service and controller types.
//!
//! Native Rust code can opt in without weaving through [`instrument::CallSite`].
//!
//! # Examples
//!
//! ```
//! use logweave::prelude::*;
//! use serde_json::json;
//!
//! let store = RuleStore::builder()
//!     .rule(Rule::new("shop.Cart.add", "console").with_triggers([TriggerPoint::OnEntry]))
//!     .build();
//! let dispatcher = Dispatcher::new(store);
//! dispatcher.log_entry("shop.Cart.add", "Cart", "add", &[json!("sku-1")]);
//! dispatcher.shutdown();
//! ```

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod formatter;
pub mod instrument;
pub mod router;
pub mod sinks;
pub mod weaver;
pub mod worker;

pub use error::{LogweaveError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::action::{clear_actor_context, set_actor_context, ActionInjector, ActorContext, Recorder};
    pub use crate::config::{ConfigLoader, Rule, RuleStore, SinkConfig, TriggerPoint};
    pub use crate::dispatcher::Dispatcher;
    pub use crate::error::{LogweaveError, Result};
    pub use crate::formatter::{ErrorInfo, FormatContext, MessageFormatter};
    pub use crate::instrument::CallSite;
    pub use crate::sinks::{Sink, SinkRegistry};
    pub use crate::weaver::{ProjectProcessor, WeaveOptions, WeaveReport};
}
