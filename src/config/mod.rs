//! Rule configuration: sink definitions, rules and the merged rule store.
//!
//! The same sources are read twice: once by the weaver at build time to decide
//! which methods to instrument, and again by the runtime dispatcher at startup
//! to decide what each instrumented call emits.

pub mod loader;
pub mod model;
pub mod store;

pub use loader::{ConfigLoader, SourceFormat};
pub use model::{parse_size, FileTarget, Rule, RulesDocument, SinkConfig, TriggerPoint};
pub use store::{RuleStore, RuleStoreBuilder};
