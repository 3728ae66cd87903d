//! The immutable rule store and target matching.
//!
//! # Matching law
//!
//! [`RuleStore::find_rule`] first looks for a rule whose target equals the
//! requested target exactly; the earliest such rule in store order wins. Only
//! when there is none does it scan wildcard rules in store order and return
//! the first whose anchored expansion matches. Two overlapping wildcard rules
//! therefore resolve to the one merged first, and an exact rule always beats
//! any wildcard rule for the same target.

use super::model::{Rule, RulesDocument, SinkConfig};
use std::collections::HashMap;

/// Sink definitions and rules merged from every rule source.
///
/// Built once and then only read; the dispatcher and the weaver share it
/// behind an `Arc`.
///
/// # Examples
///
/// ```
/// use logweave::config::{Rule, RuleStore};
///
/// let store = RuleStore::builder()
///     .rule(Rule::new("com.shop.*", "console"))
///     .rule(Rule::new("com.shop.Cart.add", "audit"))
///     .build();
///
/// assert_eq!(store.find_rule("com.shop.Cart.add").unwrap().sink, "audit");
/// assert_eq!(store.find_rule("com.shop.Cart.remove").unwrap().sink, "console");
/// assert!(store.find_rule("com.other.Thing.run").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    sinks: HashMap<String, SinkConfig>,
    rules: Vec<Rule>,
    exact: HashMap<String, usize>,
    wildcards: Vec<usize>,
}

impl RuleStore {
    /// Create a store from already merged parts.
    ///
    /// # Arguments
    ///
    /// * `sinks` - Sink definitions keyed by sink name
    /// * `rules` - Rules in store order; wildcard patterns are compiled here
    pub fn new(sinks: HashMap<String, SinkConfig>, rules: Vec<Rule>) -> Self {
        let mut store = Self {
            sinks,
            rules: Vec::with_capacity(rules.len()),
            exact: HashMap::new(),
            wildcards: Vec::new(),
        };
        for rule in rules {
            store.push_rule(rule);
        }
        store
    }

    /// Merge documents in the given order: sink maps overwrite on name
    /// collision, rule lists concatenate.
    ///
    /// # Arguments
    ///
    /// * `documents` - Parsed rule sources, earliest first
    pub fn from_documents(documents: impl IntoIterator<Item = RulesDocument>) -> Self {
        let mut store = Self::default();
        for document in documents {
            store.merge(document);
        }
        store
    }

    /// Start building a store in code.
    pub fn builder() -> RuleStoreBuilder {
        RuleStoreBuilder::default()
    }

    pub(crate) fn merge(&mut self, document: RulesDocument) {
        self.sinks.extend(document.sinks);
        for rule in document.rules {
            self.push_rule(rule);
        }
    }

    fn push_rule(&mut self, mut rule: Rule) {
        rule.compile();
        let index = self.rules.len();
        // An exact pattern is indexed even if it contains `*`, so a literal
        // target string still matches itself first.
        self.exact.entry(rule.target.clone()).or_insert(index);
        if rule.is_wildcard() {
            self.wildcards.push(index);
        }
        self.rules.push(rule);
    }

    /// Find the rule governing `target` following the matching law above.
    ///
    /// # Arguments
    ///
    /// * `target` - Fully qualified method target, `package.Type.method`
    ///
    /// # Returns
    ///
    /// The exact rule for `target` if one exists, else the first matching
    /// wildcard rule, else `None`.
    pub fn find_rule(&self, target: &str) -> Option<&Rule> {
        if let Some(&index) = self.exact.get(target) {
            return self.rules.get(index);
        }

        self.wildcards
            .iter()
            .map(|&index| &self.rules[index])
            .find(|rule| rule.wildcard_matches(target))
    }

    /// Definition of the sink called `name`, if any source declared one.
    pub fn sink(&self, name: &str) -> Option<&SinkConfig> {
        self.sinks.get(name)
    }

    pub fn sinks(&self) -> &HashMap<String, SinkConfig> {
        &self.sinks
    }

    /// All rules in store order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// True when no source contributed a sink or a rule.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty() && self.rules.is_empty()
    }
}

/// Programmatic construction, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct RuleStoreBuilder {
    sinks: HashMap<String, SinkConfig>,
    rules: Vec<Rule>,
}

impl RuleStoreBuilder {
    /// Declare a sink, replacing an earlier one of the same name.
    pub fn sink(mut self, name: impl Into<String>, config: SinkConfig) -> Self {
        self.sinks.insert(name.into(), config);
        self
    }

    /// Append a rule; earlier rules win ties.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> RuleStore {
        RuleStore::new(self.sinks, self.rules)
    }
}
