//! Rule and sink definitions as they appear in rule sources.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Point in a method's control flow where instrumentation fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerPoint {
    OnEntry,
    OnReturn,
    OnException,
}

impl TriggerPoint {
    pub const ALL: [TriggerPoint; 3] =
        [TriggerPoint::OnEntry, TriggerPoint::OnReturn, TriggerPoint::OnException];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPoint::OnEntry => "OnEntry",
            TriggerPoint::OnReturn => "OnReturn",
            TriggerPoint::OnException => "OnException",
        }
    }
}

impl fmt::Display for TriggerPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logging rule: which targets it covers, when it fires and where it goes.
///
/// A rule with an empty trigger set never fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// `<owning-type>.<member>` or a pattern containing `*`
    pub target: String,
    #[serde(default = "default_severity", alias = "criticality")]
    pub severity: String,
    #[serde(default, alias = "why")]
    pub triggers: Vec<TriggerPoint>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "logger")]
    pub sink: String,
    #[serde(skip)]
    matcher: Option<Regex>,
}

fn default_severity() -> String {
    "INFO".to_string()
}

impl Rule {
    pub fn new(target: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            severity: default_severity(),
            triggers: Vec::new(),
            message: None,
            sink: sink.into(),
            matcher: None,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_triggers(mut self, triggers: impl IntoIterator<Item = TriggerPoint>) -> Self {
        self.triggers = triggers.into_iter().collect();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn triggers_on(&self, point: TriggerPoint) -> bool {
        self.triggers.contains(&point)
    }

    pub fn is_inert(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.target.contains('*')
    }

    /// Compile the wildcard matcher. Each `*` becomes an anchored `.*`; every
    /// other character matches literally.
    pub(crate) fn compile(&mut self) {
        if !self.is_wildcard() {
            self.matcher = None;
            return;
        }

        let pattern = self.target.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
        // Escaped literals joined by `.*` always form a valid expression.
        self.matcher = Regex::new(&format!("^{}$", pattern)).ok();
    }

    pub(crate) fn wildcard_matches(&self, target: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(target))
    }
}

/// Additional file destination of a sink, optionally with its own template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileTarget {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_append")]
    pub append: bool,
    #[serde(default, alias = "maxSize")]
    pub max_size: Option<String>,
    #[serde(default, alias = "maxFiles")]
    pub max_files: Option<usize>,
}

fn default_append() -> bool {
    true
}

/// Configuration of a named sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default, alias = "output")]
    pub kind: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    /// Logger name used by the console sink
    #[serde(default, alias = "log4jLogger", alias = "loggerName")]
    pub logger_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_append")]
    pub append: bool,
    #[serde(default, alias = "maxSize")]
    pub max_size: Option<String>,
    #[serde(default, alias = "maxFiles")]
    pub max_files: Option<usize>,
    /// Broker address
    #[serde(default, alias = "bootstrapServers")]
    pub address: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, alias = "queueCapacity")]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub files: Vec<FileTarget>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: None,
            format: None,
            logger_name: None,
            category: None,
            path: None,
            append: true,
            max_size: None,
            max_files: None,
            address: None,
            topic: None,
            queue_capacity: None,
            files: Vec::new(),
        }
    }
}

impl SinkConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_file(mut self, target: FileTarget) -> Self {
        self.files.push(target);
        self
    }
}

/// One parsed rule source, before merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default, alias = "loggers")]
    pub sinks: HashMap<String, SinkConfig>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Parse a size such as `10MB`, `512KB`, `1GB` or a plain byte count.
pub fn parse_size(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = trimmed.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = trimmed.strip_suffix('B') {
        (n, 1)
    } else {
        (trimmed.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_trigger_queries() {
        let rule = Rule::new("a.B.c", "sink")
            .with_triggers([TriggerPoint::OnReturn, TriggerPoint::OnException]);

        assert!(!rule.triggers_on(TriggerPoint::OnEntry));
        assert!(rule.triggers_on(TriggerPoint::OnReturn));
        assert!(rule.triggers_on(TriggerPoint::OnException));
        assert!(!rule.is_inert());
    }

    #[test]
    fn test_rule_without_triggers_is_inert() {
        let rule = Rule::new("a.B.c", "sink");
        assert!(rule.is_inert());
    }

    #[test]
    fn test_wildcard_compiles_anchored() {
        let mut rule = Rule::new("a.b.*", "sink");
        rule.compile();

        assert!(rule.wildcard_matches("a.b.C"));
        assert!(rule.wildcard_matches("a.b.D"));
        assert!(!rule.wildcard_matches("a.c.C"));
        assert!(!rule.wildcard_matches("xa.b.C"));
    }

    #[test]
    fn test_wildcard_dots_are_literal() {
        let mut rule = Rule::new("a.b*", "sink");
        rule.compile();

        assert!(rule.wildcard_matches("a.bC"));
        assert!(!rule.wildcard_matches("aXbC"));
    }

    #[test]
    fn test_rule_deserializes_original_field_names() {
        let rule: Rule = serde_json::from_str(
            r#"{"target":"x.Y.z","criticality":"WARN","why":["OnEntry"],"message":"m","logger":"biz"}"#,
        )
        .unwrap();

        assert_eq!(rule.severity, "WARN");
        assert_eq!(rule.triggers, vec![TriggerPoint::OnEntry]);
        assert_eq!(rule.sink, "biz");
    }

    #[test]
    fn test_unknown_trigger_is_rejected() {
        let result: std::result::Result<Rule, _> =
            serde_json::from_str(r#"{"target":"x","triggers":["OnSometimes"],"sink":"s"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sink_config_defaults() {
        let sink: SinkConfig = serde_json::from_str(r#"{"output":"file","path":"logs/a.log"}"#).unwrap();

        assert_eq!(sink.kind.as_deref(), Some("file"));
        assert!(sink.append);
        assert!(sink.files.is_empty());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10MB"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("512kb"), Some(512 * 1024));
        assert_eq!(parse_size("2048"), Some(2048));
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("lots"), None);
    }
}
