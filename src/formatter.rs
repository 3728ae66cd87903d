//! `{{placeholder}}` template rendering.
//!
//! Recognized names:
//!
//! - `time`: local time at render, `YYYY-MM-DD HH:MM:SS.mmm`
//! - `message`: the rule's message, itself expanded once against the same
//!   context (a `{{message}}` inside it renders the raw message text)
//! - `value`: return value or error detail, `null` when absent
//! - `method`, `class`
//! - `args`: `[a, b, c]`
//! - `exception`: `<type>: <message>`, empty when there is no error
//!
//! Any other name renders the context field of that name, or stays as the
//! literal `{{name}}` when there is no such field. Rendering never fails; a
//! value that cannot be stringified also stays as its literal placeholder.

use chrono::Local;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Template used when a sink declares none.
pub const DEFAULT_FORMAT: &str = "{{time}} {{message}}";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Type name and message of an error seen at an exception point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: Option<String>,
}

impl ErrorInfo {
    /// # Arguments
    ///
    /// * `kind` - Error type name, rendered before the colon
    /// * `message` - Error text, also the default `{{value}}`
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: Some(message.into()),
        }
    }

    /// Describe a concrete error by its type name and display text.
    pub fn of<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => f.write_str(&self.kind),
        }
    }
}

/// Everything a template can refer to for one event.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    pub class: String,
    pub method: String,
    pub args: Vec<Value>,
    pub message: Option<String>,
    pub value: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub fields: HashMap<String, Value>,
}

impl FormatContext {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: &[Value]) -> Self {
        self.args = args.to_vec();
        self
    }

    pub fn with_message(mut self, message: Option<&str>) -> Self {
        self.message = message.map(str::to_string);
        self
    }

    pub fn with_value(mut self, value: Option<Value>) -> Self {
        self.value = value;
        self
    }

    /// Attach the error of an exception event. Its message becomes the
    /// `{{value}}` unless a value was already set.
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        if self.value.is_none() {
            self.value = error.message.clone().map(Value::String);
        }
        self.error = Some(error);
        self
    }

    /// Extra field a template can name directly, like `{{actor}}`.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Renders one template. Cheap to clone; holds only the template text.
///
/// # Examples
///
/// ```
/// use logweave::formatter::{FormatContext, MessageFormatter};
/// use serde_json::json;
///
/// let formatter = MessageFormatter::new(Some("{{class}}.{{method}} {{args}} -> {{value}}"));
/// let context = FormatContext::new("Cart", "add")
///     .with_args(&[json!("sku-1"), json!(2)])
///     .with_value(Some(json!(true)));
///
/// assert_eq!(formatter.format(&context), "Cart.add [sku-1, 2] -> true");
/// ```
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    format: String,
}

impl MessageFormatter {
    /// # Arguments
    ///
    /// * `format` - The template, or `None` for [`DEFAULT_FORMAT`]
    pub fn new(format: Option<&str>) -> Self {
        Self {
            format: format.unwrap_or(DEFAULT_FORMAT).to_string(),
        }
    }

    pub fn template(&self) -> &str {
        &self.format
    }

    /// Render the template against `context`. Never fails; unknown or
    /// unrenderable placeholders stay literal.
    pub fn format(&self, context: &FormatContext) -> String {
        expand(&self.format, context, true)
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(None)
    }
}

fn expand(template: &str, context: &FormatContext, expand_message: bool) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            resolve(name, context, expand_message).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn resolve(name: &str, context: &FormatContext, expand_message: bool) -> Option<String> {
    match name {
        "time" => Some(Local::now().format(TIME_FORMAT).to_string()),
        "message" => {
            let message = context.message.as_deref().unwrap_or_default();
            if expand_message {
                Some(expand(message, context, false))
            } else {
                Some(message.to_string())
            }
        }
        "value" => match &context.value {
            Some(value) => stringify(value),
            None => Some("null".to_string()),
        },
        "method" => Some(context.method.clone()),
        "class" => Some(context.class.clone()),
        "args" => render_args(&context.args),
        "exception" => Some(context.error.as_ref().map(ErrorInfo::to_string).unwrap_or_default()),
        other => context.fields.get(other).and_then(stringify),
    }
}

fn render_args(args: &[Value]) -> Option<String> {
    let parts = args.iter().map(stringify).collect::<Option<Vec<_>>>()?;
    Some(format!("[{}]", parts.join(", ")))
}

/// Strings render bare, everything else in its JSON form.
pub(crate) fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_method_and_custom_field() {
        let formatter = MessageFormatter::new(Some("{{class}}.{{method}} by {{userId}}"));
        let context = FormatContext::new("Svc", "foo").with_field("userId", "u1");

        assert_eq!(formatter.format(&context), "Svc.foo by u1");
    }

    #[test]
    fn test_unresolved_placeholder_stays_literal() {
        let formatter = MessageFormatter::new(Some("before {{zzz}} after"));
        let context = FormatContext::new("Svc", "foo");

        assert_eq!(formatter.format(&context), "before {{zzz}} after");
    }

    #[test]
    fn test_value_placeholder() {
        let formatter = MessageFormatter::new(Some("Result: {{value}}"));

        let with_value = FormatContext::new("C", "m").with_value(Some(json!("42")));
        assert_eq!(formatter.format(&with_value), "Result: 42");

        let without = FormatContext::new("C", "m");
        assert_eq!(formatter.format(&without), "Result: null");
    }

    #[test]
    fn test_args_placeholder() {
        let formatter = MessageFormatter::new(Some("Args: {{args}}"));
        let context = FormatContext::new("C", "m").with_args(&[json!("arg1"), json!(123), json!(true)]);

        assert_eq!(formatter.format(&context), "Args: [arg1, 123, true]");
    }

    #[test]
    fn test_empty_args() {
        let formatter = MessageFormatter::new(Some("{{args}}"));
        assert_eq!(formatter.format(&FormatContext::new("C", "m")), "[]");
    }

    #[test]
    fn test_message_expanded_once() {
        let formatter = MessageFormatter::new(Some("[{{class}}] {{message}}"));
        let context = FormatContext::new("OrderService", "place")
            .with_message(Some("{{method}} returned {{value}} ({{message}})"))
            .with_value(Some(json!(7)));

        assert_eq!(
            formatter.format(&context),
            "[OrderService] place returned 7 ({{method}} returned {{value}} ({{message}}))"
        );
    }

    #[test]
    fn test_exception_placeholder() {
        let formatter = MessageFormatter::new(Some("{{exception}} / {{value}}"));
        let context = FormatContext::new("C", "m").with_error(ErrorInfo::new("IoError", "disk full"));

        assert_eq!(formatter.format(&context), "IoError: disk full / disk full");
        assert_eq!(MessageFormatter::new(Some("<{{exception}}>")).format(&FormatContext::new("C", "m")), "<>");
    }

    #[test]
    fn test_time_placeholder_shape() {
        let formatter = MessageFormatter::default();
        let rendered = formatter.format(&FormatContext::new("C", "m").with_message(Some("hello")));

        let re = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3} hello$").unwrap();
        assert!(re.is_match(&rendered), "unexpected rendering: {}", rendered);
    }

    #[test]
    fn test_structured_values_render_as_json() {
        let formatter = MessageFormatter::new(Some("{{value}}"));
        let context = FormatContext::new("C", "m").with_value(Some(json!({"id": "p1"})));

        assert_eq!(formatter.format(&context), r#"{"id":"p1"}"#);
    }

    #[test]
    fn test_error_info_of() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let info = ErrorInfo::of(&err);

        assert!(info.kind.contains("io"));
        assert_eq!(info.message.as_deref(), Some("boom"));
    }
}
