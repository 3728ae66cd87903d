//! Runtime entry points called by instrumented code.
//!
//! A [`Dispatcher`] owns one rule store and the sinks it routes to. Each of
//! `log_entry`, `log_return` and `log_exception` looks up the rule for the
//! call's target, returns immediately unless the rule fires at that point,
//! and otherwise renders the rule's message and hands it to the rule's sink.
//! None of them ever fails or panics into the caller: internal problems are
//! reported through `tracing` and dropped.
//!
//! Woven code calls the free functions in this module, which go through a
//! process-wide dispatcher. It is built lazily from the default rule sources
//! the first time any of them runs; [`initialize`] and [`reset`] replace it.

use crate::config::{ConfigLoader, Rule, RuleStore, TriggerPoint};
use crate::error::Result;
use crate::formatter::{ErrorInfo, FormatContext};
use crate::router::SinkRouter;
use crate::sinks::SinkRegistry;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, error, info, trace};

/// Routes instrumented-call events to sinks according to one rule store.
pub struct Dispatcher {
    store: Arc<RuleStore>,
    router: SinkRouter,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Dispatcher over `store` using the built-in sink kinds.
    pub fn new(store: RuleStore) -> Self {
        Self::with_registry(store, SinkRegistry::new())
    }

    /// Dispatcher over `store` whose sinks are built by `registry`.
    ///
    /// # Arguments
    ///
    /// * `store` - Rules and sink definitions
    /// * `registry` - Sink kinds, e.g. with a broker publisher registered
    pub fn with_registry(store: RuleStore, registry: SinkRegistry) -> Self {
        let store = Arc::new(store);
        Self {
            router: SinkRouter::new(store.clone(), registry),
            store,
            closed: AtomicBool::new(false),
        }
    }

    /// A dispatcher with no rules; every call is a no-op.
    pub fn inert() -> Self {
        Self::new(RuleStore::default())
    }

    /// Build from the default rule sources (see [`ConfigLoader::load_default`]).
    pub fn from_default_sources() -> Result<Self> {
        Ok(Self::new(ConfigLoader::load_default()?))
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Emit the entry event of a call, if the rule for `target` fires on entry.
    ///
    /// # Arguments
    ///
    /// * `target` - Rule target, `package.Type.method`
    /// * `class` - Simple type name, for `{{class}}`
    /// * `method` - Method name, for `{{method}}`
    /// * `args` - Argument values, for `{{args}}`
    pub fn log_entry(&self, target: &str, class: &str, method: &str, args: &[Value]) {
        self.dispatch(target, TriggerPoint::OnEntry, |rule| {
            FormatContext::new(class, method)
                .with_args(args)
                .with_message(rule.message.as_deref())
        });
    }

    /// Emit the return event of a call. `value` is `None` for calls that
    /// return nothing and renders as `null`.
    ///
    /// Takes the same arguments as [`Dispatcher::log_entry`] plus the
    /// returned value.
    pub fn log_return(&self, target: &str, class: &str, method: &str, args: &[Value], value: Option<&Value>) {
        self.dispatch(target, TriggerPoint::OnReturn, |rule| {
            FormatContext::new(class, method)
                .with_args(args)
                .with_message(rule.message.as_deref())
                .with_value(value.cloned())
        });
    }

    /// Emit the exception event of a call that is about to propagate `error`.
    /// The caller rethrows; this never swallows the original error.
    pub fn log_exception(&self, target: &str, class: &str, method: &str, args: &[Value], error: &ErrorInfo) {
        self.dispatch(target, TriggerPoint::OnException, |rule| {
            FormatContext::new(class, method)
                .with_args(args)
                .with_message(rule.message.as_deref())
                .with_error(error.clone())
        });
    }

    fn dispatch(&self, target: &str, point: TriggerPoint, build: impl FnOnce(&Rule) -> FormatContext) {
        let Some(rule) = self.store.find_rule(target) else {
            return;
        };
        if !rule.triggers_on(point) || self.is_closed() {
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let context = build(rule);
            self.router.deliver(&rule.sink, &rule.severity, &context)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!("Dropped {} event for {}: {}", point, target, e),
            Err(_) => trace!("Panic while dispatching {} event for {}", point, target),
        }
    }

    /// Close every sink. Later calls become no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down dispatcher");
        self.router.close_all();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

static GLOBAL: LazyLock<RwLock<Option<Arc<Dispatcher>>>> = LazyLock::new(|| RwLock::new(None));

/// The process-wide dispatcher, built from the default sources on first use.
///
/// If loading fails the error is logged once and an inert dispatcher is
/// installed, so instrumented code keeps running without output.
pub fn global() -> Arc<Dispatcher> {
    {
        let guard = GLOBAL.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(dispatcher) = guard.as_ref() {
            return dispatcher.clone();
        }
    }

    let mut guard = GLOBAL.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(dispatcher) = guard.as_ref() {
        return dispatcher.clone();
    }

    let dispatcher = match Dispatcher::from_default_sources() {
        Ok(dispatcher) => {
            info!("Logging dispatcher initialized with {} rules", dispatcher.store().rules().len());
            dispatcher
        }
        Err(e) => {
            error!("Failed to load logging rules, instrumentation disabled: {}", e);
            Dispatcher::inert()
        }
    };
    let dispatcher = Arc::new(dispatcher);
    *guard = Some(dispatcher.clone());
    dispatcher
}

/// Install `dispatcher` as the process-wide one, shutting down any previous.
pub fn initialize(dispatcher: Dispatcher) -> Arc<Dispatcher> {
    let dispatcher = Arc::new(dispatcher);
    let previous = {
        let mut guard = GLOBAL.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.replace(dispatcher.clone())
    };
    if let Some(previous) = previous {
        previous.shutdown();
    }
    dispatcher
}

/// Shut down and forget the process-wide dispatcher. The next call through
/// the free functions rebuilds it from the default sources.
pub fn reset() {
    let previous = GLOBAL.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    if let Some(previous) = previous {
        previous.shutdown();
    }
}

/// [`Dispatcher::log_entry`] on the process-wide dispatcher.
pub fn log_entry(target: &str, class: &str, method: &str, args: &[Value]) {
    global().log_entry(target, class, method, args);
}

/// [`Dispatcher::log_return`] on the process-wide dispatcher.
pub fn log_return(target: &str, class: &str, method: &str, args: &[Value], value: Option<&Value>) {
    global().log_return(target, class, method, args, value);
}

/// [`Dispatcher::log_exception`] on the process-wide dispatcher.
pub fn log_exception(target: &str, class: &str, method: &str, args: &[Value], error: &ErrorInfo) {
    global().log_exception(target, class, method, args, error);
}


#[cfg(test)]
mod tests {
    use super::testing::StubSink;
    use super::*;
    use crate::config::SinkConfig;
    use crate::error::LogweaveError;
    use crate::sinks::Sink;
    use serde_json::json;

    fn registry_with(stub: &StubSink) -> SinkRegistry {
        let mut registry = SinkRegistry::new();
        let stub = stub.clone();
        registry.register(
            "stub",
            Arc::new(move |_name: &str, _config: &SinkConfig| Ok(Box::new(stub.clone()) as Box<dyn Sink>)),
        );
        registry
    }

    fn dispatcher(rules: Vec<Rule>, stub: &StubSink) -> Dispatcher {
        let mut builder = RuleStore::builder().sink(
            "biz",
            SinkConfig::new("stub").with_format("{{class}}.{{method}} {{message}}"),
        );
        for rule in rules {
            builder = builder.rule(rule);
        }
        Dispatcher::with_registry(builder.build(), registry_with(stub))
    }

    #[test]
    fn test_rule_without_return_trigger_never_writes_on_return() {
        let stub = StubSink::default();
        let d = dispatcher(
            vec![Rule::new("a.Svc.run", "biz").with_triggers([TriggerPoint::OnEntry])],
            &stub,
        );

        d.log_return("a.Svc.run", "Svc", "run", &[], Some(&json!(1)));
        d.log_exception("a.Svc.run", "Svc", "run", &[], &ErrorInfo::new("E", "x"));

        assert!(stub.lines().is_empty());
    }

    #[test]
    fn test_entry_then_return_writes_two_ordered_lines() {
        let stub = StubSink::default();
        let d = dispatcher(
            vec![Rule::new("com.acme.Svc.foo", "biz")
                .with_triggers([TriggerPoint::OnEntry, TriggerPoint::OnReturn])
                .with_message("value={{value}}")],
            &stub,
        );

        d.log_entry("com.acme.Svc.foo", "Svc", "foo", &[json!("p1")]);
        d.log_return("com.acme.Svc.foo", "Svc", "foo", &[json!("p1")], Some(&json!(42)));

        let lines = stub.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1, "Svc.foo value=null");
        assert_eq!(lines[1].1, "Svc.foo value=42");
        assert_eq!(lines[1].0, "INFO");
    }

    #[test]
    fn test_entry_then_return_through_console_sink() {
        use crate::dispatcher::testing::CaptureLayer;
        use tracing_subscriber::layer::SubscriberExt;

        let capture = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let store = RuleStore::builder()
            .sink("biz", SinkConfig::new("console").with_format("{{class}}.{{method}} {{message}}"))
            .rule(
                Rule::new("com.acme.Svc.foo", "biz")
                    .with_severity("WARN")
                    .with_triggers([TriggerPoint::OnEntry, TriggerPoint::OnReturn])
                    .with_message("value={{value}}"),
            )
            .build();

        tracing::subscriber::with_default(subscriber, || {
            let d = Dispatcher::new(store);
            d.log_entry("com.acme.Svc.foo", "Svc", "foo", &[json!("p1")]);
            d.log_return("com.acme.Svc.foo", "Svc", "foo", &[json!("p1")], Some(&json!(42)));
            d.shutdown();
        });

        let events = capture.events_for("biz");
        let messages: Vec<_> = events.iter().map(|e| e.field("message").unwrap_or_default()).collect();
        assert_eq!(messages, vec!["Svc.foo value=null", "Svc.foo value=42"]);
        assert!(events.iter().all(|e| e.level == tracing::Level::WARN));
    }

    #[test]
    fn test_unmatched_target_is_a_no_op() {
        let stub = StubSink::default();
        let d = dispatcher(vec![Rule::new("a.*", "biz").with_triggers(TriggerPoint::ALL)], &stub);

        d.log_entry("b.Svc.run", "Svc", "run", &[]);
        assert!(stub.lines().is_empty());
        assert_eq!(d.router.active_routes(), 0);
    }

    #[test]
    fn test_exception_context() {
        let stub = StubSink::default();
        let d = dispatcher(
            vec![Rule::new("a.Svc.*", "biz")
                .with_severity("ERROR")
                .with_triggers([TriggerPoint::OnException])
                .with_message("failed: {{exception}}")],
            &stub,
        );

        d.log_exception("a.Svc.save", "Svc", "save", &[], &ErrorInfo::new("IoError", "disk full"));

        assert_eq!(
            stub.lines(),
            vec![("ERROR".to_string(), "Svc.save failed: IoError: disk full".to_string())]
        );
    }

    #[test]
    fn test_sink_failure_and_panic_do_not_escape() {
        struct Exploding;
        impl Sink for Exploding {
            fn kind(&self) -> &'static str {
                "exploding"
            }
            fn write(&self, severity: &str, _message: &str) -> Result<()> {
                if severity == "PANIC" {
                    panic!("sink blew up");
                }
                Err(LogweaveError::Sink("nope".to_string()))
            }
        }

        let mut registry = SinkRegistry::new();
        registry.register(
            "exploding",
            Arc::new(|_name: &str, _config: &SinkConfig| Ok(Box::new(Exploding) as Box<dyn Sink>)),
        );
        let store = RuleStore::builder()
            .sink("bad", SinkConfig::new("exploding"))
            .rule(Rule::new("x.Y.err", "bad").with_triggers(TriggerPoint::ALL))
            .rule(Rule::new("x.Y.panic", "bad").with_severity("PANIC").with_triggers(TriggerPoint::ALL))
            .build();
        let d = Dispatcher::with_registry(store, registry);

        d.log_entry("x.Y.err", "Y", "err", &[]);
        d.log_entry("x.Y.panic", "Y", "panic", &[]);
    }

    #[test]
    fn test_shutdown_stops_output() {
        let stub = StubSink::default();
        let d = dispatcher(vec![Rule::new("a.S.m", "biz").with_triggers(TriggerPoint::ALL)], &stub);

        d.log_entry("a.S.m", "S", "m", &[]);
        d.shutdown();
        d.shutdown();
        d.log_entry("a.S.m", "S", "m", &[]);

        assert_eq!(stub.lines().len(), 1);
        assert!(d.is_closed());
    }

    #[test]
    fn test_global_initialize_and_reset() {
        let stub = StubSink::default();
        initialize(dispatcher(
            vec![Rule::new("g.Svc.call", "biz").with_triggers([TriggerPoint::OnEntry])],
            &stub,
        ));

        log_entry("g.Svc.call", "Svc", "call", &[]);
        log_return("g.Svc.call", "Svc", "call", &[], None);

        assert_eq!(stub.lines().len(), 1);
        reset();
    }
}
