//! Turns instrumented calls into recorded actions.
//!
//! Woven code calls [`record_entry`], [`record_return`] and
//! [`record_exception`] next to the matching logging calls, for owning types
//! that pass the record predicate. They go through a process-wide
//! [`ActionInjector`] whose recorder is chosen from the environment on first
//! use; [`initialize`] and [`reset`] replace it.

use super::context::{self, ActorContext};
use super::extract::{entity_id_from_args, ActionSubject, EntityClassifier, OperationTable};
use super::model::{Action, ActionBuilder};
use super::recorder::{NoopRecorder, Recorder, RecorderRegistry, RecorderSettings};
use crate::error::Result;
use crate::formatter::ErrorInfo;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, error, info, trace};

pub struct ActionInjector {
    recorder: Arc<dyn Recorder>,
    operations: OperationTable,
    entities: EntityClassifier,
}

impl ActionInjector {
    /// Create an injector with the default operation table and entity
    /// keywords.
    ///
    /// # Arguments
    ///
    /// * `recorder` - Where built actions go
    pub fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
            operations: OperationTable::default(),
            entities: EntityClassifier::default(),
        }
    }

    pub fn with_operations(mut self, operations: OperationTable) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_entities(mut self, entities: EntityClassifier) -> Self {
        self.entities = entities;
        self
    }

    /// Build from `ACTION_RECORDER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let recorder = RecorderRegistry::new().create(&RecorderSettings::from_env())?;
        Ok(Self::new(recorder))
    }

    pub fn is_enabled(&self) -> bool {
        self.recorder.is_enabled()
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    /// Set the calling thread's actor.
    pub fn set_actor_context(&self, id: Option<String>, email: Option<String>, name: Option<String>) {
        context::set_actor_context(ActorContext::new(id, email, name));
    }

    pub fn clear_actor_context(&self) {
        context::clear_actor_context();
    }

    pub fn current_actor(&self) -> Option<ActorContext> {
        context::current_actor()
    }

    /// Record a call starting.
    ///
    /// # Arguments
    ///
    /// * `class` - Simple name of the owning type
    /// * `method` - Method name
    /// * `args` - Call arguments; the first string one is taken as the entity id
    pub fn record_entry(&self, class: &str, method: &str, args: &[Value]) {
        self.record_with(|| {
            let kind = self.entities.classify(class);
            self.start(class, method).entity(kind, entity_id_from_args(args))
        });
    }

    /// Record a call returning normally.
    ///
    /// For entity kinds whose values carry entity fields, a missing id and the
    /// name and price are taken from `result`.
    ///
    /// # Arguments
    ///
    /// * `class` - Simple name of the owning type
    /// * `method` - Method name
    /// * `args` - Call arguments
    /// * `result` - The returned value, if any
    pub fn record_return(&self, class: &str, method: &str, args: &[Value], result: Option<&dyn ActionSubject>) {
        self.record_with(|| {
            let kind = self.entities.classify(class);
            let mut entity_id = entity_id_from_args(args);
            let mut builder = self.start(class, method);

            if let Some(subject) = result.filter(|_| self.entities.reads_subject(&kind)) {
                if entity_id.is_none() {
                    entity_id = subject.identifier();
                }
                builder = builder.entity_name(subject.display_name()).price(subject.price());
            }
            builder.entity(kind, entity_id)
        });
    }

    /// Record a call failing with `error`.
    pub fn record_exception(&self, class: &str, method: &str, args: &[Value], error: &ErrorInfo) {
        self.record_with(|| {
            let kind = self.entities.classify(class);
            let message = error.message.clone().unwrap_or_else(|| error.kind.clone());
            self.start(class, method)
                .entity(kind, entity_id_from_args(args))
                .failed(message)
        });
    }

    pub fn shutdown(&self) {
        self.recorder.shutdown();
    }

    fn start(&self, class: &str, method: &str) -> ActionBuilder {
        let operation = self.operations.lookup(method);
        let actor = context::current_actor().unwrap_or_default();
        Action::builder(operation, class, method).actor(actor.id, actor.email, actor.name)
    }

    fn record_with(&self, build: impl FnOnce() -> ActionBuilder) {
        if !self.recorder.is_enabled() {
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let action = build().build();
            trace!("Recording action {}", action.summary());
            self.recorder.record(action);
        }));
        if outcome.is_err() {
            trace!("Panic while recording action");
        }
    }
}

static GLOBAL: LazyLock<RwLock<Option<Arc<ActionInjector>>>> = LazyLock::new(|| RwLock::new(None));

/// The process-wide injector, built from the environment on first use.
pub fn global() -> Arc<ActionInjector> {
    {
        let guard = GLOBAL.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(injector) = guard.as_ref() {
            return injector.clone();
        }
    }

    let mut guard = GLOBAL.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(injector) = guard.as_ref() {
        return injector.clone();
    }

    let injector = match ActionInjector::from_env() {
        Ok(injector) => {
            info!("Action injector initialized (recording enabled: {})", injector.is_enabled());
            injector
        }
        Err(e) => {
            error!("Failed to create action recorder, action recording disabled: {}", e);
            ActionInjector::new(Arc::new(NoopRecorder))
        }
    };
    let injector = Arc::new(injector);
    *guard = Some(injector.clone());
    injector
}

/// Install an injector around `recorder`, shutting down any previous one.
pub fn initialize(recorder: Arc<dyn Recorder>) -> Arc<ActionInjector> {
    install(ActionInjector::new(recorder))
}

/// Install a fully configured injector, shutting down any previous one.
pub fn install(injector: ActionInjector) -> Arc<ActionInjector> {
    let injector = Arc::new(injector);
    let previous = {
        let mut guard = GLOBAL.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.replace(injector.clone())
    };
    if let Some(previous) = previous {
        debug!("Replacing action injector");
        previous.shutdown();
    }
    injector
}

pub fn reset() {
    let previous = GLOBAL.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    if let Some(previous) = previous {
        previous.shutdown();
    }
}

pub fn record_entry(class: &str, method: &str, args: &[Value]) {
    global().record_entry(class, method, args);
}

pub fn record_return(class: &str, method: &str, args: &[Value], result: Option<&Value>) {
    global().record_return(class, method, args, result.map(|v| v as &dyn ActionSubject));
}

pub fn record_exception(class: &str, method: &str, args: &[Value], error: &ErrorInfo) {
    global().record_exception(class, method, args, error);
}
