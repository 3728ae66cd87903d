//! Business action recording.
//!
//! Alongside log lines, calls on service-like types can be recorded as
//! structured [`Action`]s: the operation inferred from the method name, the
//! entity kind inferred from the owning type, the entity id and the actor of
//! the current request.

pub mod context;
pub mod extract;
pub mod injector;
pub mod model;
pub mod recorder;

pub use context::{clear_actor_context, current_actor, set_actor_context, ActorContext, ActorGuard};
pub use extract::{
    default_record_predicate, infer_operation, ActionSubject, EntityClassifier, OperationTable, RecordPredicate,
};
pub use injector::ActionInjector;
pub use model::{Action, ActionBuilder, ActionClass, EntityKind, OperationType};
pub use recorder::{
    BrokerRecorder, MemoryRecorder, NoopRecorder, Recorder, RecorderFactory, RecorderRegistry, RecorderSettings,
};
