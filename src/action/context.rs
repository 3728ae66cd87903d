//! The actor on whose behalf the current request runs.
//!
//! Two scopes are supported. Synchronous code sets a per-thread context,
//! usually through [`ActorContext::enter`], whose guard clears it again.
//! Async code wraps a future in [`ActorContext::scope`]; inside it the
//! task-scoped context takes precedence, even when the task moves between
//! threads.

use std::cell::RefCell;
use std::future::Future;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorContext {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

thread_local! {
    static THREAD_ACTOR: RefCell<Option<ActorContext>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_ACTOR: ActorContext;
}

impl ActorContext {
    pub fn new(id: Option<String>, email: Option<String>, name: Option<String>) -> Self {
        Self { id, email, name }
    }

    /// Build from request header values, ignoring blank ones.
    pub fn from_headers(id: Option<&str>, email: Option<&str>, name: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        Self::new(clean(id), clean(email), clean(name))
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.email.is_none() && self.name.is_none()
    }

    /// Set as this thread's context until the guard is dropped.
    pub fn enter(self) -> ActorGuard {
        set_actor_context(self);
        ActorGuard { _private: () }
    }

    /// Run `future` with this context visible to everything it calls.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        TASK_ACTOR.scope(self, future).await
    }
}

/// Clears the thread's actor context when dropped.
#[must_use = "the context is cleared as soon as the guard is dropped"]
pub struct ActorGuard {
    _private: (),
}

impl Drop for ActorGuard {
    fn drop(&mut self) {
        clear_actor_context();
    }
}

pub fn set_actor_context(context: ActorContext) {
    THREAD_ACTOR.with(|cell| *cell.borrow_mut() = Some(context));
}

pub fn clear_actor_context() {
    THREAD_ACTOR.with(|cell| cell.borrow_mut().take());
}

/// The task-scoped context if inside [`ActorContext::scope`], else this
/// thread's, else `None`.
pub fn current_actor() -> Option<ActorContext> {
    if let Ok(context) = TASK_ACTOR.try_with(|context| context.clone()) {
        return Some(context);
    }
    THREAD_ACTOR.with(|cell| cell.borrow().clone())
}
