//! Instrumentation for code written directly in Rust.
//!
//! A [`CallSite`] names one method the way the weaver does and wraps a call
//! with the same three events woven code emits: entry before the body, return
//! with the produced value, exception with the error. The body's result is
//! handed back unchanged.
//!
//! ```ignore
//! static SITE: LazyLock<CallSite> = LazyLock::new(|| CallSite::new("com.shop.ProductService", "getProductById"));
//!
//! fn get_product_by_id(id: &str) -> Result<Product, ShopError> {
//!     SITE.run(&[json!(id)], || repository.find(id))
//! }
//! ```

use crate::action::{self, default_record_predicate, ActionInjector};
use crate::dispatcher::{self, Dispatcher};
use crate::formatter::ErrorInfo;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    target: String,
    class: String,
    method: String,
    record_actions: bool,
}

impl CallSite {
    /// Name one instrumented method.
    ///
    /// # Arguments
    ///
    /// * `owning_type` - Qualified type name, with `.` or `::` separators
    /// * `method` - Method name as it appears in rule targets
    ///
    /// Action recording is enabled when the simple type name passes the
    /// default record predicate; the package path is not considered.
    pub fn new(owning_type: &str, method: &str) -> Self {
        let predicate = default_record_predicate();
        let class = simple_name(owning_type);
        Self {
            target: format!("{}.{}", owning_type, method),
            class: class.to_string(),
            method: method.to_string(),
            record_actions: predicate(class),
        }
    }

    pub fn with_actions(mut self, record_actions: bool) -> Self {
        self.record_actions = record_actions;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn records_actions(&self) -> bool {
        self.record_actions
    }

    /// Run `body` through the process-wide dispatcher and action injector.
    pub fn run<T, E, F>(&self, args: &[Value], body: F) -> Result<T, E>
    where
        T: Serialize,
        E: std::error::Error,
        F: FnOnce() -> Result<T, E>,
    {
        let actions = self.record_actions.then(action::injector::global);
        self.run_with(&dispatcher::global(), actions.as_deref(), args, body)
    }

    /// Run `body` through an explicit dispatcher and optional injector.
    pub fn run_with<T, E, F>(
        &self,
        dispatcher: &Dispatcher,
        actions: Option<&ActionInjector>,
        args: &[Value],
        body: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        E: std::error::Error,
        F: FnOnce() -> Result<T, E>,
    {
        let actions = actions.filter(|_| self.record_actions);

        dispatcher.log_entry(&self.target, &self.class, &self.method, args);
        if let Some(actions) = actions {
            actions.record_entry(&self.class, &self.method, args);
        }

        let result = body();
        match &result {
            Ok(value) => {
                let value = serde_json::to_value(value).ok().filter(|v| !v.is_null());
                dispatcher.log_return(&self.target, &self.class, &self.method, args, value.as_ref());
                if let Some(actions) = actions {
                    let subject = value.as_ref().map(|v| v as &dyn action::ActionSubject);
                    actions.record_return(&self.class, &self.method, args, subject);
                }
            }
            Err(error) => {
                let info = ErrorInfo::of(error);
                dispatcher.log_exception(&self.target, &self.class, &self.method, args, &info);
                if let Some(actions) = actions {
                    actions.record_exception(&self.class, &self.method, args, &info);
                }
            }
        }
        result
    }
}

fn simple_name(qualified: &str) -> &str {
    let after_path = qualified.rsplit("::").next().unwrap_or(qualified);
    after_path.rsplit('.').next().unwrap_or(after_path)
}
