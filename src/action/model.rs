//! Action records: who did what to which entity, and how it ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// The kind of operation a method performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    GetAll,
    GetById,
    GetByEmail,
    Create,
    Update,
    Delete,
    Search,
}

impl OperationType {
    pub fn action_class(&self) -> ActionClass {
        match self {
            OperationType::GetAll | OperationType::GetById | OperationType::GetByEmail => ActionClass::Read,
            OperationType::Create | OperationType::Update | OperationType::Delete => ActionClass::Write,
            OperationType::Search => ActionClass::Search,
        }
    }

    /// Short label used in action summaries.
    pub fn description(&self) -> &'static str {
        match self {
            OperationType::GetAll => "Retrieve all",
            OperationType::GetById => "Retrieve by ID",
            OperationType::GetByEmail => "Retrieve by email",
            OperationType::Create => "Create",
            OperationType::Update => "Update",
            OperationType::Delete => "Delete",
            OperationType::Search => "Search",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionClass {
    Read,
    Write,
    Search,
}

/// Kind of entity an action touches, derived from the owning type's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Product,
    Unknown,
    Other(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::User => "USER",
            EntityKind::Product => "PRODUCT",
            EntityKind::Unknown => "UNKNOWN",
            EntityKind::Other(name) => name,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One recorded business action.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
    pub operation: OperationType,
    pub action_class: ActionClass,
    pub class_name: String,
    pub method_name: String,
    pub entity_kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    pub fn builder(operation: OperationType, class_name: impl Into<String>, method_name: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(operation, class_name, method_name)
    }

    /// One-line JSON form used by broker recorders.
    pub fn to_structured_log(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"id\":\"{}\"}}", self.id))
    }

    /// Human-readable summary, e.g. `alice@x.io Create PRODUCT p1 -> ok`.
    pub fn summary(&self) -> String {
        let actor = self
            .actor_email
            .as_deref()
            .or(self.actor_id.as_deref())
            .unwrap_or("anonymous");
        let outcome = if self.success {
            "ok".to_string()
        } else {
            format!("failed: {}", self.error.as_deref().unwrap_or("unknown error"))
        };
        format!(
            "{} {} {} {} -> {}",
            actor,
            self.operation.description(),
            self.entity_kind,
            self.entity_id.as_deref().unwrap_or("-"),
            outcome
        )
    }

    /// Whether the action's actor matches `user`, by id or by email.
    pub fn is_by(&self, user: &str) -> bool {
        self.actor_id.as_deref() == Some(user) || self.actor_email.as_deref() == Some(user)
    }

    /// Broker partition key: email, then id, then `anonymous`.
    pub fn partition_key(&self) -> &str {
        self.actor_email
            .as_deref()
            .or(self.actor_id.as_deref())
            .unwrap_or("anonymous")
    }
}

/// Builds an [`Action`]. Fields not set stay empty; the action class always
/// follows the operation.
#[derive(Debug, Clone)]
pub struct ActionBuilder {
    action: Action,
}

impl ActionBuilder {
    pub fn new(operation: OperationType, class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            action: Action {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                actor_id: None,
                actor_email: None,
                actor_name: None,
                operation,
                action_class: operation.action_class(),
                class_name: class_name.into(),
                method_name: method_name.into(),
                entity_kind: EntityKind::Unknown,
                entity_id: None,
                entity_name: None,
                price: None,
                details: None,
                success: true,
                error: None,
            },
        }
    }

    pub fn actor(mut self, id: Option<String>, email: Option<String>, name: Option<String>) -> Self {
        self.action.actor_id = id;
        self.action.actor_email = email;
        self.action.actor_name = name;
        self
    }

    pub fn entity(mut self, kind: EntityKind, id: Option<String>) -> Self {
        self.action.entity_kind = kind;
        self.action.entity_id = id;
        self
    }

    pub fn entity_name(mut self, name: Option<String>) -> Self {
        self.action.entity_name = name;
        self
    }

    pub fn price(mut self, price: Option<f64>) -> Self {
        self.action.price = price;
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.action.details = Some(details.into());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.action.success = false;
        self.action.error = Some(error.into());
        self
    }

    pub fn build(self) -> Action {
        self.action
    }
}
