//! Inference of operation type, entity kind and entity fields from call
//! metadata.

use super::model::{EntityKind, OperationType};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Accessor-style view of a value an action is about.
pub trait ActionSubject {
    fn identifier(&self) -> Option<String>;

    fn price(&self) -> Option<f64> {
        None
    }

    fn display_name(&self) -> Option<String> {
        None
    }
}

/// Objects expose `id`, `price` and `name` fields.
impl ActionSubject for Value {
    fn identifier(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn price(&self) -> Option<f64> {
        self.get("price").and_then(Value::as_f64)
    }

    fn display_name(&self) -> Option<String> {
        self.get("name").and_then(Value::as_str).map(str::to_string)
    }
}

/// Method name to operation lookup, with prefix inference for names that are
/// not in the table.
#[derive(Debug, Clone)]
pub struct OperationTable {
    known: HashMap<String, OperationType>,
}

impl Default for OperationTable {
    fn default() -> Self {
        use OperationType::*;
        let entries = [
            ("getAllProducts", GetAll),
            ("getAllUsers", GetAll),
            ("findAll", GetAll),
            ("getProductById", GetById),
            ("getUserById", GetById),
            ("findById", GetById),
            ("getUserByEmail", GetByEmail),
            ("addProduct", Create),
            ("createProduct", Create),
            ("createUser", Create),
            ("addUser", Create),
            ("save", Create),
            ("updateProduct", Update),
            ("updateUser", Update),
            ("update", Update),
            ("deleteProduct", Delete),
            ("deleteUser", Delete),
            ("delete", Delete),
            ("deleteById", Delete),
        ];
        Self {
            known: entries.into_iter().map(|(name, op)| (name.to_string(), op)).collect(),
        }
    }
}

impl OperationTable {
    pub fn empty() -> Self {
        Self { known: HashMap::new() }
    }

    pub fn with(mut self, method: impl Into<String>, operation: OperationType) -> Self {
        self.known.insert(method.into(), operation);
        self
    }

    pub fn lookup(&self, method: &str) -> OperationType {
        self.known.get(method).copied().unwrap_or_else(|| infer_operation(method))
    }
}

/// Infer an operation from a method-name prefix. Names with no recognized
/// prefix read as [`OperationType::GetAll`].
pub fn infer_operation(method: &str) -> OperationType {
    let lower = method.to_ascii_lowercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lower.starts_with(p));

    if starts(&["get", "find", "fetch"]) {
        if lower.contains("all") {
            OperationType::GetAll
        } else if lower.contains("email") {
            OperationType::GetByEmail
        } else {
            OperationType::GetById
        }
    } else if starts(&["create", "add", "save"]) {
        OperationType::Create
    } else if starts(&["update", "modify", "edit"]) {
        OperationType::Update
    } else if starts(&["delete", "remove"]) {
        OperationType::Delete
    } else if starts(&["search", "query"]) {
        OperationType::Search
    } else {
        OperationType::GetAll
    }
}

/// Classifies owning types into entity kinds by keyword.
#[derive(Debug, Clone)]
pub struct EntityClassifier {
    keywords: Vec<(String, EntityKind)>,
    subject_kinds: HashSet<EntityKind>,
}

impl Default for EntityClassifier {
    fn default() -> Self {
        Self {
            keywords: vec![
                ("product".to_string(), EntityKind::Product),
                ("user".to_string(), EntityKind::User),
            ],
            subject_kinds: HashSet::from([EntityKind::Product]),
        }
    }
}

impl EntityClassifier {
    /// Add a keyword, checked after the existing ones.
    pub fn with_keyword(mut self, keyword: &str, kind: EntityKind) -> Self {
        self.keywords.push((keyword.to_ascii_lowercase(), kind));
        self
    }

    /// Mark `kind` as one whose return values carry entity fields.
    pub fn with_subject_kind(mut self, kind: EntityKind) -> Self {
        self.subject_kinds.insert(kind);
        self
    }

    pub fn classify(&self, class_name: &str) -> EntityKind {
        let lower = class_name.to_ascii_lowercase();
        self.keywords
            .iter()
            .find(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, kind)| kind.clone())
            .unwrap_or(EntityKind::Unknown)
    }

    pub fn reads_subject(&self, kind: &EntityKind) -> bool {
        self.subject_kinds.contains(kind)
    }
}

/// The first string argument, if any.
pub fn entity_id_from_args(args: &[Value]) -> Option<String> {
    args.iter().find_map(|arg| arg.as_str().map(str::to_string))
}

/// Decides which owning types have their calls recorded as actions.
pub type RecordPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub const DEFAULT_RECORDED_SUFFIXES: [&str; 3] = ["service", "controller", "repository"];

/// Record calls on types whose name mentions a service, controller or
/// repository.
pub fn default_record_predicate() -> RecordPredicate {
    Arc::new(|type_name: &str| {
        let lower = type_name.to_ascii_lowercase();
        DEFAULT_RECORDED_SUFFIXES.iter().any(|s| lower.contains(s))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_methods() {
        let table = OperationTable::default();
        assert_eq!(table.lookup("getAllProducts"), OperationType::GetAll);
        assert_eq!(table.lookup("getUserByEmail"), OperationType::GetByEmail);
        assert_eq!(table.lookup("save"), OperationType::Create);
        assert_eq!(table.lookup("deleteById"), OperationType::Delete);
    }

    #[test]
    fn test_prefix_inference() {
        assert_eq!(infer_operation("fetchAllOrders"), OperationType::GetAll);
        assert_eq!(infer_operation("findOrder"), OperationType::GetById);
        assert_eq!(infer_operation("getCustomerByEmail"), OperationType::GetByEmail);
        assert_eq!(infer_operation("addLineItem"), OperationType::Create);
        assert_eq!(infer_operation("editOrder"), OperationType::Update);
        assert_eq!(infer_operation("removeItem"), OperationType::Delete);
        assert_eq!(infer_operation("queryOrders"), OperationType::Search);
        assert_eq!(infer_operation("recalculate"), OperationType::GetAll);
    }

    #[test]
    fn test_table_is_extensible() {
        let table = OperationTable::empty().with("purge", OperationType::Delete);
        assert_eq!(table.lookup("purge"), OperationType::Delete);
        assert_eq!(table.lookup("save"), OperationType::Create);
    }

    #[test]
    fn test_entity_classification() {
        let classifier = EntityClassifier::default().with_keyword("Order", EntityKind::Other("ORDER".to_string()));

        assert_eq!(classifier.classify("ProductService"), EntityKind::Product);
        assert_eq!(classifier.classify("com.shop.UserController"), EntityKind::User);
        assert_eq!(classifier.classify("OrderRepository"), EntityKind::Other("ORDER".to_string()));
        assert_eq!(classifier.classify("HealthCheck"), EntityKind::Unknown);
        assert!(classifier.reads_subject(&EntityKind::Product));
        assert!(!classifier.reads_subject(&EntityKind::User));
    }

    #[test]
    fn test_entity_id_from_first_string_arg() {
        assert_eq!(entity_id_from_args(&[json!(3), json!("p7"), json!("x")]), Some("p7".to_string()));
        assert_eq!(entity_id_from_args(&[json!(3)]), None);
        assert_eq!(entity_id_from_args(&[]), None);
    }

    #[test]
    fn test_value_subject_accessors() {
        let value = json!({"id": 12, "name": "Lamp", "price": 19.5});
        assert_eq!(value.identifier().as_deref(), Some("12"));
        assert_eq!(value.display_name().as_deref(), Some("Lamp"));
        assert_eq!(ActionSubject::price(&value), Some(19.5));
        assert_eq!(json!("plain").identifier(), None);
    }

    #[test]
    fn test_default_record_predicate() {
        let predicate = default_record_predicate();
        assert!(predicate("ProductService"));
        assert!(predicate("com.shop.web.UserController"));
        assert!(predicate("OrderRepository"));
        assert!(!predicate("PriceCalculator"));
    }
}
