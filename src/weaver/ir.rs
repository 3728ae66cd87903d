//! Statement-list IR for method bodies.
//!
//! Source units are JSON documents produced by a host-language front end.
//! The IR models only the control flow the weaver needs to see (returns,
//! throws, branches, loops and protected blocks); anything else travels as
//! opaque `raw` code.
//!
//! Fields the IR does not model are kept on types, methods, statements and
//! catch clauses (line numbers, annotations, modifiers and the like) and are
//! written back unchanged. Expressions keep only the fields modelled here; a
//! front end that needs more on an expression should emit it as `raw`.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub type Block = Vec<Stmt>;

/// Expressions the weaver builds or needs to inspect. Everything else is
/// `raw` host-language code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Value,
    },
    Var {
        name: String,
    },
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Array {
        #[serde(default)]
        items: Vec<Expr>,
    },
    Raw {
        code: String,
    },
}

impl Expr {
    /// A string literal.
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal {
            value: Value::String(value.into()),
        }
    }

    pub fn null() -> Self {
        Expr::Literal { value: Value::Null }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var { name: name.into() }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: callee.into(),
            args,
        }
    }
}

/// One `catch` clause of a [`StmtKind::Try`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catch {
    pub error_type: String,
    pub binding: String,
    #[serde(default)]
    pub body: Block,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Catch {
    pub fn new(error_type: impl Into<String>, binding: impl Into<String>, body: Block) -> Self {
        Self {
            error_type: error_type.into(),
            binding: binding.into(),
            body,
            extra: Map::new(),
        }
    }
}

/// The modelled part of a statement, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StmtKind {
    Expr {
        expr: Expr,
    },
    /// Local binding; `ty` is the declared type, if the language needs one
    Let {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<String>,
        value: Expr,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
    },
    If {
        condition: Expr,
        #[serde(default)]
        then_branch: Block,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_branch: Option<Block>,
    },
    While {
        condition: Expr,
        #[serde(default)]
        body: Block,
    },
    Block {
        #[serde(default)]
        body: Block,
    },
    /// Protected block with catch clauses and an optional `finally`
    Try {
        #[serde(default)]
        body: Block,
        #[serde(default)]
        catches: Vec<Catch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finally: Option<Block>,
    },
    Throw {
        value: Expr,
    },
    /// Host-language code the weaver never looks into
    Raw {
        code: String,
    },
}

impl StmtKind {
    const TAGS: &'static [&'static str] = &["expr", "let", "return", "if", "while", "block", "try", "throw", "raw"];

    /// Fields modelled for the statement tagged `tag`.
    fn fields_of(tag: &str) -> Option<&'static [&'static str]> {
        let fields: &'static [&'static str] = match tag {
            "expr" => &["expr"],
            "let" => &["name", "ty", "value"],
            "return" | "throw" => &["value"],
            "if" => &["condition", "then_branch", "else_branch"],
            "while" => &["condition", "body"],
            "block" => &["body"],
            "try" => &["body", "catches", "finally"],
            "raw" => &["code"],
            _ => return None,
        };
        Some(fields)
    }
}

/// A statement plus whatever else the front end attached to it.
///
/// # Examples
///
/// ```
/// use logweave::weaver::{Stmt, StmtKind};
/// use serde_json::json;
///
/// let stmt: Stmt = serde_json::from_value(json!({"kind": "raw", "code": "x++;", "line": 3})).unwrap();
/// assert_eq!(stmt.kind, StmtKind::Raw { code: "x++;".to_string() });
/// assert_eq!(stmt.meta["line"], json!(3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stmt {
    #[serde(flatten)]
    pub kind: StmtKind,
    /// Fields not modelled by [`StmtKind`], written back as they came
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, meta: Map::new() }
    }

    /// `kind` carrying the metadata of `self`.
    pub fn replaced_by(&self, kind: StmtKind) -> Self {
        Self {
            kind,
            meta: self.meta.clone(),
        }
    }

    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr { expr })
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return { value })
    }

    pub fn throw(value: Expr) -> Self {
        Self::new(StmtKind::Throw { value })
    }

    pub fn raw(code: impl Into<String>) -> Self {
        Self::new(StmtKind::Raw { code: code.into() })
    }

    pub fn block(body: Block) -> Self {
        Self::new(StmtKind::Block { body })
    }
}

impl From<StmtKind> for Stmt {
    fn from(kind: StmtKind) -> Self {
        Self::new(kind)
    }
}

impl<'de> Deserialize<'de> for Stmt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut meta = Map::<String, Value>::deserialize(deserializer)?;
        let tag = match meta.get("kind") {
            Some(Value::String(tag)) => tag.clone(),
            Some(_) => return Err(D::Error::custom("statement kind must be a string")),
            None => return Err(D::Error::missing_field("kind")),
        };
        let fields = StmtKind::fields_of(&tag).ok_or_else(|| D::Error::unknown_variant(&tag, StmtKind::TAGS))?;

        let mut own = Map::new();
        for field in std::iter::once("kind").chain(fields.iter().copied()) {
            if let Some(value) = meta.remove(field) {
                own.insert(field.to_string(), value);
            }
        }
        let kind = serde_json::from_value(Value::Object(own)).map_err(D::Error::custom)?;
        Ok(Self { kind, meta })
    }
}

/// A declared parameter; its name is what the argument list refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
}

/// One method of a [`TypeDecl`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    /// `None` for methods that return nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// `None` for methods without a body, which are never woven
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Block>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Method {
    /// Whether the method declares a return type other than `void`.
    pub fn returns_value(&self) -> bool {
        self.return_type.as_deref().is_some_and(|ty| ty != "void")
    }
}

/// A type declaration. The processor reads it with `methods` left out and
/// handles each method on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<Method>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl TypeDecl {
    /// A type with no methods, for building units in code.
    pub fn new(name: impl Into<String>, package: Option<&str>) -> Self {
        Self {
            name: name.into(),
            package: package.map(str::to_string),
            methods: Vec::new(),
            extra: Map::new(),
        }
    }

    /// `package.Name`, or just `Name` without a package.
    pub fn qualified_name(&self) -> String {
        match self.package.as_deref() {
            Some(package) if !package.is_empty() => format!("{}.{}", package, self.name),
            _ => self.name.clone(),
        }
    }

    /// Rule target of `method`: `package.Name.method`.
    pub fn target(&self, method: &Method) -> String {
        self.target_of(&method.name)
    }

    /// Rule target of the method called `method_name`.
    pub fn target_of(&self, method_name: &str) -> String {
        format!("{}.{}", self.qualified_name(), method_name)
    }
}

/// Visit every statement in `block`, descending into nested blocks.
pub fn walk<'a>(block: &'a [Stmt], visit: &mut impl FnMut(&'a Stmt)) {
    for stmt in block {
        visit(stmt);
        match &stmt.kind {
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                walk(then_branch, visit);
                if let Some(else_branch) = else_branch {
                    walk(else_branch, visit);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Block { body } => walk(body, visit),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                walk(body, visit);
                for catch in catches {
                    walk(&catch.body, visit);
                }
                if let Some(finally) = finally {
                    walk(finally, visit);
                }
            }
            _ => {}
        }
    }
}

/// Visit every expression in `expr`, including itself.
pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut impl FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Call { args, .. } => args.iter().for_each(|arg| walk_expr(arg, visit)),
        Expr::Array { items } => items.iter().for_each(|item| walk_expr(item, visit)),
        _ => {}
    }
}
