//! Inserts dispatcher and action-recorder calls into one method.

use super::edit;
use super::ir::{walk, walk_expr, Block, Expr, Method, Stmt, StmtKind, TypeDecl};
use crate::action::{default_record_predicate, RecordPredicate};
use crate::config::{Rule, TriggerPoint};
use crate::error::{LogweaveError, Result};

/// Prefix of every identifier the weaver introduces. Sources using it are
/// rejected.
pub const RESERVED_PREFIX: &str = "__logweave_";
pub const ERROR_BINDING: &str = "__logweave_err";
pub const DEFAULT_CATCH_TYPE: &str = "Throwable";

pub const LOG_ENTRY: &str = "logweave.dispatcher.log_entry";
pub const LOG_RETURN: &str = "logweave.dispatcher.log_return";
pub const LOG_EXCEPTION: &str = "logweave.dispatcher.log_exception";
pub const RECORD_ENTRY: &str = "logweave.action.record_entry";
pub const RECORD_RETURN: &str = "logweave.action.record_return";
pub const RECORD_EXCEPTION: &str = "logweave.action.record_exception";

/// Knobs for [`DefaultCodeInjector`].
///
/// # Examples
///
/// ```
/// use logweave::weaver::{DefaultCodeInjector, WeaveOptions};
///
/// let injector = DefaultCodeInjector::new(WeaveOptions::default().with_catch_type("Exception").without_actions());
/// assert!(!injector.options().record_actions);
/// ```
#[derive(Clone)]
pub struct WeaveOptions {
    /// Broadest error type of the host language
    pub catch_type: String,
    pub record_actions: bool,
    pub record_predicate: RecordPredicate,
}

impl Default for WeaveOptions {
    fn default() -> Self {
        Self {
            catch_type: DEFAULT_CATCH_TYPE.to_string(),
            record_actions: true,
            record_predicate: default_record_predicate(),
        }
    }
}

impl WeaveOptions {
    pub fn with_catch_type(mut self, catch_type: impl Into<String>) -> Self {
        self.catch_type = catch_type.into();
        self
    }

    /// Never insert action-recorder calls.
    pub fn without_actions(mut self) -> Self {
        self.record_actions = false;
        self
    }

    pub fn with_record_predicate(mut self, predicate: RecordPredicate) -> Self {
        self.record_predicate = predicate;
        self
    }
}

pub trait CodeInjector: Send + Sync {
    /// Instrument `method` of `owner` for `rule`. On error `method` may be
    /// partially edited; callers weave a copy.
    fn inject(&self, owner: &TypeDecl, method: &mut Method, rule: &Rule) -> Result<()>;
}

/// Inserts entry, return and exception calls as the rule's triggers ask, plus
/// the matching action-recorder calls for types that pass the record
/// predicate.
#[derive(Clone, Default)]
pub struct DefaultCodeInjector {
    options: WeaveOptions,
}

/// Names and argument expressions shared by every call inserted into one
/// method.
struct CallShape {
    target: String,
    class: String,
    method: String,
    args: Expr,
    record: bool,
}

impl CallShape {
    fn log_args(&self, extra: Option<Expr>) -> Vec<Expr> {
        let mut args = vec![
            Expr::string(&self.target),
            Expr::string(&self.class),
            Expr::string(&self.method),
            self.args.clone(),
        ];
        args.extend(extra);
        args
    }

    fn record_args(&self, extra: Option<Expr>) -> Vec<Expr> {
        let mut args = vec![Expr::string(&self.class), Expr::string(&self.method), self.args.clone()];
        args.extend(extra);
        args
    }

    fn calls(&self, log: &str, record: &str, extra: Option<Expr>) -> Vec<Stmt> {
        let mut stmts = vec![Stmt::expr(Expr::call(log, self.log_args(extra.clone())))];
        if self.record {
            stmts.push(Stmt::expr(Expr::call(record, self.record_args(extra))));
        }
        stmts
    }
}

impl DefaultCodeInjector {
    pub fn new(options: WeaveOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &WeaveOptions {
        &self.options
    }

    /// Whether methods of `owner` get action-recorder calls. The predicate
    /// sees the simple type name, never the package.
    pub fn records_actions_for(&self, owner: &TypeDecl) -> bool {
        self.options.record_actions && (self.options.record_predicate)(&owner.name)
    }

    fn weave_returns(&self, target: &str, shape: &CallShape, method: &Method, body: &mut Block) -> Result<()> {
        let returns_value = method.returns_value();
        let mut counter = 0usize;
        let mut mismatch = None;

        edit::replace_returns(body, &mut |value| match value {
            Some(value) => {
                if !returns_value {
                    mismatch = Some("value returned from a method with no return type");
                }
                let temp = format!("{}ret_{}", RESERVED_PREFIX, counter);
                counter += 1;

                let mut stmts = vec![Stmt::new(StmtKind::Let {
                    name: temp.clone(),
                    ty: method.return_type.clone(),
                    value,
                })];
                stmts.extend(shape.calls(LOG_RETURN, RECORD_RETURN, Some(Expr::var(&temp))));
                stmts.push(Stmt::ret(Some(Expr::var(temp))));
                stmts
            }
            None => {
                if returns_value {
                    mismatch = Some("bare return in a method with a return type");
                }
                let mut stmts = shape.calls(LOG_RETURN, RECORD_RETURN, Some(Expr::null()));
                stmts.push(Stmt::ret(None));
                stmts
            }
        });

        if let Some(reason) = mismatch {
            return Err(LogweaveError::weaving(target, reason));
        }

        // Falling off the end of a method with no return type is a return too.
        if !returns_value && edit::can_complete_normally(body) {
            edit::insert_end(body, shape.calls(LOG_RETURN, RECORD_RETURN, Some(Expr::null())));
        }
        Ok(())
    }
}

impl CodeInjector for DefaultCodeInjector {
    fn inject(&self, owner: &TypeDecl, method: &mut Method, rule: &Rule) -> Result<()> {
        let target = owner.target(method);
        let Some(mut body) = method.body.take() else {
            return Err(LogweaveError::weaving(target, "method has no body"));
        };
        check_reserved(&target, method, &body)?;

        let shape = CallShape {
            target: target.clone(),
            class: owner.name.clone(),
            method: method.name.clone(),
            args: Expr::Array {
                items: method.params.iter().map(|p| Expr::var(&p.name)).collect(),
            },
            record: self.records_actions_for(owner),
        };

        if rule.triggers_on(TriggerPoint::OnReturn) {
            self.weave_returns(&target, &shape, method, &mut body)?;
        }
        if rule.triggers_on(TriggerPoint::OnEntry) {
            edit::insert_begin(&mut body, shape.calls(LOG_ENTRY, RECORD_ENTRY, None));
        }
        if rule.triggers_on(TriggerPoint::OnException) {
            let handler = shape.calls(LOG_EXCEPTION, RECORD_EXCEPTION, Some(Expr::var(ERROR_BINDING)));
            edit::wrap_in_try(&mut body, &self.options.catch_type, ERROR_BINDING, handler);
        }

        method.body = Some(body);
        Ok(())
    }
}

/// Reject methods that already use the weaver's identifier prefix.
fn check_reserved(target: &str, method: &Method, body: &Block) -> Result<()> {
    let mut names: Vec<&str> = method.params.iter().map(|p| p.name.as_str()).collect();
    let mut exprs: Vec<&Expr> = Vec::new();

    walk(body, &mut |stmt| match &stmt.kind {
        StmtKind::Let { name, value, .. } => {
            names.push(name);
            exprs.push(value);
        }
        StmtKind::Try { catches, .. } => names.extend(catches.iter().map(|c| c.binding.as_str())),
        StmtKind::Expr { expr } | StmtKind::Throw { value: expr } => exprs.push(expr),
        StmtKind::Return { value: Some(expr) } => exprs.push(expr),
        StmtKind::If { condition, .. } | StmtKind::While { condition, .. } => exprs.push(condition),
        StmtKind::Return { value: None } | StmtKind::Block { .. } | StmtKind::Raw { .. } => {}
    });
    for expr in exprs {
        walk_expr(expr, &mut |e| {
            if let Expr::Var { name } = e {
                names.push(name);
            }
        });
    }

    match names.into_iter().find(|name| name.starts_with(RESERVED_PREFIX)) {
        Some(name) => Err(LogweaveError::weaving(
            target,
            format!("identifier {} uses the reserved prefix {}", name, RESERVED_PREFIX),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weaver::ir::Param;
    use serde_json::json;

    fn owner(name: &str) -> TypeDecl {
        TypeDecl::new(name, Some("com.shop"))
    }

    fn method(return_type: Option<&str>, body: Block) -> Method {
        Method {
            name: "find".to_string(),
            params: vec![Param {
                name: "id".to_string(),
                ty: Some("String".to_string()),
            }],
            return_type: return_type.map(str::to_string),
            body: Some(body),
            extra: Default::default(),
        }
    }

    fn rule(triggers: &[TriggerPoint]) -> Rule {
        Rule::new("com.shop.*", "biz").with_triggers(triggers.iter().copied())
    }

    fn callees(body: &Block) -> Vec<String> {
        let mut names = Vec::new();
        walk(body, &mut |stmt| {
            if let StmtKind::Expr {
                expr: Expr::Call { callee, .. },
            } = &stmt.kind
            {
                names.push(callee.clone());
            }
        });
        names
    }

    fn raw(code: &str) -> Expr {
        Expr::Raw { code: code.to_string() }
    }

    fn branch(condition: &str, then_branch: Block) -> Stmt {
        Stmt::new(StmtKind::If {
            condition: raw(condition),
            then_branch,
            else_branch: None,
        })
    }

    #[test]
    fn test_entry_call_is_first_statement() {
        let injector = DefaultCodeInjector::default();
        let mut m = method(None, vec![Stmt::raw("work();")]);

        injector.inject(&owner("PriceMath"), &mut m, &rule(&[TriggerPoint::OnEntry])).unwrap();

        let body = m.body.unwrap();
        assert_eq!(
            body[0],
            Stmt::expr(Expr::call(
                LOG_ENTRY,
                vec![
                    Expr::string("com.shop.PriceMath.find"),
                    Expr::string("PriceMath"),
                    Expr::string("find"),
                    Expr::Array { items: vec![Expr::var("id")] },
                ]
            ))
        );
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_statement_metadata_survives_weaving() {
        let injector = DefaultCodeInjector::new(WeaveOptions::default().without_actions());
        let mut work = Stmt::raw("work();");
        work.meta.insert("line".to_string(), json!(7));
        let mut early = Stmt::ret(None);
        early.meta.insert("line".to_string(), json!(9));
        let mut m = method(None, vec![work.clone(), branch("id == null", vec![early])]);

        injector.inject(&owner("Jobs"), &mut m, &rule(&TriggerPoint::ALL)).unwrap();

        let rendered = serde_json::to_value(&m).unwrap();
        let text = rendered.to_string();
        assert!(text.contains(r#""line":7"#));
        assert!(text.contains(r#""line":9"#));

        let StmtKind::Try { body, .. } = &m.body.as_ref().unwrap()[0].kind else {
            panic!("expected a try block");
        };
        assert_eq!(body[1], work);
    }

    #[test]
    fn test_value_return_evaluated_once_through_temporary() {
        let injector = DefaultCodeInjector::new(WeaveOptions::default().without_actions());
        let mut m = method(Some("Product"), vec![Stmt::ret(Some(raw("repo.find(id)")))]);

        injector.inject(&owner("ProductService"), &mut m, &rule(&[TriggerPoint::OnReturn])).unwrap();

        let body = m.body.unwrap();
        assert_eq!(
            body,
            vec![Stmt::block(vec![
                Stmt::new(StmtKind::Let {
                    name: "__logweave_ret_0".to_string(),
                    ty: Some("Product".to_string()),
                    value: raw("repo.find(id)"),
                }),
                Stmt::expr(Expr::call(
                    LOG_RETURN,
                    vec![
                        Expr::string("com.shop.ProductService.find"),
                        Expr::string("ProductService"),
                        Expr::string("find"),
                        Expr::Array { items: vec![Expr::var("id")] },
                        Expr::var("__logweave_ret_0"),
                    ]
                )),
                Stmt::ret(Some(Expr::var("__logweave_ret_0"))),
            ])]
        );
    }

    #[test]
    fn test_each_value_return_gets_own_temporary() {
        let injector = DefaultCodeInjector::default();
        let mut m = method(
            Some("int"),
            vec![
                branch("id == null", vec![Stmt::ret(Some(Expr::Literal { value: json!(0) }))]),
                Stmt::ret(Some(raw("compute(id)"))),
            ],
        );

        injector.inject(&owner("Calc"), &mut m, &rule(&[TriggerPoint::OnReturn])).unwrap();

        let mut temps = Vec::new();
        walk(m.body.as_ref().unwrap(), &mut |stmt| {
            if let StmtKind::Let { name, .. } = &stmt.kind {
                temps.push(name.clone());
            }
        });
        assert_eq!(temps, vec!["__logweave_ret_0", "__logweave_ret_1"]);
    }

    #[test]
    fn test_void_returns_and_fallthrough() {
        let injector = DefaultCodeInjector::new(WeaveOptions::default().without_actions());
        let mut m = method(
            None,
            vec![branch("id == null", vec![Stmt::ret(None)]), Stmt::raw("work(id);")],
        );

        injector.inject(&owner("Jobs"), &mut m, &rule(&[TriggerPoint::OnReturn])).unwrap();

        let body = m.body.unwrap();
        assert_eq!(callees(&body), vec![LOG_RETURN, LOG_RETURN]);
        match &body[0].kind {
            StmtKind::If { then_branch, .. } => match &then_branch[0].kind {
                StmtKind::Block { body } => assert_eq!(body.last(), Some(&Stmt::ret(None))),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_fallthrough_call_when_body_always_returns() {
        let injector = DefaultCodeInjector::new(WeaveOptions::default().without_actions());
        let mut m = method(None, vec![Stmt::raw("work();"), Stmt::ret(None)]);

        injector.inject(&owner("Jobs"), &mut m, &rule(&[TriggerPoint::OnReturn])).unwrap();

        assert_eq!(callees(m.body.as_ref().unwrap()), vec![LOG_RETURN]);
    }

    #[test]
    fn test_exception_wraps_and_rethrows() {
        let injector = DefaultCodeInjector::new(WeaveOptions::default().with_catch_type("Exception"));
        let mut m = method(None, vec![Stmt::raw("work();")]);

        injector.inject(&owner("UserService"), &mut m, &rule(&[TriggerPoint::OnException])).unwrap();

        let body = m.body.unwrap();
        assert_eq!(body.len(), 1);
        let StmtKind::Try { catches, .. } = &body[0].kind else {
            panic!("expected a try block");
        };
        assert_eq!(catches[0].error_type, "Exception");
        assert_eq!(catches[0].binding, ERROR_BINDING);
        assert_eq!(catches[0].body.last(), Some(&Stmt::throw(Expr::var(ERROR_BINDING))));
        assert_eq!(callees(&catches[0].body), vec![LOG_EXCEPTION, RECORD_EXCEPTION]);
    }

    #[test]
    fn test_action_calls_gated_by_type_name() {
        let injector = DefaultCodeInjector::default();
        let all = rule(&TriggerPoint::ALL);

        let mut service = method(Some("Product"), vec![Stmt::ret(Some(raw("p")))]);
        injector.inject(&owner("ProductService"), &mut service, &all).unwrap();
        let names = callees(service.body.as_ref().unwrap());
        assert!(names.contains(&RECORD_ENTRY.to_string()));
        assert!(names.contains(&RECORD_RETURN.to_string()));

        let mut helper = method(Some("Product"), vec![Stmt::ret(Some(raw("p")))]);
        injector.inject(&owner("PriceMath"), &mut helper, &all).unwrap();
        assert!(callees(helper.body.as_ref().unwrap()).iter().all(|c| c.starts_with("logweave.dispatcher")));
    }

    #[test]
    fn test_action_gate_uses_simple_type_name() {
        let injector = DefaultCodeInjector::default();
        let helper = TypeDecl::new("PriceMath", Some("com.shop.service"));

        assert!(!injector.records_actions_for(&helper));
        assert!(injector.records_actions_for(&owner("OrderController")));
        assert!(!DefaultCodeInjector::new(WeaveOptions::default().without_actions())
            .records_actions_for(&owner("OrderController")));
    }

    #[test]
    fn test_reserved_identifier_is_rejected() {
        let injector = DefaultCodeInjector::default();
        let mut m = method(Some("int"), vec![Stmt::ret(Some(Expr::var("__logweave_ret_0")))]);

        let err = injector.inject(&owner("Calc"), &mut m, &rule(&TriggerPoint::ALL)).unwrap_err();
        assert!(matches!(err, LogweaveError::Weaving { .. }));
    }

    #[test]
    fn test_value_return_in_void_method_is_rejected() {
        let injector = DefaultCodeInjector::default();
        let mut m = method(None, vec![Stmt::ret(Some(raw("1")))]);

        assert!(injector.inject(&owner("Calc"), &mut m, &rule(&[TriggerPoint::OnReturn])).is_err());
    }
}
