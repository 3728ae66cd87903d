//! Control-flow preserving edits on a method body.
//!
//! Each edit keeps the body's observable behavior: every original expression
//! is evaluated exactly once and in the original order, every original exit
//! (normal or exceptional) stays an exit with the same value or error.

use super::ir::{Block, Catch, Expr, Stmt, StmtKind};

/// Insert `stmts` before the first statement.
pub fn insert_begin(body: &mut Block, stmts: Vec<Stmt>) {
    body.splice(0..0, stmts);
}

/// Append `stmts` after the last statement.
pub fn insert_end(body: &mut Block, stmts: Vec<Stmt>) {
    body.extend(stmts);
}

/// Rewrite every `return` in `body`, including nested ones.
///
/// `rewrite` receives the returned expression (`None` for a bare `return`)
/// and produces the statements that replace the return; they are placed in
/// one nested block, which keeps the return's metadata, so any temporaries
/// they introduce stay local.
pub fn replace_returns(body: &mut Block, rewrite: &mut impl FnMut(Option<Expr>) -> Vec<Stmt>) -> usize {
    let mut replaced = 0;
    for stmt in body.iter_mut() {
        match &mut stmt.kind {
            StmtKind::Return { value } => {
                let replacement = rewrite(value.take());
                *stmt = stmt.replaced_by(StmtKind::Block { body: replacement });
                replaced += 1;
            }
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                replaced += replace_returns(then_branch, rewrite);
                if let Some(else_branch) = else_branch {
                    replaced += replace_returns(else_branch, rewrite);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Block { body } => {
                replaced += replace_returns(body, rewrite);
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                replaced += replace_returns(body, rewrite);
                for catch in catches.iter_mut() {
                    replaced += replace_returns(&mut catch.body, rewrite);
                }
                if let Some(finally) = finally {
                    replaced += replace_returns(finally, rewrite);
                }
            }
            _ => {}
        }
    }
    replaced
}

/// Replace the body with one protected block around it. The handler runs
/// `handler` and then rethrows the caught error bound to `binding`.
pub fn wrap_in_try(body: &mut Block, error_type: &str, binding: &str, handler: Vec<Stmt>) {
    let original = std::mem::take(body);
    let mut catch_body = handler;
    catch_body.push(Stmt::throw(Expr::var(binding)));
    body.push(Stmt::new(StmtKind::Try {
        body: original,
        catches: vec![Catch::new(error_type, binding, catch_body)],
        finally: None,
    }));
}

/// Whether control can fall off the end of `block`.
///
/// Conservative in the same direction as a compiler's reachability check:
/// only `return`, `throw`, and loops on a literal `true` are treated as never
/// completing, so the answer is `true` whenever in doubt.
pub fn can_complete_normally(block: &[Stmt]) -> bool {
    block.iter().all(stmt_completes)
}

fn stmt_completes(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return { .. } | StmtKind::Throw { .. } => false,
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => match else_branch {
            Some(else_branch) => can_complete_normally(then_branch) || can_complete_normally(else_branch),
            None => true,
        },
        StmtKind::While { condition, .. } => !is_literal_true(condition),
        StmtKind::Block { body } => can_complete_normally(body),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            let finally_completes = finally.as_deref().map_or(true, can_complete_normally);
            let some_path_completes =
                can_complete_normally(body) || catches.iter().any(|c| can_complete_normally(&c.body));
            finally_completes && some_path_completes
        }
        StmtKind::Expr { .. } | StmtKind::Let { .. } | StmtKind::Raw { .. } => true,
    }
}

fn is_literal_true(expr: &Expr) -> bool {
    match expr {
        Expr::Literal { value } => value.as_bool() == Some(true),
        Expr::Raw { code } => code.trim() == "true",
        _ => false,
    }
}
