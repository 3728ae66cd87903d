//! Build-time weaver.
//!
//! Method bodies arrive as a small statement-list IR ([`ir`]). For each
//! method whose target matches a rule, [`injector`] inserts dispatcher calls
//! (and optionally action-recorder calls) at the rule's trigger points using
//! the control-flow preserving edits in [`edit`]. [`processor`] runs this
//! over a whole source tree.

pub mod edit;
pub mod injector;
pub mod ir;
pub mod processor;

pub use injector::{CodeInjector, DefaultCodeInjector, WeaveOptions};
pub use ir::{Block, Catch, Expr, Method, Param, Stmt, StmtKind, TypeDecl};
pub use processor::{ProjectProcessor, WeaveFailure, WeaveReport};
