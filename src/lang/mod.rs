//! Resolved input surface of the lowering engine.
//!
//! The AST here arrives from the frontend already name-resolved and type
//! checked; lowering never raises user diagnostics for it. The builtin
//! catalogue enumerates every operation the source language can call.

pub mod ast;
pub mod builtin;

pub use ast::{Expr, PathStep, Stmt, TypeId, VarId};
pub use builtin::{Builtin, BuiltinKind};
