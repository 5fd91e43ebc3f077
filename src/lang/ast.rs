use crate::ir::element::{ArithOp, CompareOp};
use crate::lang::builtin::Builtin;

// =============================================================================
// AST - Resolved input surface
// =============================================================================
//
// The frontend (parser, name resolver, type checker) is an external
// collaborator. What reaches the lowering engine is already resolved: every
// variable reference carries its binding identity and every step of an
// access chain carries its static type (an object type id, or none for
// primitives).

/// Identity of a resolved variable binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// Identity of an emulated object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

/// One link of an access chain `a.b.c(...).d[i]`, evaluated strictly left
/// to right.
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// A variable reference, possibly array-indexed.
    Var {
        id: VarId,
        indices: Vec<Expr>,
        /// Static type when the step denotes an emulated object instance.
        ty: Option<TypeId>,
    },
    /// A call evaluated against the chain's current implicit target.
    Call {
        builtin: Builtin,
        args: Vec<Expr>,
        ty: Option<TypeId>,
    },
    /// Left behind by parser error recovery. Resolution of the chain stops
    /// here and yields the "unresolved" sentinel; the diagnostic was already
    /// raised upstream.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Bool(bool),
    /// An access chain. A plain variable reference is a one-step chain.
    Chain(Vec<PathStep>),
    Call {
        builtin: Builtin,
        args: Vec<Expr>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    /// A single-variable chain without indices.
    pub fn var(id: VarId) -> Expr {
        Expr::Chain(vec![PathStep::Var {
            id,
            indices: Vec::new(),
            ty: None,
        }])
    }

    pub fn num(n: f64) -> Expr {
        Expr::Num(n)
    }

    pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn arith(op: ArithOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Arith {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Introduce a new variable backed by a fresh storage slot.
    Declare {
        id: VarId,
        name: String,
        extended: bool,
        init: Option<Expr>,
    },
    /// `target` must resolve to an assignable location (guaranteed by the
    /// upstream type checker).
    Assign { target: Expr, value: Expr },
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Foreach {
        id: VarId,
        array: Expr,
        body: Vec<Stmt>,
    },
    Continue,
    Break,
}
