use crate::ir::element::{Action, CompareOp, Value};
use serde::{Deserialize, Serialize};

/// The event a rule is attached to. The host re-triggers rules on its own;
/// the compiler only records which trigger class a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Runs once per trigger, no event actor; locals default to the global
    /// namespace.
    OngoingGlobal,
    /// Runs once per matching actor; locals default to the per-actor
    /// namespace.
    OngoingEachActor,
}

/// A trigger condition. All conditions must hold for the rule to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub lhs: Value,
    pub op: CompareOp,
    pub rhs: Value,
}

impl Condition {
    pub fn new(lhs: Value, op: CompareOp, rhs: Value) -> Self {
        Self { lhs, op, rhs }
    }
}

/// One compiled rule: a named trigger plus its ordered action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub event: EventKind,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// A compiled program: rules in emission order.
///
/// Execution order across rules is not guaranteed by the host; only the
/// action order within one rule is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }
}
