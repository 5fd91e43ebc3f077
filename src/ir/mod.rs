pub mod disasm;
pub mod element;
pub mod rule;

pub use element::{Action, ArithOp, CompareOp, ModifyOp, Namespace, Rounding, Value};
pub use rule::{Condition, EventKind, Rule, RuleSet};
