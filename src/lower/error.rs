use crate::ir::element::Namespace;

/// Failures raised by the lowering engine.
///
/// Two tiers. `SlotBudget` is the only user-facing error this layer can
/// produce: storage exhaustion is caused by the program being compiled and
/// the report names the offending rule. Everything else the engine could
/// trip over (unbound identities, builders driven out of order, malformed
/// assignment targets) was guaranteed impossible by the upstream resolver
/// and type checker, so those become `Internal` - a compiler defect that
/// must abort compilation rather than miscompile.
#[derive(Debug, Clone)]
pub enum CompileError {
    /// The fixed slot budget of a storage namespace is exhausted.
    SlotBudget {
        namespace: Namespace,
        extended: bool,
        rule: String,
    },
    /// A broken invariant inside the compiler itself.
    Internal(String),
}

impl CompileError {
    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::SlotBudget {
                namespace,
                extended,
                rule,
            } => {
                let pool = if *extended { "extended" } else { "named" };
                let ns = match namespace {
                    Namespace::Global => "global",
                    Namespace::PerActor => "per-actor",
                };
                write!(
                    f,
                    "compile error: out of {} {} storage slots while compiling rule '{}'",
                    pool, ns, rule
                )
            }
            CompileError::Internal(msg) => {
                write!(f, "compile error: internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CompileError {}
