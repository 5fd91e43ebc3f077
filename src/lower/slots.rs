use std::collections::HashMap;

use log::trace;

use crate::ir::element::{Action, ModifyOp, Namespace, Value};
use crate::lower::error::CompileError;

// =============================================================================
// SLOTS - Storage slot allocation
// =============================================================================
//
// The target VM offers two flat storage namespaces (global, per-actor) with a
// fixed number of numbered slots each. The low indices are minted one per
// named variable and live for the whole program. Everything above
// `NAMED_BUDGET` is the extended pool: anonymous temporaries handed out on
// demand and explicitly released back once the computation that borrowed
// them is done. Release is a protocol, not garbage collection - a released
// slot is reset to the sentinel by its borrower before `release` is called.

/// Slots below this index are named; at and above it is the extended pool.
pub const NAMED_BUDGET: u32 = 128;

/// Total slots per namespace.
pub const SLOT_BUDGET: u32 = 1024;

/// Value written into an extended slot when its borrower is done with it.
pub const RELEASE_SENTINEL: f64 = -1.0;

/// One addressable storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSlot {
    pub namespace: Namespace,
    pub index: u32,
    /// Stable name for user-named variables, `None` for temporaries.
    pub name: Option<String>,
    pub extended: bool,
}

impl StorageSlot {
    /// Read the slot. `actor` selects whose copy to read in the per-actor
    /// namespace; global slots ignore it.
    pub fn get(&self, actor: Option<Value>) -> Value {
        match self.namespace {
            Namespace::Global => Value::GetGlobal { index: self.index },
            Namespace::PerActor => Value::GetPlayer {
                index: self.index,
                actor: Box::new(actor.unwrap_or(Value::EventActor)),
            },
        }
    }

    /// Write the whole slot.
    pub fn set(&self, value: Value, actor: Option<Value>) -> Action {
        self.set_at(value, actor, None)
    }

    /// Write the slot, or a single element of it when `element` is given.
    pub fn set_at(&self, value: Value, actor: Option<Value>, element: Option<Value>) -> Action {
        match self.namespace {
            Namespace::Global => Action::SetGlobal {
                index: self.index,
                element,
                value,
            },
            Namespace::PerActor => Action::SetPlayer {
                index: self.index,
                actor: actor.unwrap_or(Value::EventActor),
                element,
                value,
            },
        }
    }

    /// In-place modification without rewriting the slot.
    pub fn modify(&self, op: ModifyOp, value: Value, actor: Option<Value>) -> Action {
        match self.namespace {
            Namespace::Global => Action::ModifyGlobal {
                index: self.index,
                op,
                value,
            },
            Namespace::PerActor => Action::ModifyPlayer {
                index: self.index,
                actor: actor.unwrap_or(Value::EventActor),
                op,
                value,
            },
        }
    }

    /// The action that returns this extended slot to the pool's resting
    /// state. The caller still has to `release` the slot afterwards.
    pub fn reset_to_sentinel(&self, actor: Option<Value>) -> Action {
        self.set(Value::Num(RELEASE_SENTINEL), actor)
    }
}

#[derive(Debug, Default)]
struct NamespacePool {
    next_named: u32,
    /// Dedup counters keyed by requested name.
    name_uses: HashMap<String, u32>,
    next_extended: u32,
    /// Released extended indices, reused before growing the pool.
    free_extended: Vec<u32>,
}

/// Allocator for both storage namespaces.
///
/// One collection serves the whole compilation; named slots are stable
/// across rules while extended slots cycle through the free list.
#[derive(Debug)]
pub struct VarCollection {
    global: NamespacePool,
    per_actor: NamespacePool,
    continue_counter: Option<StorageSlot>,
}

impl Default for VarCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl VarCollection {
    pub fn new() -> Self {
        Self {
            global: NamespacePool {
                next_extended: NAMED_BUDGET,
                ..NamespacePool::default()
            },
            per_actor: NamespacePool {
                next_extended: NAMED_BUDGET,
                ..NamespacePool::default()
            },
            continue_counter: None,
        }
    }

    fn pool_mut(&mut self, namespace: Namespace) -> &mut NamespacePool {
        match namespace {
            Namespace::Global => &mut self.global,
            Namespace::PerActor => &mut self.per_actor,
        }
    }

    /// Mint a slot tied to a stable name. Duplicate names within a
    /// namespace get a deterministic numeric suffix.
    pub fn assign(
        &mut self,
        namespace: Namespace,
        name: &str,
    ) -> Result<StorageSlot, SlotBudgetError> {
        let pool = self.pool_mut(namespace);
        if pool.next_named >= NAMED_BUDGET {
            return Err(SlotBudgetError {
                namespace,
                extended: false,
            });
        }
        let index = pool.next_named;
        pool.next_named += 1;

        let uses = pool.name_uses.entry(name.to_string()).or_insert(0);
        *uses += 1;
        let unique = if *uses == 1 {
            name.to_string()
        } else {
            format!("{}_{}", name, *uses - 1)
        };

        trace!("assigned named slot {:?}[{}] = {}", namespace, index, unique);
        Ok(StorageSlot {
            namespace,
            index,
            name: Some(unique),
            extended: false,
        })
    }

    /// Borrow a temporary from the extended pool. Pair with `release`.
    pub fn assign_extended(
        &mut self,
        namespace: Namespace,
    ) -> Result<StorageSlot, SlotBudgetError> {
        let pool = self.pool_mut(namespace);
        let index = if let Some(index) = pool.free_extended.pop() {
            index
        } else {
            if pool.next_extended >= SLOT_BUDGET {
                return Err(SlotBudgetError {
                    namespace,
                    extended: true,
                });
            }
            let index = pool.next_extended;
            pool.next_extended += 1;
            index
        };

        trace!("borrowed extended slot {:?}[{}]", namespace, index);
        Ok(StorageSlot {
            namespace,
            index,
            name: None,
            extended: true,
        })
    }

    /// Return an extended slot to the pool. The borrower must have emitted
    /// the sentinel reset first.
    pub fn release(&mut self, slot: StorageSlot) {
        debug_assert!(slot.extended, "only extended slots are released");
        let pool = self.pool_mut(slot.namespace);
        debug_assert!(
            !pool.free_extended.contains(&slot.index),
            "double release of extended slot {}",
            slot.index
        );
        pool.free_extended.push(slot.index);
    }

    /// The shared counter driving every rule's continue-skip prologue.
    /// Allocated lazily from the named global pool the first time any loop
    /// needs a `continue`.
    pub fn continue_counter(&mut self) -> Result<StorageSlot, SlotBudgetError> {
        if let Some(slot) = &self.continue_counter {
            return Ok(slot.clone());
        }
        let slot = self.assign(Namespace::Global, "continue_skip")?;
        self.continue_counter = Some(slot.clone());
        Ok(slot)
    }
}

/// Raised when a namespace's slot budget runs out. The action sink wraps
/// this with the name of the rule being compiled.
#[derive(Debug, Clone, Copy)]
pub struct SlotBudgetError {
    pub namespace: Namespace,
    pub extended: bool,
}

impl SlotBudgetError {
    pub fn into_compile_error(self, rule: &str) -> CompileError {
        CompileError::SlotBudget {
            namespace: self.namespace,
            extended: self.extended,
            rule: rule.to_string(),
        }
    }
}
