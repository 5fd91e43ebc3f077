use log::debug;

use crate::ir::element::{Action, CompareOp, Namespace, Value};
use crate::ir::rule::{Condition, EventKind, Rule};
use crate::lower::error::CompileError;
use crate::lower::slots::{StorageSlot, VarCollection};

// =============================================================================
// ACTIONS - Per-rule action sink and skip relocation
// =============================================================================
//
// The target VM only jumps forward, by "skip the next N actions", and N is
// unknown until the guarded block is fully lowered. Skips are therefore
// emitted as placeholders and patched later: `skip_start` appends the skip
// and returns a marker, the caller lowers the guarded block, then resolves
// the marker against the landing position. A marker is consumed by
// resolution, so every placeholder is patched exactly once.

/// Position of an unresolved skip placeholder. Not clonable: resolving it
/// consumes the marker.
#[derive(Debug)]
#[must_use = "an unresolved skip leaves a zero-distance placeholder behind"]
pub struct SkipStartMarker {
    index: usize,
}

/// The action list of one rule under construction.
pub struct ActionSet<'a> {
    vars: &'a mut VarCollection,
    rule_name: String,
    event: EventKind,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
    /// Set once any loop in the rule needs the restart machinery; the
    /// prologue is materialized by `into_rule`.
    continue_prologue: Option<StorageSlot>,
}

impl<'a> ActionSet<'a> {
    pub fn new(vars: &'a mut VarCollection, rule_name: impl Into<String>, event: EventKind) -> Self {
        Self {
            vars,
            rule_name: rule_name.into(),
            event,
            conditions: Vec::new(),
            actions: Vec::new(),
            continue_prologue: None,
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// Default namespace for locals declared in this rule.
    pub fn local_namespace(&self) -> Namespace {
        match self.event {
            EventKind::OngoingGlobal => Namespace::Global,
            EventKind::OngoingEachActor => Namespace::PerActor,
        }
    }

    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    /// Append one action; returns its position.
    pub fn add(&mut self, action: Action) -> usize {
        self.actions.push(action);
        self.actions.len() - 1
    }

    /// Number of actions appended so far. Also the position the next action
    /// will land at, which is how loop tops and skip targets are marked.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Append a forward-skip placeholder. With a condition the skip is
    /// taken when the condition holds; without one it is unconditional.
    pub fn skip_start(&mut self, condition: Option<Value>) -> SkipStartMarker {
        let placeholder = Value::Num(0.0);
        let index = match condition {
            Some(condition) => self.add(Action::SkipIf {
                condition,
                count: placeholder,
            }),
            None => self.add(Action::Skip { count: placeholder }),
        };
        SkipStartMarker { index }
    }

    /// Patch a placeholder so execution resumes at `target` (the position of
    /// the action the skip lands on).
    pub fn resolve_skip(
        &mut self,
        marker: SkipStartMarker,
        target: usize,
    ) -> Result<(), CompileError> {
        if target <= marker.index {
            return Err(CompileError::internal(format!(
                "skip at {} cannot land backwards at {}",
                marker.index, target
            )));
        }
        let count = Value::Num((target - marker.index - 1) as f64);
        match self.actions.get_mut(marker.index) {
            Some(Action::Skip { count: slot }) | Some(Action::SkipIf { count: slot, .. }) => {
                *slot = count;
                Ok(())
            }
            _ => Err(CompileError::internal(format!(
                "skip marker at {} does not point at a skip action",
                marker.index
            ))),
        }
    }

    /// Patch a placeholder to land on the next action appended.
    pub fn resolve_skip_to_here(&mut self, marker: SkipStartMarker) -> Result<(), CompileError> {
        let target = self.len();
        self.resolve_skip(marker, target)
    }

    // --- slot allocation, with budget errors blamed on this rule ---

    pub fn assign(&mut self, namespace: Namespace, name: &str) -> Result<StorageSlot, CompileError> {
        self.vars
            .assign(namespace, name)
            .map_err(|e| e.into_compile_error(&self.rule_name))
    }

    pub fn assign_extended(&mut self, namespace: Namespace) -> Result<StorageSlot, CompileError> {
        self.vars
            .assign_extended(namespace)
            .map_err(|e| e.into_compile_error(&self.rule_name))
    }

    pub fn release(&mut self, slot: StorageSlot) {
        self.vars.release(slot);
    }

    /// The restart counter, registering that this rule needs the prologue.
    pub fn continue_counter(&mut self) -> Result<StorageSlot, CompileError> {
        let slot = self
            .vars
            .continue_counter()
            .map_err(|e| e.into_compile_error(&self.rule_name))?;
        self.continue_prologue = Some(slot.clone());
        Ok(slot)
    }

    /// Finish the rule. If any loop used the restart machinery, a one-action
    /// prologue is prepended:
    ///
    ///   skip-if counter != 0, distance = counter
    ///
    /// The counter holds pre-prologue positions; because the prologue is
    /// exactly one action, skipping `counter` actions from position 0 lands
    /// at post-prologue position `counter + 1`, which is the same action the
    /// pre-prologue position named. Relative skips inside the body are
    /// unaffected by the prepend.
    pub fn into_rule(self) -> Rule {
        let mut actions = self.actions;
        if let Some(counter) = &self.continue_prologue {
            let read = counter.get(None);
            actions.insert(
                0,
                Action::SkipIf {
                    condition: Value::compare(CompareOp::Ne, read.clone(), Value::Num(0.0)),
                    count: read,
                },
            );
        }
        debug!(
            "finished rule '{}' with {} actions",
            self.rule_name,
            actions.len()
        );
        Rule {
            name: self.rule_name,
            event: self.event,
            conditions: self.conditions,
            actions,
        }
    }
}
