use crate::ir::element::{Action, CompareOp, ModifyOp, Value};
use crate::lower::actions::{ActionSet, SkipStartMarker};
use crate::lower::error::CompileError;
use crate::lower::slots::StorageSlot;

// =============================================================================
// CONTROL - Structured loops on skip/repeat primitives
// =============================================================================
//
// The VM's only repeat is `Loop`, which restarts the rule at action 0. A
// while loop therefore leans on the rule's restart prologue: every
// iteration stores the loop top's position in the shared restart counter
// and executes `Loop`; the prologue forwards the restart to the stored
// position. Exit paths land on a counter reset so the next restart of the
// rule falls through the prologue.
//
// `continue` sites cannot know where the repeat sequence will land until
// the body is fully lowered, so they emit placeholder skips that are
// patched in `finish` - the two-pass shape every forward-only backend ends
// up with.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    Unset,
    LoweringBody,
    Finished,
}

/// Lowers one `while` loop. Drive it `setup` -> body -> `finish`; calling
/// out of order is an internal contract violation, never a user error.
pub struct WhileBuilder {
    state: BuilderState,
    loop_top: usize,
    counter: Option<StorageSlot>,
    entry_skip: Option<SkipStartMarker>,
    continues: Vec<SkipStartMarker>,
    breaks: Vec<SkipStartMarker>,
}

impl Default for WhileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WhileBuilder {
    pub fn new() -> Self {
        Self {
            state: BuilderState::Unset,
            loop_top: 0,
            counter: None,
            entry_skip: None,
            continues: Vec::new(),
            breaks: Vec::new(),
        }
    }

    /// Mark the loop top and emit the guarded entry: skip to the loop exit
    /// while the condition is false.
    pub fn setup(&mut self, aset: &mut ActionSet<'_>, condition: Value) -> Result<(), CompileError> {
        if self.state != BuilderState::Unset {
            return Err(CompileError::internal("loop builder set up twice"));
        }
        self.counter = Some(aset.continue_counter()?);
        self.loop_top = aset.len();
        self.entry_skip = Some(aset.skip_start(Some(Value::not(condition))));
        self.state = BuilderState::LoweringBody;
        Ok(())
    }

    /// Record a `continue` site: a forward skip whose landing position is
    /// patched once the repeat sequence exists.
    pub fn add_continue(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        if self.state != BuilderState::LoweringBody {
            return Err(CompileError::internal("continue outside a loop body"));
        }
        self.continues.push(aset.skip_start(None));
        Ok(())
    }

    /// Record a `break` site, patched to the loop exit in `finish`.
    pub fn add_break(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        if self.state != BuilderState::LoweringBody {
            return Err(CompileError::internal("break outside a loop body"));
        }
        self.breaks.push(aset.skip_start(None));
        Ok(())
    }

    /// Emit the repeat sequence and resolve every pending marker. Continue
    /// sites land at `continue_target` (for a plain while, the repeat
    /// sequence itself).
    pub fn finish_from(
        mut self,
        aset: &mut ActionSet<'_>,
        continue_target: usize,
    ) -> Result<(), CompileError> {
        if self.state != BuilderState::LoweringBody {
            return Err(CompileError::internal("loop builder finished before set up"));
        }
        let counter = self
            .counter
            .take()
            .ok_or_else(|| CompileError::internal("loop builder lost its restart counter"))?;

        for marker in self.continues.drain(..) {
            aset.resolve_skip(marker, continue_target)?;
        }

        // Store the loop top, restart the rule; the prologue forwards the
        // restart back to the condition check.
        aset.add(counter.set(Value::Num(self.loop_top as f64), None));
        aset.add(Action::Loop);

        // Every exit path lands on the counter reset.
        let exit = aset.len();
        aset.add(counter.set(Value::Num(0.0), None));
        if let Some(entry) = self.entry_skip.take() {
            aset.resolve_skip(entry, exit)?;
        }
        for marker in self.breaks.drain(..) {
            aset.resolve_skip(marker, exit)?;
        }

        self.state = BuilderState::Finished;
        Ok(())
    }

    pub fn finish(self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        let target = aset.len();
        self.finish_from(aset, target)
    }
}

/// Lowers one `for-each`: a while over an implicit extended index slot,
/// `index < count(array)`, with the increment emitted ahead of the repeat
/// sequence so `continue` advances the iteration.
pub struct ForeachBuilder {
    inner: WhileBuilder,
    array: Value,
    index: Option<StorageSlot>,
}

impl ForeachBuilder {
    pub fn new(array: Value) -> Self {
        Self {
            inner: WhileBuilder::new(),
            array,
            index: None,
        }
    }

    pub fn setup(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        if self.index.is_some() {
            return Err(CompileError::internal("loop builder set up twice"));
        }
        let index = aset.assign_extended(aset.local_namespace())?;
        aset.add(index.set(Value::Num(0.0), None));
        let condition = Value::compare(
            CompareOp::Lt,
            index.get(None),
            Value::count_of(self.array.clone()),
        );
        self.inner.setup(aset, condition)?;
        self.index = Some(index);
        Ok(())
    }

    /// The element under iteration, for binding the loop variable.
    pub fn element(&self) -> Result<Value, CompileError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| CompileError::internal("loop element read before set up"))?;
        Ok(Value::value_in_array(self.array.clone(), index.get(None)))
    }

    /// The iteration index itself.
    pub fn index(&self) -> Result<Value, CompileError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| CompileError::internal("loop index read before set up"))?;
        Ok(index.get(None))
    }

    pub fn add_continue(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        self.inner.add_continue(aset)
    }

    pub fn add_break(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        self.inner.add_break(aset)
    }

    /// Emit the increment, delegate to the while finish with the increment
    /// as the continue target, then retire the index slot.
    pub fn finish(mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        let index = self
            .index
            .take()
            .ok_or_else(|| CompileError::internal("loop builder finished before set up"))?;

        let increment = aset.len();
        aset.add(index.modify(ModifyOp::Add, Value::Num(1.0), None));
        self.inner.finish_from(aset, increment)?;

        aset.add(index.reset_to_sentinel(None));
        aset.release(index);
        Ok(())
    }
}
