//! The lowering engine: resolved statements and expressions in, flat rule
//! actions out.

use std::rc::Rc;

use log::debug;

use crate::ir::element::{ModifyOp, Value};
use crate::ir::rule::{Condition, EventKind, Rule};
use crate::lang::ast::{Expr, Stmt};
use crate::lang::builtin::Builtin;

pub mod actions;
pub mod control;
pub mod error;
pub mod path;
pub mod scope;
pub mod slots;

pub use actions::{ActionSet, SkipStartMarker};
pub use control::{ForeachBuilder, WhileBuilder};
pub use error::CompileError;
pub use path::{AssignTarget, ChainValue};
pub use scope::{contained, Binder, BinderRef, Binding, Member, ObjectType, TypeRegistry};
pub use slots::{StorageSlot, VarCollection};

use crate::ir::Action;

enum LoopFrame {
    While(WhileBuilder),
    Foreach(ForeachBuilder),
}

impl LoopFrame {
    fn add_continue(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        match self {
            LoopFrame::While(b) => b.add_continue(aset),
            LoopFrame::Foreach(b) => b.add_continue(aset),
        }
    }

    fn add_break(&mut self, aset: &mut ActionSet<'_>) -> Result<(), CompileError> {
        match self {
            LoopFrame::While(b) => b.add_break(aset),
            LoopFrame::Foreach(b) => b.add_break(aset),
        }
    }
}

/// Per-rule lowering state: the action sink, the declared object types,
/// the current binder scope and the stack of open loops.
pub struct Lowerer<'a, 'v> {
    pub aset: &'a mut ActionSet<'v>,
    pub types: &'a TypeRegistry,
    pub binder: BinderRef,
    loops: Vec<LoopFrame>,
}

/// Lower one rule body into a finished rule.
pub fn lower_rule(
    vars: &mut VarCollection,
    types: &TypeRegistry,
    name: &str,
    event: EventKind,
    conditions: Vec<Condition>,
    body: &[Stmt],
) -> Result<Rule, CompileError> {
    debug!("lowering rule '{}'", name);
    let mut aset = ActionSet::new(vars, name, event);
    for condition in conditions {
        aset.add_condition(condition);
    }
    let mut lowerer = Lowerer::new(&mut aset, types, Binder::new_root());
    lowerer.lower_block(body)?;
    Ok(aset.into_rule())
}

impl<'a, 'v> Lowerer<'a, 'v> {
    pub fn new(aset: &'a mut ActionSet<'v>, types: &'a TypeRegistry, binder: BinderRef) -> Self {
        Self {
            aset,
            types,
            binder,
            loops: Vec::new(),
        }
    }

    /// Lower a statement block in a fresh child scope.
    pub fn lower_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        let saved = Rc::clone(&self.binder);
        self.binder = Binder::child(&saved);
        let mut result = Ok(());
        for stmt in stmts {
            result = self.lower_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        self.binder = saved;
        result
    }

    pub fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Declare {
                id,
                name,
                extended,
                init,
            } => {
                let namespace = self.aset.local_namespace();
                let slot = if *extended {
                    self.aset.assign_extended(namespace)?
                } else {
                    self.aset.assign(namespace, name)?
                };
                if let Some(init) = init {
                    let value = self.lower_expr(init)?;
                    self.aset.add(slot.set(value, None));
                }
                self.binder.borrow_mut().bind(*id, Binding::Direct(slot));
                Ok(())
            }
            Stmt::Assign { target, value } => {
                let Expr::Chain(steps) = target else {
                    return Err(CompileError::internal("assignment target is not a chain"));
                };
                let chain = self.resolve_chain(steps)?;
                if !chain.complete {
                    // Diagnostic already raised upstream; keep lowering the
                    // rest of the rule.
                    return Ok(());
                }
                let assign = chain
                    .assign
                    .ok_or_else(|| CompileError::internal("assignment to a value chain"))?;
                let value = self.lower_expr(value)?;
                let action = assign.set(value)?;
                self.aset.add(action);
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let condition = self.lower_expr(cond)?;
                let enter = self.aset.skip_start(Some(Value::not(condition)));
                self.lower_block(then_body)?;
                if else_body.is_empty() {
                    self.aset.resolve_skip_to_here(enter)
                } else {
                    let leave = self.aset.skip_start(None);
                    self.aset.resolve_skip_to_here(enter)?;
                    self.lower_block(else_body)?;
                    self.aset.resolve_skip_to_here(leave)
                }
            }
            Stmt::While { cond, body } => {
                let condition = self.lower_expr(cond)?;
                let mut builder = WhileBuilder::new();
                builder.setup(self.aset, condition)?;
                self.loops.push(LoopFrame::While(builder));
                let lowered = self.lower_block(body);
                let frame = self.loops.pop();
                lowered?;
                match frame {
                    Some(LoopFrame::While(builder)) => builder.finish(self.aset),
                    _ => Err(CompileError::internal("loop frame stack corrupted")),
                }
            }
            Stmt::Foreach { id, array, body } => {
                let array = self.lower_expr(array)?;
                let mut builder = ForeachBuilder::new(array);
                builder.setup(self.aset)?;
                let element = builder.element()?;

                let saved = Rc::clone(&self.binder);
                let child = Binder::child(&saved);
                child.borrow_mut().bind(*id, Binding::Computed(element));
                self.binder = child;
                self.loops.push(LoopFrame::Foreach(builder));
                let lowered = self.lower_block(body);
                let frame = self.loops.pop();
                self.binder = saved;
                lowered?;
                match frame {
                    Some(LoopFrame::Foreach(builder)) => builder.finish(self.aset),
                    _ => Err(CompileError::internal("loop frame stack corrupted")),
                }
            }
            Stmt::Continue => {
                let frame = self
                    .loops
                    .last_mut()
                    .ok_or_else(|| CompileError::internal("continue outside a loop"))?;
                frame.add_continue(self.aset)
            }
            Stmt::Break => {
                let frame = self
                    .loops
                    .last_mut()
                    .ok_or_else(|| CompileError::internal("break outside a loop"))?;
                frame.add_break(self.aset)
            }
        }
    }

    pub fn lower_expr(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Chain(steps) => Ok(self.resolve_chain(steps)?.result),
            Expr::Call { builtin, args } => self.lower_builtin(*builtin, args, None),
            Expr::Arith { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                Ok(Value::arith(*op, lhs, rhs))
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                Ok(Value::compare(*op, lhs, rhs))
            }
            Expr::Not(inner) => Ok(Value::not(self.lower_expr(inner)?)),
        }
    }

    /// Lower one builtin call. A chain's implicit receiver arrives as the
    /// first operand.
    pub fn lower_builtin(
        &mut self,
        builtin: Builtin,
        args: &[Expr],
        receiver: Option<Value>,
    ) -> Result<Value, CompileError> {
        let mut operands = Vec::with_capacity(args.len() + 1);
        if let Some(receiver) = receiver {
            operands.push(receiver);
        }
        for arg in args {
            operands.push(self.lower_expr(arg)?);
        }

        match builtin {
            Builtin::CountOf => {
                let [array] = take(builtin, operands)?;
                Ok(Value::count_of(array))
            }
            Builtin::FirstOf => {
                let [array] = take(builtin, operands)?;
                Ok(Value::first_of(array))
            }
            Builtin::Distance => {
                let [a, b] = take(builtin, operands)?;
                Ok(Value::distance_between(a, b))
            }
            Builtin::Contains => {
                let [array, value] = take(builtin, operands)?;
                Ok(Value::array_contains(array, value))
            }
            Builtin::IndexOf => {
                let [array, value] = take(builtin, operands)?;
                Ok(Value::index_of(array, value))
            }
            Builtin::PositionOf => {
                let [actor] = take(builtin, operands)?;
                Ok(Value::position_of(actor))
            }
            Builtin::RangeArray => {
                let [length] = take(builtin, operands)?;
                self.lower_range_array(length)
            }
            Builtin::Wait => {
                let [seconds] = take(builtin, operands)?;
                self.aset.add(Action::Wait { seconds });
                Ok(Value::Null)
            }
        }
    }

    /// `range_array(n)`: fill an extended temporary with `[0, 1, .., n-1]`
    /// via an emitted counting loop, then yield a read of the temporary.
    /// The temporary stays allocated - the returned value reads the slot
    /// lazily, whenever the consuming action executes.
    fn lower_range_array(&mut self, length: Value) -> Result<Value, CompileError> {
        let namespace = self.aset.local_namespace();
        let output = self.aset.assign_extended(namespace)?;
        let counter = self.aset.assign_extended(namespace)?;

        self.aset.add(output.set(Value::EmptyArray, None));
        self.aset.add(counter.set(Value::Num(0.0), None));

        let mut builder = WhileBuilder::new();
        builder.setup(
            self.aset,
            Value::compare(crate::ir::CompareOp::Lt, counter.get(None), length),
        )?;
        self.aset
            .add(output.modify(ModifyOp::AppendToArray, counter.get(None), None));
        self.aset
            .add(counter.modify(ModifyOp::Add, Value::Num(1.0), None));
        builder.finish(self.aset)?;

        self.aset.add(counter.reset_to_sentinel(None));
        self.aset.release(counter);
        Ok(output.get(None))
    }
}

fn take<const N: usize>(builtin: Builtin, operands: Vec<Value>) -> Result<[Value; N], CompileError> {
    let got = operands.len();
    operands.try_into().map_err(|_| {
        CompileError::internal(format!(
            "{} expects {} operands, got {}",
            builtin.name(),
            N,
            got
        ))
    })
}
