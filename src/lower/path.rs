use crate::ir::element::{Action, Value};
use crate::lang::ast::PathStep;
use crate::lower::error::CompileError;
use crate::lower::scope::{contained, Binding};
use crate::lower::Lowerer;

// =============================================================================
// PATH - Access chain resolution
// =============================================================================
//
// A chain `a.b.c(...).d[i]` is resolved strictly left to right. Two pieces
// of state thread through the walk: the implicit receiver (the previous
// step's result) and the binder the next step resolves against. A step
// whose static type is an emulated object swaps in the contained binder for
// that type, so the following member reads as `field_array[instance]`;
// any other intermediate step only moves the receiver.

/// Where an assignment statement writes. Mirrors the resolved location:
/// the binding, the receiver it was reached through (`None` when the chain
/// never passed through an object), and the final step's indices.
#[derive(Debug)]
pub struct AssignTarget {
    pub binding: Binding,
    pub target: Option<Value>,
    pub indices: Vec<Value>,
}

impl AssignTarget {
    /// The write action. Instance routing already lives in the binding, so
    /// no separate receiver is threaded here.
    pub fn set(&self, value: Value) -> Result<Action, CompileError> {
        self.binding.set(value, None, &self.indices)
    }
}

/// Outcome of resolving one chain.
#[derive(Debug)]
pub struct ChainValue {
    pub result: Value,
    /// Present when the final step denotes an assignable location.
    pub assign: Option<AssignTarget>,
    /// False when the chain contained an unresolved step; the result is a
    /// sentinel and no further diagnostics are owed for this chain.
    pub complete: bool,
}

impl ChainValue {
    pub fn unresolved() -> Self {
        ChainValue {
            result: Value::Null,
            assign: None,
            complete: false,
        }
    }
}

impl Lowerer<'_, '_> {
    /// Resolve an access chain. Steps are visited strictly in order; step
    /// `i` only ever sees the result of step `i - 1`.
    pub fn resolve_chain(&mut self, steps: &[PathStep]) -> Result<ChainValue, CompileError> {
        if steps.is_empty() {
            return Ok(ChainValue::unresolved());
        }

        let mut current_binder = self.binder.clone();
        // Receiver for the next call step.
        let mut current_target: Option<Value> = None;
        // Set only after an object-typed step; distinguishes the
        // "(slot, receiver, indices)" triple from the receiver-less one.
        let mut object_target: Option<Value> = None;

        let mut result = Value::Null;
        let mut assign = None;

        for (i, step) in steps.iter().enumerate() {
            let last = i + 1 == steps.len();
            let step_ty;

            match step {
                PathStep::Unresolved => return Ok(ChainValue::unresolved()),
                PathStep::Var { id, indices, ty } => {
                    let binding = current_binder.borrow().lookup(*id).ok_or_else(|| {
                        CompileError::internal(format!("unbound variable identity {}", id.0))
                    })?;

                    // Indices resolve in lexical scope, not member scope.
                    let mut value = binding.get(None);
                    let mut lowered = Vec::with_capacity(indices.len());
                    for index in indices {
                        let index = self.lower_expr(index)?;
                        value = Value::value_in_array(value, index.clone());
                        lowered.push(index);
                    }

                    if last {
                        // Only the final step's indices survive into the
                        // assignment target; earlier indexing was pure
                        // value computation.
                        assign = Some(AssignTarget {
                            binding,
                            target: object_target.clone(),
                            indices: lowered,
                        });
                    }
                    result = value;
                    step_ty = *ty;
                }
                PathStep::Call { builtin, args, ty } => {
                    result = self.lower_builtin(*builtin, args, current_target.clone())?;
                    step_ty = *ty;
                }
            }

            if let Some(ty_id) = step_ty {
                let ty = self.types.get(ty_id).ok_or_else(|| {
                    CompileError::internal(format!("unknown object type {}", ty_id.0))
                })?;
                // Enter the member space: declared members resolve against
                // this instance, everything else falls back to the lexical
                // binder.
                current_binder = contained(&self.binder, ty, result.clone());
                current_target = Some(result.clone());
                object_target = Some(result.clone());
            } else if !last {
                current_target = Some(result.clone());
            }
        }

        Ok(ChainValue {
            result,
            assign,
            complete: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::element::Namespace;
    use crate::ir::rule::EventKind;
    use crate::lang::ast::{Expr, TypeId, VarId};
    use crate::lang::builtin::Builtin;
    use crate::lower::actions::ActionSet;
    use crate::lower::scope::{Binder, ObjectType, TypeRegistry};
    use crate::lower::slots::VarCollection;

    fn chain_var(id: u32, ty: Option<TypeId>) -> PathStep {
        PathStep::Var {
            id: VarId(id),
            indices: Vec::new(),
            ty,
        }
    }

    #[test]
    fn test_plain_variable_is_a_one_step_chain() {
        let mut vars = VarCollection::new();
        let slot = vars.assign(Namespace::Global, "g").unwrap();
        let mut aset = ActionSet::new(&mut vars, "r", EventKind::OngoingGlobal);
        let types = TypeRegistry::new();
        let binder = Binder::new_root();
        binder
            .borrow_mut()
            .bind(VarId(0), Binding::Direct(slot.clone()));
        let mut lowerer = Lowerer::new(&mut aset, &types, binder);

        let chain = lowerer.resolve_chain(&[chain_var(0, None)]).unwrap();

        assert!(chain.complete);
        assert_eq!(chain.result, Value::GetGlobal { index: slot.index });
        let assign = chain.assign.unwrap();
        assert!(assign.target.is_none());
        assert!(assign.indices.is_empty());
    }

    #[test]
    fn test_member_step_reads_field_array_of_instance() {
        let mut vars = VarCollection::new();
        let holder = vars.assign(Namespace::Global, "holder").unwrap();
        let ty = ObjectType::declare(&mut vars, Namespace::Global, "node", &[(VarId(10), "pos")])
            .unwrap();
        let field = ty.members[0].array.clone();

        let mut types = TypeRegistry::new();
        types.register(TypeId(0), ty);

        let mut aset = ActionSet::new(&mut vars, "r", EventKind::OngoingGlobal);
        let binder = Binder::new_root();
        binder
            .borrow_mut()
            .bind(VarId(0), Binding::Direct(holder.clone()));
        let mut lowerer = Lowerer::new(&mut aset, &types, binder);

        // holder.pos, where holder's value is an instance id.
        let chain = lowerer
            .resolve_chain(&[chain_var(0, Some(TypeId(0))), chain_var(10, None)])
            .unwrap();

        let instance = Value::GetGlobal { index: holder.index };
        assert_eq!(
            chain.result,
            Value::value_in_array(Value::GetGlobal { index: field.index }, instance.clone())
        );
        let assign = chain.assign.unwrap();
        assert_eq!(assign.target, Some(instance));
        assert!(matches!(assign.binding, Binding::Element { .. }));
    }

    #[test]
    fn test_non_member_after_object_falls_back_to_lexical_scope() {
        let mut vars = VarCollection::new();
        let holder = vars.assign(Namespace::Global, "holder").unwrap();
        let outer = vars.assign(Namespace::Global, "outer").unwrap();
        let ty =
            ObjectType::declare(&mut vars, Namespace::Global, "node", &[(VarId(10), "pos")])
                .unwrap();
        let mut types = TypeRegistry::new();
        types.register(TypeId(0), ty);

        let mut aset = ActionSet::new(&mut vars, "r", EventKind::OngoingGlobal);
        let binder = Binder::new_root();
        binder.borrow_mut().bind(VarId(0), Binding::Direct(holder));
        binder
            .borrow_mut()
            .bind(VarId(1), Binding::Direct(outer.clone()));
        let mut lowerer = Lowerer::new(&mut aset, &types, binder);

        let chain = lowerer
            .resolve_chain(&[chain_var(0, Some(TypeId(0))), chain_var(1, None)])
            .unwrap();

        // Not a declared member, so it resolved through the parent binder.
        assert_eq!(chain.result, Value::GetGlobal { index: outer.index });
    }

    #[test]
    fn test_call_step_receives_the_previous_result() {
        let mut vars = VarCollection::new();
        let arr = vars.assign(Namespace::Global, "arr").unwrap();
        let mut aset = ActionSet::new(&mut vars, "r", EventKind::OngoingGlobal);
        let types = TypeRegistry::new();
        let binder = Binder::new_root();
        binder
            .borrow_mut()
            .bind(VarId(0), Binding::Direct(arr.clone()));
        let mut lowerer = Lowerer::new(&mut aset, &types, binder);

        // arr.count_of()
        let chain = lowerer
            .resolve_chain(&[
                chain_var(0, None),
                PathStep::Call {
                    builtin: Builtin::CountOf,
                    args: Vec::new(),
                    ty: None,
                },
            ])
            .unwrap();

        assert_eq!(
            chain.result,
            Value::count_of(Value::GetGlobal { index: arr.index })
        );
        assert!(chain.assign.is_none(), "a call is not assignable");
    }

    #[test]
    fn test_only_final_step_indices_reach_the_assign_target() {
        let mut vars = VarCollection::new();
        let grid = vars.assign(Namespace::Global, "grid").unwrap();
        let mut aset = ActionSet::new(&mut vars, "r", EventKind::OngoingGlobal);
        let types = TypeRegistry::new();
        let binder = Binder::new_root();
        binder.borrow_mut().bind(VarId(0), Binding::Direct(grid));
        let mut lowerer = Lowerer::new(&mut aset, &types, binder);

        let chain = lowerer
            .resolve_chain(&[PathStep::Var {
                id: VarId(0),
                indices: vec![Expr::num(2.0), Expr::num(4.0)],
                ty: None,
            }])
            .unwrap();

        let assign = chain.assign.unwrap();
        assert_eq!(assign.indices, vec![Value::Num(2.0), Value::Num(4.0)]);
        assert!(matches!(chain.result, Value::ValueInArray { .. }));
    }

    #[test]
    fn test_unresolved_step_degrades_to_a_sentinel() {
        let mut vars = VarCollection::new();
        let mut aset = ActionSet::new(&mut vars, "r", EventKind::OngoingGlobal);
        let types = TypeRegistry::new();
        let binder = Binder::new_root();
        let mut lowerer = Lowerer::new(&mut aset, &types, binder);

        let chain = lowerer.resolve_chain(&[PathStep::Unresolved]).unwrap();

        assert!(!chain.complete);
        assert_eq!(chain.result, Value::Null);
        assert!(chain.assign.is_none());

        let empty = lowerer.resolve_chain(&[]).unwrap();
        assert!(!empty.complete);
    }
}
