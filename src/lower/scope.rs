use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ir::element::{Action, Namespace, Value};
use crate::lang::ast::{TypeId, VarId};
use crate::lower::error::CompileError;
use crate::lower::slots::{SlotBudgetError, StorageSlot, VarCollection};

// =============================================================================
// SCOPE - Variable binder tree and emulated objects
// =============================================================================
//
// Bindings map a resolved variable identity to a storage location. The
// interesting case is the emulated object model: the target VM has no
// structs, so an object type owns one array slot per declared field and an
// instance is an integer index into those arrays. Entering an object's
// member space pushes a contained child binder that rewrites each member to
// `field_array[instance]`; names the type does not declare fall through to
// the enclosing lexical binder.
//
// Child binders extend their parent by structural sharing; a parent is
// never mutated through a child.

/// Where a bound variable lives.
#[derive(Debug, Clone)]
pub enum Binding {
    /// The variable owns a whole slot.
    Direct(StorageSlot),
    /// One element of an array slot: a member of an emulated object, where
    /// `index` is the instance id.
    Element { slot: StorageSlot, index: Value },
    /// A computed value with no storage behind it. Readable, never
    /// assignable (e.g. a for-each element).
    Computed(Value),
}

impl Binding {
    /// Read the bound location.
    pub fn get(&self, actor: Option<Value>) -> Value {
        match self {
            Binding::Direct(slot) => slot.get(actor),
            Binding::Element { slot, index } => {
                Value::value_in_array(slot.get(actor), index.clone())
            }
            Binding::Computed(value) => value.clone(),
        }
    }

    /// Write the bound location, indexed by `indices` innermost-last. One
    /// index is a native element write; deeper chains rebuild the inner
    /// array around the new element, since the VM writes at most one level.
    pub fn set(
        &self,
        value: Value,
        actor: Option<Value>,
        indices: &[Value],
    ) -> Result<Action, CompileError> {
        match self {
            Binding::Direct(slot) => Ok(set_indexed(slot, value, actor, indices)),
            Binding::Element { slot, index } => {
                let mut full = Vec::with_capacity(indices.len() + 1);
                full.push(index.clone());
                full.extend_from_slice(indices);
                Ok(set_indexed(slot, value, actor, &full))
            }
            Binding::Computed(_) => Err(CompileError::internal(
                "assignment to a computed binding",
            )),
        }
    }
}

fn set_indexed(slot: &StorageSlot, value: Value, actor: Option<Value>, indices: &[Value]) -> Action {
    match indices {
        [] => slot.set(value, actor),
        [index] => slot.set_at(value, actor, Some(index.clone())),
        [index, rest @ ..] => {
            let old_inner = Value::value_in_array(slot.get(actor.clone()), index.clone());
            let new_inner = rebuild_indexed(old_inner, rest, value);
            slot.set_at(new_inner, actor, Some(index.clone()))
        }
    }
}

/// Rebuild `current` with `current[indices...] = value`. `Append` splices
/// array operands, so the replacement element is wrapped in a one-element
/// `MakeArray` to survive the concatenation intact.
fn rebuild_indexed(current: Value, indices: &[Value], value: Value) -> Value {
    let Some((index, rest)) = indices.split_first() else {
        return value;
    };
    let old_inner = Value::value_in_array(current.clone(), index.clone());
    let new_inner = rebuild_indexed(old_inner, rest, value);

    let before = Value::array_slice(current.clone(), Value::Num(0.0), index.clone());
    let after_start = Value::add(index.clone(), Value::Num(1.0));
    let after = Value::array_slice(
        current.clone(),
        after_start.clone(),
        Value::sub(Value::count_of(current), after_start),
    );
    Value::append(
        Value::append(before, Value::MakeArray(vec![new_inner])),
        after,
    )
}

pub type BinderRef = Rc<RefCell<Binder>>;

/// One scope in the binder tree.
#[derive(Debug, Default)]
pub struct Binder {
    bindings: HashMap<VarId, Binding>,
    parent: Option<BinderRef>,
}

impl Binder {
    pub fn new_root() -> BinderRef {
        Rc::new(RefCell::new(Binder::default()))
    }

    pub fn child(parent: &BinderRef) -> BinderRef {
        Rc::new(RefCell::new(Binder {
            bindings: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn bind(&mut self, id: VarId, binding: Binding) {
        self.bindings.insert(id, binding);
    }

    /// Look up an identity, falling through to the parent chain. `None`
    /// means the upstream resolver's guarantee was broken; callers turn it
    /// into an internal error.
    pub fn lookup(&self, id: VarId) -> Option<Binding> {
        if let Some(binding) = self.bindings.get(&id) {
            return Some(binding.clone());
        }
        self.parent.as_ref().and_then(|p| p.borrow().lookup(id))
    }
}

/// One declared field of an emulated object type.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: VarId,
    pub name: String,
    /// The per-field arena array, indexed by instance id.
    pub array: StorageSlot,
}

/// An emulated object type: a name plus one arena array per field.
#[derive(Debug, Clone)]
pub struct ObjectType {
    pub name: String,
    pub members: Vec<Member>,
}

impl ObjectType {
    /// Declare a type, minting one named slot per field.
    pub fn declare(
        vars: &mut VarCollection,
        namespace: Namespace,
        name: &str,
        fields: &[(VarId, &str)],
    ) -> Result<ObjectType, SlotBudgetError> {
        let mut members = Vec::with_capacity(fields.len());
        for (id, field) in fields {
            let array = vars.assign(namespace, &format!("{}_{}", name, field))?;
            members.push(Member {
                id: *id,
                name: (*field).to_string(),
                array,
            });
        }
        Ok(ObjectType {
            name: name.to_string(),
            members,
        })
    }
}

/// All declared object types, keyed by the frontend's type identity.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, ObjectType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: TypeId, ty: ObjectType) {
        self.types.insert(id, ty);
    }

    pub fn get(&self, id: TypeId) -> Option<&ObjectType> {
        self.types.get(&id)
    }
}

/// The contained binder for one resolved instance: every declared member
/// becomes `field_array[instance]`, everything else falls through to
/// `parent`.
pub fn contained(parent: &BinderRef, ty: &ObjectType, instance: Value) -> BinderRef {
    let child = Binder::child(parent);
    {
        let mut child_mut = child.borrow_mut();
        for member in &ty.members {
            child_mut.bind(
                member.id,
                Binding::Element {
                    slot: member.array.clone(),
                    index: instance.clone(),
                },
            );
        }
    }
    child
}
