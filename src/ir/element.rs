use serde::{Deserialize, Serialize};

// =============================================================================
// ELEMENT - Instructions of the target rule VM
// =============================================================================
//
// The target VM distinguishes two instruction kinds:
//
//   * `Value` - pure, returns a result, nests freely inside other values.
//   * `Action` - side-effecting, appended to a rule's linear action list.
//
// An `Action` can carry `Value` operands but a `Value` can never carry an
// `Action`, so the "no side effect inside an expression" invariant holds by
// construction.

/// Storage namespace of the target VM. Global slots are shared by every
/// actor; per-actor slots hold one value per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Global,
    PerActor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Rounding mode of `RoundToInt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rounding {
    Down,
    Nearest,
    Up,
}

/// In-place modification supported by the VM without rewriting the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyOp {
    Add,
    AppendToArray,
    RemoveFromArrayByValue,
}

/// A pure instruction node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Null,
    Vector {
        x: Box<Value>,
        y: Box<Value>,
        z: Box<Value>,
    },

    /// The actor whose event triggered the running rule.
    EventActor,
    /// World position of an actor value.
    PositionOf(Box<Value>),
    /// The element currently under inspection inside a sort/filter/any rank.
    ArrayElement,

    EmptyArray,
    MakeArray(Vec<Value>),

    // Storage reads. Writes are actions.
    GetGlobal {
        index: u32,
    },
    GetPlayer {
        index: u32,
        actor: Box<Value>,
    },

    ValueInArray {
        array: Box<Value>,
        index: Box<Value>,
    },
    CountOf(Box<Value>),
    FirstOf(Box<Value>),
    /// Sorts `array` ascending by evaluating `rank` per element
    /// (`ArrayElement` refers to the element being ranked).
    SortedArray {
        array: Box<Value>,
        rank: Box<Value>,
    },
    FilteredArray {
        array: Box<Value>,
        predicate: Box<Value>,
    },
    IsTrueForAny {
        array: Box<Value>,
        predicate: Box<Value>,
    },
    ArrayContains {
        array: Box<Value>,
        value: Box<Value>,
    },
    IndexOfValue {
        array: Box<Value>,
        value: Box<Value>,
    },
    /// Concatenation: a non-array operand behaves as a one-element array.
    Append {
        array: Box<Value>,
        value: Box<Value>,
    },
    ArraySlice {
        array: Box<Value>,
        start: Box<Value>,
        count: Box<Value>,
    },
    RemoveFromArray {
        array: Box<Value>,
        value: Box<Value>,
    },

    Arith {
        op: ArithOp,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    And(Box<Value>, Box<Value>),
    Or(Box<Value>, Box<Value>),
    Not(Box<Value>),
    Ternary {
        condition: Box<Value>,
        on_true: Box<Value>,
        on_false: Box<Value>,
    },

    DistanceBetween(Box<Value>, Box<Value>),
    XOf(Box<Value>),
    YOf(Box<Value>),
    RoundToInt {
        value: Box<Value>,
        mode: Rounding,
    },
}

/// A side-effecting instruction, executed in emission order within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    SetGlobal {
        index: u32,
        /// When present, writes one array element instead of the whole slot.
        element: Option<Value>,
        value: Value,
    },
    SetPlayer {
        index: u32,
        actor: Value,
        element: Option<Value>,
        value: Value,
    },
    ModifyGlobal {
        index: u32,
        op: ModifyOp,
        value: Value,
    },
    ModifyPlayer {
        index: u32,
        actor: Value,
        op: ModifyOp,
        value: Value,
    },

    /// Unconditionally skip the next `count` actions. The count is a value:
    /// the VM evaluates it when the skip executes, which is what makes the
    /// continue-skip prologue's dynamic distance possible.
    Skip {
        count: Value,
    },
    /// Skip the next `count` actions if `condition` is true.
    SkipIf {
        condition: Value,
        count: Value,
    },
    /// Native repeat: restart the rule's action list from index 0.
    Loop,
    Wait {
        seconds: Value,
    },
}

impl Value {
    pub fn num(n: f64) -> Value {
        Value::Num(n)
    }

    pub fn vector(x: Value, y: Value, z: Value) -> Value {
        Value::Vector {
            x: Box::new(x),
            y: Box::new(y),
            z: Box::new(z),
        }
    }

    pub fn value_in_array(array: Value, index: Value) -> Value {
        Value::ValueInArray {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    pub fn count_of(array: Value) -> Value {
        Value::CountOf(Box::new(array))
    }

    pub fn first_of(array: Value) -> Value {
        Value::FirstOf(Box::new(array))
    }

    pub fn sorted_array(array: Value, rank: Value) -> Value {
        Value::SortedArray {
            array: Box::new(array),
            rank: Box::new(rank),
        }
    }

    pub fn filtered_array(array: Value, predicate: Value) -> Value {
        Value::FilteredArray {
            array: Box::new(array),
            predicate: Box::new(predicate),
        }
    }

    pub fn is_true_for_any(array: Value, predicate: Value) -> Value {
        Value::IsTrueForAny {
            array: Box::new(array),
            predicate: Box::new(predicate),
        }
    }

    pub fn array_contains(array: Value, value: Value) -> Value {
        Value::ArrayContains {
            array: Box::new(array),
            value: Box::new(value),
        }
    }

    pub fn index_of(array: Value, value: Value) -> Value {
        Value::IndexOfValue {
            array: Box::new(array),
            value: Box::new(value),
        }
    }

    pub fn append(array: Value, value: Value) -> Value {
        Value::Append {
            array: Box::new(array),
            value: Box::new(value),
        }
    }

    pub fn array_slice(array: Value, start: Value, count: Value) -> Value {
        Value::ArraySlice {
            array: Box::new(array),
            start: Box::new(start),
            count: Box::new(count),
        }
    }

    pub fn remove_from_array(array: Value, value: Value) -> Value {
        Value::RemoveFromArray {
            array: Box::new(array),
            value: Box::new(value),
        }
    }

    pub fn arith(op: ArithOp, lhs: Value, rhs: Value) -> Value {
        Value::Arith {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Value, rhs: Value) -> Value {
        Value::arith(ArithOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Value, rhs: Value) -> Value {
        Value::arith(ArithOp::Sub, lhs, rhs)
    }

    pub fn compare(op: CompareOp, lhs: Value, rhs: Value) -> Value {
        Value::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(lhs: Value, rhs: Value) -> Value {
        Value::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Value, rhs: Value) -> Value {
        Value::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(value: Value) -> Value {
        Value::Not(Box::new(value))
    }

    pub fn ternary(condition: Value, on_true: Value, on_false: Value) -> Value {
        Value::Ternary {
            condition: Box::new(condition),
            on_true: Box::new(on_true),
            on_false: Box::new(on_false),
        }
    }

    pub fn distance_between(a: Value, b: Value) -> Value {
        Value::DistanceBetween(Box::new(a), Box::new(b))
    }

    pub fn x_of(value: Value) -> Value {
        Value::XOf(Box::new(value))
    }

    pub fn y_of(value: Value) -> Value {
        Value::YOf(Box::new(value))
    }

    pub fn round_to_int(value: Value, mode: Rounding) -> Value {
        Value::RoundToInt {
            value: Box::new(value),
            mode,
        }
    }

    pub fn position_of(actor: Value) -> Value {
        Value::PositionOf(Box::new(actor))
    }
}
