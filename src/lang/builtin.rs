// =============================================================================
// BUILTIN - Catalogue of built-in operations
// =============================================================================
//
// Every operation callable from source code is enumerated here. Lowering
// dispatches on the variant with an exhaustive match; there is no runtime
// discovery. `Ord` gives the catalogue a stable order for listings.

/// How an operation interacts with the action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// Pure: lowers to a single value instruction.
    Value,
    /// Produces a value but needs setup actions emitted first.
    ValueWithSetup,
    /// Pure side effect: lowers to actions only, no result.
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Builtin {
    /// `count_of(array)` - element count.
    CountOf,
    /// `first_of(array)` - first element.
    FirstOf,
    /// `distance(a, b)` - euclidean distance between two positions.
    Distance,
    /// `contains(array, value)`.
    Contains,
    /// `index_of(array, value)` - index of first occurrence, or -1.
    IndexOf,
    /// `position_of(actor)`.
    PositionOf,
    /// `range_array(n)` - builds `[0, 1, .., n-1]` with an emitted loop
    /// into a temporary, then yields the temporary's value.
    RangeArray,
    /// `wait(seconds)`.
    Wait,
}

impl Builtin {
    pub fn kind(&self) -> BuiltinKind {
        match self {
            Builtin::CountOf
            | Builtin::FirstOf
            | Builtin::Distance
            | Builtin::Contains
            | Builtin::IndexOf
            | Builtin::PositionOf => BuiltinKind::Value,
            Builtin::RangeArray => BuiltinKind::ValueWithSetup,
            Builtin::Wait => BuiltinKind::Action,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::CountOf => "count_of",
            Builtin::FirstOf => "first_of",
            Builtin::Distance => "distance",
            Builtin::Contains => "contains",
            Builtin::IndexOf => "index_of",
            Builtin::PositionOf => "position_of",
            Builtin::RangeArray => "range_array",
            Builtin::Wait => "wait",
        }
    }

    /// Parameter count of the declared signature, not counting an implicit
    /// receiver.
    pub fn arity(&self) -> usize {
        match self {
            Builtin::CountOf
            | Builtin::FirstOf
            | Builtin::PositionOf
            | Builtin::RangeArray
            | Builtin::Wait => 1,
            Builtin::Distance | Builtin::Contains | Builtin::IndexOf => 2,
        }
    }

    /// The full catalogue, in stable order.
    pub fn all() -> &'static [Builtin] {
        &[
            Builtin::CountOf,
            Builtin::FirstOf,
            Builtin::Distance,
            Builtin::Contains,
            Builtin::IndexOf,
            Builtin::PositionOf,
            Builtin::RangeArray,
            Builtin::Wait,
        ]
    }
}
