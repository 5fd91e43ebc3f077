//! Shortest-path lowering: compiles single- and multi-source Dijkstra
//! searches with path reconstruction into flat rule actions, using nothing
//! but arrays, loops and storage slots.

use log::debug;

use crate::ir::element::{Action, ArithOp, CompareOp, ModifyOp, Namespace, Rounding, Value};
use crate::lower::actions::ActionSet;
use crate::lower::control::{ForeachBuilder, WhileBuilder};
use crate::lower::error::CompileError;
use crate::lower::slots::StorageSlot;

/// Stand-in for +infinity when ranking unreached nodes.
pub const UNREACHED_DISTANCE: f64 = 9999.0;

/// Seed distance of a start node. Small but nonzero, so an unreached
/// node's default `0` stays distinguishable from a real assignment. A map
/// whose edges underflow this would misread a genuine near-zero distance
/// as "unreached".
pub const SEED_DISTANCE: f64 = 0.0001;

/// Minimum host wait, spent once per relax iteration.
pub const MIN_WAIT: f64 = 0.016;

/// A compiled graph: node positions and packed segments, both array
/// values (usually slot reads).
pub struct PathMap {
    pub nodes: Value,
    pub segments: Value,
}

/// Orientation of the reconstructed path relative to the backtrack walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDirection {
    /// Walk order reversed: the walk's first node ends up last.
    Prepend,
    /// Walk order kept: the walk's first node stays first.
    Append,
}

/// Result slots of a single-source search. Owned by the caller; the
/// search retires every other temporary it allocated.
pub struct PathResult {
    pub path: StorageSlot,
    pub attributes: StorageSlot,
}

/// Per-actor destination slots for the multi-source dispatch.
pub struct ActorPathStore {
    pub path: StorageSlot,
    pub attributes: StorageSlot,
}

// --- packed segment accessors ---
//
// A segment is a vector: each of X and Y packs one endpoint as
// `node_index + attribute / 100`. Attribute 0 means unrestricted.

fn node_a(segment: Value) -> Value {
    Value::round_to_int(Value::x_of(segment), Rounding::Down)
}

fn node_b(segment: Value) -> Value {
    Value::round_to_int(Value::y_of(segment), Rounding::Down)
}

fn endpoint_attribute(coordinate: Value) -> Value {
    Value::round_to_int(
        Value::arith(
            ArithOp::Mul,
            Value::arith(ArithOp::Mod, coordinate, Value::Num(1.0)),
            Value::Num(100.0),
        ),
        Rounding::Nearest,
    )
}

fn attribute_a(segment: Value) -> Value {
    endpoint_attribute(Value::x_of(segment))
}

fn attribute_b(segment: Value) -> Value {
    endpoint_attribute(Value::y_of(segment))
}

fn both_nodes(segment: Value) -> Value {
    Value::MakeArray(vec![node_a(segment.clone()), node_b(segment)])
}

/// Pack one segment for a map definition.
pub fn pack_segment(node_a: u32, node_b: u32, attribute_a: u32, attribute_b: u32) -> Value {
    Value::vector(
        Value::Num(node_a as f64 + attribute_a as f64 / 100.0),
        Value::Num(node_b as f64 + attribute_b as f64 / 100.0),
        Value::Num(0.0),
    )
}

/// Index of the node geometrically nearest `position`: a full sort by
/// distance and take-first, since the host has no spatial structures.
pub fn closest_node(nodes: &Value, position: Value) -> Value {
    Value::index_of(
        nodes.clone(),
        Value::first_of(Value::sorted_array(
            nodes.clone(),
            Value::distance_between(position, Value::ArrayElement),
        )),
    )
}

/// `distances[index]`, treating the unassigned default `0` as +infinity.
fn working_distance(distances: Value, index: Value) -> Value {
    let read = Value::value_in_array(distances, index);
    Value::ternary(
        Value::compare(CompareOp::Ne, read.clone(), Value::Num(0.0)),
        read,
        Value::Num(UNREACHED_DISTANCE),
    )
}

/// The unvisited node with the smallest working distance.
fn lowest_unvisited(distances: Value, unvisited: Value) -> Value {
    Value::first_of(Value::sorted_array(
        unvisited,
        working_distance(distances, Value::ArrayElement),
    ))
}

/// Segments incident to `current` that the attribute filter lets through.
/// The relevant attribute is the one packed on the current endpoint;
/// without an allowed set, only unrestricted segments pass.
fn traversable_segments(segments: Value, current: Value, attributes: Option<&Value>) -> Value {
    let segment = Value::ArrayElement;
    let relevant = Value::ternary(
        Value::compare(CompareOp::Eq, node_a(segment.clone()), current.clone()),
        attribute_a(segment.clone()),
        attribute_b(segment.clone()),
    );
    let unrestricted = Value::compare(CompareOp::Eq, relevant.clone(), Value::Num(0.0));
    let allowed = match attributes {
        Some(set) => Value::or(unrestricted, Value::array_contains(set.clone(), relevant)),
        None => unrestricted,
    };
    Value::filtered_array(
        segments,
        Value::and(Value::array_contains(both_nodes(segment), current), allowed),
    )
}

/// Shared machinery of both variants: the temporaries, the relax loop and
/// the backtrack walk. Phases run in a fixed order; `finish` retires every
/// temporary to the release sentinel.
struct Search<'a, 'v, 'm> {
    aset: &'a mut ActionSet<'v>,
    map: &'m PathMap,
    attributes: Option<Value>,
    current: StorageSlot,
    distances: StorageSlot,
    unvisited: StorageSlot,
    connected: StorageSlot,
    neighbor: StorageSlot,
    neighbor_distance: StorageSlot,
    parents: StorageSlot,
    parent_attributes: StorageSlot,
}

impl<'a, 'v, 'm> Search<'a, 'v, 'm> {
    fn begin(
        aset: &'a mut ActionSet<'v>,
        map: &'m PathMap,
        attributes: Option<Value>,
        namespace: Namespace,
    ) -> Result<Self, CompileError> {
        // An empty allowed set behaves like no filter: unrestricted only.
        let attributes = match attributes {
            Some(Value::EmptyArray) => None,
            other => other,
        };
        Ok(Self {
            current: aset.assign_extended(namespace)?,
            distances: aset.assign_extended(namespace)?,
            unvisited: aset.assign_extended(namespace)?,
            connected: aset.assign_extended(namespace)?,
            neighbor: aset.assign_extended(namespace)?,
            neighbor_distance: aset.assign_extended(namespace)?,
            parents: aset.assign_extended(namespace)?,
            parent_attributes: aset.assign_extended(namespace)?,
            aset,
            map,
            attributes,
        })
    }

    /// Clear the shared arrays, seed the start node and build the
    /// unvisited index list `[0, 1, .., count(nodes) - 1]`.
    fn seed(&mut self, start: Value, namespace: Namespace) -> Result<(), CompileError> {
        self.aset.add(self.current.set(start, None));
        // Extended slots are reused, so stale contents must be cleared
        // before the defaults-are-zero reasoning holds.
        self.aset.add(self.distances.set(Value::EmptyArray, None));
        self.aset.add(self.parents.set(Value::EmptyArray, None));
        self.aset
            .add(self.parent_attributes.set(Value::EmptyArray, None));
        self.aset.add(self.distances.set_at(
            Value::Num(SEED_DISTANCE),
            None,
            Some(self.current.get(None)),
        ));

        self.aset.add(self.unvisited.set(Value::EmptyArray, None));
        let counter = self.aset.assign_extended(namespace)?;
        self.aset.add(counter.set(Value::Num(0.0), None));
        let mut fill = WhileBuilder::new();
        fill.setup(
            self.aset,
            Value::compare(
                CompareOp::Lt,
                counter.get(None),
                Value::count_of(self.map.nodes.clone()),
            ),
        )?;
        self.aset.add(self.unvisited.modify(
            ModifyOp::AppendToArray,
            counter.get(None),
            None,
        ));
        self.aset
            .add(counter.modify(ModifyOp::Add, Value::Num(1.0), None));
        fill.finish(self.aset)?;
        self.retire(counter);
        Ok(())
    }

    /// The relax loop: while `condition` holds, widen the frontier by one
    /// node, improving neighbor distances and parent links.
    fn relax(&mut self, condition: Value) -> Result<(), CompileError> {
        let mut outer = WhileBuilder::new();
        outer.setup(self.aset, condition)?;

        // One host tick per iteration, respecting the rule budget.
        self.aset.add(Action::Wait {
            seconds: Value::Num(MIN_WAIT),
        });

        self.aset.add(self.connected.set(
            traversable_segments(
                self.map.segments.clone(),
                self.current.get(None),
                self.attributes.as_ref(),
            ),
            None,
        ));

        let mut neighbors = ForeachBuilder::new(self.connected.get(None));
        neighbors.setup(self.aset)?;
        let segment = neighbors.element()?;

        // The endpoint that is not the current node.
        self.aset.add(self.neighbor.set(
            Value::ternary(
                Value::compare(
                    CompareOp::Ne,
                    self.current.get(None),
                    node_a(segment.clone()),
                ),
                node_a(segment.clone()),
                node_b(segment.clone()),
            ),
            None,
        ));
        self.aset.add(self.neighbor_distance.set(
            Value::add(
                Value::distance_between(
                    Value::value_in_array(self.map.nodes.clone(), self.neighbor.get(None)),
                    Value::value_in_array(self.map.nodes.clone(), self.current.get(None)),
                ),
                Value::value_in_array(self.distances.get(None), self.current.get(None)),
            ),
            None,
        ));

        // Relax only when the candidate beats the working distance.
        let improves = Value::compare(
            CompareOp::Lt,
            self.neighbor_distance.get(None),
            working_distance(self.distances.get(None), self.neighbor.get(None)),
        );
        let guard = self.aset.skip_start(Some(Value::not(improves)));
        self.aset.add(self.distances.set_at(
            self.neighbor_distance.get(None),
            None,
            Some(self.neighbor.get(None)),
        ));
        // Parent links are offset by one so the default 0 reads as
        // "no parent yet".
        self.aset.add(self.parents.set_at(
            Value::add(self.current.get(None), Value::Num(1.0)),
            None,
            Some(self.neighbor.get(None)),
        ));
        self.aset.add(self.parent_attributes.set_at(
            Value::ternary(
                Value::compare(
                    CompareOp::Eq,
                    node_a(segment.clone()),
                    self.current.get(None),
                ),
                attribute_a(segment.clone()),
                attribute_b(segment),
            ),
            None,
            Some(self.neighbor.get(None)),
        ));
        self.aset.resolve_skip_to_here(guard)?;
        neighbors.finish(self.aset)?;

        self.aset.add(self.unvisited.set(
            Value::remove_from_array(self.unvisited.get(None), self.current.get(None)),
            None,
        ));
        self.aset.add(self.current.set(
            lowest_unvisited(self.distances.get(None), self.unvisited.get(None)),
            None,
        ));
        outer.finish(self.aset)
    }

    /// Walk parent links from `from` until the parent-less seed, building
    /// the path and its per-step attributes. Iterative on purpose: the
    /// host has no call stack to recurse on.
    fn backtrack(
        &mut self,
        from: Value,
        path: &StorageSlot,
        attributes: &StorageSlot,
        direction: BuildDirection,
    ) -> Result<(), CompileError> {
        self.aset.add(self.current.set(from, None));
        self.aset.add(path.set(Value::EmptyArray, None));
        self.aset.add(attributes.set(Value::EmptyArray, None));

        let mut walk = WhileBuilder::new();
        walk.setup(
            self.aset,
            Value::compare(CompareOp::Ge, self.current.get(None), Value::Num(0.0)),
        )?;

        let node = self.current.get(None);
        let step_attribute =
            Value::value_in_array(self.parent_attributes.get(None), self.current.get(None));
        let (grown_path, grown_attributes) = match direction {
            BuildDirection::Prepend => (
                Value::append(node, path.get(None)),
                Value::append(step_attribute, attributes.get(None)),
            ),
            BuildDirection::Append => (
                Value::append(path.get(None), node),
                Value::append(attributes.get(None), step_attribute),
            ),
        };
        self.aset.add(path.set(grown_path, None));
        self.aset.add(attributes.set(grown_attributes, None));

        // Parent 0 means "seed": the offset walks it to -1, ending the loop.
        self.aset.add(self.current.set(
            Value::sub(
                Value::value_in_array(self.parents.get(None), self.current.get(None)),
                Value::Num(1.0),
            ),
            None,
        ));
        walk.finish(self.aset)
    }

    /// Reset one temporary to the sentinel and return it to the pool.
    fn retire(&mut self, slot: StorageSlot) {
        self.aset.add(slot.reset_to_sentinel(None));
        self.aset.release(slot);
    }

    /// The done phase: every temporary back to the sentinel.
    fn finish(self) -> Result<(), CompileError> {
        let Search {
            aset,
            current,
            distances,
            unvisited,
            connected,
            neighbor,
            neighbor_distance,
            parents,
            parent_attributes,
            ..
        } = self;
        for slot in [
            current,
            distances,
            unvisited,
            connected,
            neighbor,
            neighbor_distance,
            parents,
            parent_attributes,
        ] {
            aset.add(slot.reset_to_sentinel(None));
            aset.release(slot);
        }
        Ok(())
    }
}

/// Lower a single-source search from `position` to `destination`. The
/// returned slots hold the reconstructed node-index path (source first)
/// and the attribute used to reach each node.
pub fn lower_single_source(
    aset: &mut ActionSet<'_>,
    map: &PathMap,
    position: Value,
    destination: Value,
    attributes: Option<Value>,
) -> Result<PathResult, CompileError> {
    debug!("lowering single-source shortest path in '{}'", aset.rule_name());
    let namespace = aset.local_namespace();
    let start = closest_node(&map.nodes, position);

    let final_node = aset.assign_extended(namespace)?;
    let path = aset.assign_extended(namespace)?;
    let path_attributes = aset.assign_extended(namespace)?;
    aset.add(final_node.set(closest_node(&map.nodes, destination), None));

    let mut search = Search::begin(aset, map, attributes, namespace)?;
    search.seed(start, namespace)?;
    search.relax(Value::array_contains(
        search.unvisited.get(None),
        final_node.get(None),
    ))?;
    search.backtrack(
        final_node.get(None),
        &path,
        &path_attributes,
        BuildDirection::Prepend,
    )?;
    search.retire(final_node);
    search.finish()?;

    Ok(PathResult {
        path,
        attributes: path_attributes,
    })
}

/// Lower a multi-source search: one relax pass seeded at the shared
/// destination, then a per-actor backtrack from each actor's nearest node
/// into the per-actor store. Every path ends at its own start node.
pub fn lower_multi_source(
    aset: &mut ActionSet<'_>,
    map: &PathMap,
    actors: Value,
    destination: Value,
    attributes: Option<Value>,
    store: &ActorPathStore,
) -> Result<(), CompileError> {
    debug!("lowering multi-source shortest path in '{}'", aset.rule_name());
    // The relax arrays are shared across actors.
    let namespace = Namespace::Global;

    let closest_nodes = aset.assign_extended(namespace)?;
    aset.add(closest_nodes.set(Value::EmptyArray, None));
    let mut gather = ForeachBuilder::new(actors.clone());
    gather.setup(aset)?;
    let actor = gather.element()?;
    aset.add(closest_nodes.modify(
        ModifyOp::AppendToArray,
        closest_node(&map.nodes, Value::position_of(actor)),
        None,
    ));
    gather.finish(aset)?;

    let mut search = Search::begin(aset, map, attributes, namespace)?;
    search.seed(closest_node(&map.nodes, destination), namespace)?;
    // Keep relaxing while any actor's start node is unvisited.
    search.relax(Value::is_true_for_any(
        closest_nodes.get(None),
        Value::array_contains(search.unvisited.get(None), Value::ArrayElement),
    ))?;

    let path_temp = search.aset.assign_extended(namespace)?;
    let attributes_temp = search.aset.assign_extended(namespace)?;
    let mut dispatch = ForeachBuilder::new(actors);
    dispatch.setup(search.aset)?;
    search.aset.add(Action::Wait {
        seconds: Value::Num(MIN_WAIT),
    });
    let actor = dispatch.element()?;
    let own_start = Value::value_in_array(closest_nodes.get(None), dispatch.index()?);
    search.backtrack(own_start, &path_temp, &attributes_temp, BuildDirection::Prepend)?;
    search
        .aset
        .add(store.path.set(path_temp.get(None), Some(actor.clone())));
    search
        .aset
        .add(store.attributes.set(attributes_temp.get(None), Some(actor)));
    dispatch.finish(search.aset)?;

    search.retire(path_temp);
    search.retire(attributes_temp);
    search.retire(closest_nodes);
    search.finish()
}

/// Lower a lookahead query: does walking the parent links from `from`
/// ever pass through `node`? The answer lands in the returned slot as a
/// bool; `parents` uses the same +1 offset the searches write.
pub fn lower_is_traveling_to_node(
    aset: &mut ActionSet<'_>,
    parents: Value,
    from: Value,
    node: Value,
) -> Result<StorageSlot, CompileError> {
    let namespace = aset.local_namespace();
    let found = aset.assign_extended(namespace)?;
    let current = aset.assign_extended(namespace)?;
    aset.add(found.set(Value::Bool(false), None));
    aset.add(current.set(from, None));

    let mut walk = WhileBuilder::new();
    walk.setup(
        aset,
        Value::and(
            Value::compare(CompareOp::Ge, current.get(None), Value::Num(0.0)),
            Value::not(found.get(None)),
        ),
    )?;
    let miss = aset.skip_start(Some(Value::compare(
        CompareOp::Ne,
        current.get(None),
        node,
    )));
    aset.add(found.set(Value::Bool(true), None));
    aset.resolve_skip_to_here(miss)?;
    aset.add(current.set(
        Value::sub(
            Value::value_in_array(parents, current.get(None)),
            Value::Num(1.0),
        ),
        None,
    ));
    walk.finish(aset)?;

    aset.add(current.reset_to_sentinel(None));
    aset.release(current);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::rule::EventKind;
    use crate::lower::slots::{VarCollection, NAMED_BUDGET};

    fn map_in_slots(vars: &mut VarCollection) -> PathMap {
        let nodes = vars.assign(Namespace::Global, "map_nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "map_segments").unwrap();
        PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        }
    }

    #[test]
    fn test_pack_segment_places_attributes_in_the_fraction() {
        match pack_segment(1, 2, 0, 5) {
            Value::Vector { x, y, .. } => {
                assert_eq!(*x, Value::Num(1.0));
                assert_eq!(*y, Value::Num(2.05));
            }
            other => panic!("expected vector, got {:?}", other),
        }
    }

    #[test]
    fn test_closest_node_is_sort_take_first_index() {
        let nodes = Value::GetGlobal { index: 0 };
        let v = closest_node(&nodes, Value::vector(Value::Num(0.0), Value::Num(0.0), Value::Num(0.0)));
        match v {
            Value::IndexOfValue { value, .. } => {
                assert!(matches!(*value, Value::FirstOf(_)));
            }
            other => panic!("expected index-of, got {:?}", other),
        }
    }

    #[test]
    fn test_working_distance_treats_zero_as_unreached() {
        let v = working_distance(Value::GetGlobal { index: 1 }, Value::Num(3.0));
        match v {
            Value::Ternary { on_false, .. } => {
                assert_eq!(*on_false, Value::Num(UNREACHED_DISTANCE));
            }
            other => panic!("expected ternary, got {:?}", other),
        }
    }

    #[test]
    fn test_attribute_filter_consults_the_allowed_set() {
        let filtered = traversable_segments(
            Value::GetGlobal { index: 0 },
            Value::Num(0.0),
            Some(&Value::GetGlobal { index: 9 }),
        );
        let rendered = format!("{:?}", filtered);
        assert!(rendered.contains("ArrayContains"));
        assert!(rendered.contains("Or"));

        let unfiltered =
            traversable_segments(Value::GetGlobal { index: 0 }, Value::Num(0.0), None);
        let rendered = format!("{:?}", unfiltered);
        assert!(!rendered.contains("Or"), "without a set only attribute 0 passes");
    }

    #[test]
    fn test_empty_allowed_set_collapses_to_no_filter() {
        let mut vars = VarCollection::new();
        let map = map_in_slots(&mut vars);
        let mut aset = ActionSet::new(&mut vars, "pf", EventKind::OngoingGlobal);

        let search = Search::begin(&mut aset, &map, Some(Value::EmptyArray), Namespace::Global)
            .unwrap();
        assert!(search.attributes.is_none());
    }

    #[test]
    fn test_single_source_emits_loops_waits_and_the_seed() {
        let mut vars = VarCollection::new();
        let map = map_in_slots(&mut vars);
        let mut aset = ActionSet::new(&mut vars, "pf", EventKind::OngoingGlobal);

        let origin = Value::vector(Value::Num(0.0), Value::Num(0.0), Value::Num(0.0));
        let target = Value::vector(Value::Num(5.0), Value::Num(0.0), Value::Num(0.0));
        let result = lower_single_source(&mut aset, &map, origin, target, None).unwrap();
        let rule = aset.into_rule();

        assert!(rule.actions.iter().any(|a| matches!(a, Action::Loop)));
        assert!(rule.actions.iter().any(|a| matches!(a, Action::Wait { .. })));
        assert!(rule.actions.iter().any(|a| matches!(
            a,
            Action::SetGlobal { value: Value::Num(n), .. } if *n == SEED_DISTANCE
        )));
        assert_ne!(result.path.index, result.attributes.index);
    }

    #[test]
    fn test_single_source_retires_every_temporary_but_the_results() {
        let mut vars = VarCollection::new();
        let map = map_in_slots(&mut vars);
        let mut aset = ActionSet::new(&mut vars, "pf", EventKind::OngoingGlobal);

        let origin = Value::vector(Value::Num(0.0), Value::Num(0.0), Value::Num(0.0));
        let target = Value::vector(Value::Num(5.0), Value::Num(0.0), Value::Num(0.0));
        let result = lower_single_source(&mut aset, &map, origin, target, None).unwrap();
        drop(aset);

        // The lowering borrowed 12 extended slots in total and released all
        // but the two result slots, so ten fresh borrows fit under the
        // high-water mark without growing the pool.
        for _ in 0..10 {
            let reused = vars.assign_extended(Namespace::Global).unwrap();
            assert!(reused.index < NAMED_BUDGET + 12, "reuse comes from the free list");
            assert_ne!(reused.index, result.path.index);
            assert_ne!(reused.index, result.attributes.index);
        }
    }

    #[test]
    fn test_multi_source_dispatches_into_per_actor_slots() {
        let mut vars = VarCollection::new();
        let map = map_in_slots(&mut vars);
        let store = ActorPathStore {
            path: vars.assign(Namespace::PerActor, "path").unwrap(),
            attributes: vars.assign(Namespace::PerActor, "path_attributes").unwrap(),
        };
        let actors = vars.assign(Namespace::Global, "actors").unwrap();
        let mut aset = ActionSet::new(&mut vars, "pf all", EventKind::OngoingGlobal);

        let target = Value::vector(Value::Num(5.0), Value::Num(0.0), Value::Num(0.0));
        lower_multi_source(&mut aset, &map, actors.get(None), target, None, &store).unwrap();
        let rule = aset.into_rule();

        let player_writes = rule
            .actions
            .iter()
            .filter(|a| matches!(a, Action::SetPlayer { .. }))
            .count();
        assert_eq!(player_writes, 2, "path and attributes per actor");
        assert!(rule.actions.iter().any(|a| matches!(a, Action::Loop)));
    }

    // --- behavioral checks on the reference interpreter ---

    use crate::vm::{RtValue, RuleVm};

    fn num_array(values: &[f64]) -> RtValue {
        RtValue::Array(values.iter().map(|n| RtValue::Num(*n)).collect())
    }

    /// Unit square: nodes 0..3 counterclockwise, one segment per side.
    fn load_square(vm: &mut RuleVm, nodes_index: u32, segments_index: u32) {
        vm.set_global(
            nodes_index,
            RtValue::Array(vec![
                RtValue::Vector(0.0, 0.0, 0.0),
                RtValue::Vector(1.0, 0.0, 0.0),
                RtValue::Vector(1.0, 1.0, 0.0),
                RtValue::Vector(0.0, 1.0, 0.0),
            ]),
        );
        vm.set_global(
            segments_index,
            RtValue::Array(vec![
                RtValue::Vector(0.0, 1.0, 0.0),
                RtValue::Vector(1.0, 2.0, 0.0),
                RtValue::Vector(2.0, 3.0, 0.0),
                RtValue::Vector(3.0, 0.0, 0.0),
            ]),
        );
    }

    #[test]
    fn test_four_node_cycle_finds_a_two_edge_path() {
        let mut vars = VarCollection::new();
        let nodes = vars.assign(Namespace::Global, "nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "segments").unwrap();
        let map = PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        };
        let mut aset = ActionSet::new(&mut vars, "pf", EventKind::OngoingGlobal);

        let origin = Value::vector(Value::Num(0.0), Value::Num(0.0), Value::Num(0.0));
        let target = Value::vector(Value::Num(1.0), Value::Num(1.0), Value::Num(0.0));
        let result = lower_single_source(&mut aset, &map, origin, target, None).unwrap();
        let rule = aset.into_rule();

        let mut vm = RuleVm::new();
        load_square(&mut vm, nodes.index, segments.index);
        vm.run_rule(&rule, None).unwrap();

        let path = vm.global(result.path.index);
        assert!(
            path == num_array(&[0.0, 1.0, 2.0]) || path == num_array(&[0.0, 3.0, 2.0]),
            "expected a two-edge path around the square, got {:?}",
            path
        );
    }

    #[test]
    fn test_done_phase_leaves_every_temporary_at_the_sentinel() {
        let mut vars = VarCollection::new();
        let nodes = vars.assign(Namespace::Global, "nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "segments").unwrap();
        let map = PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        };
        let mut aset = ActionSet::new(&mut vars, "pf", EventKind::OngoingGlobal);

        let origin = Value::vector(Value::Num(0.0), Value::Num(0.0), Value::Num(0.0));
        let target = Value::vector(Value::Num(1.0), Value::Num(1.0), Value::Num(0.0));
        let result = lower_single_source(&mut aset, &map, origin, target, None).unwrap();
        let rule = aset.into_rule();

        let mut vm = RuleVm::new();
        load_square(&mut vm, nodes.index, segments.index);
        vm.run_rule(&rule, None).unwrap();

        // Twelve extended borrows total; everything but the two result
        // slots ends at the sentinel.
        for index in NAMED_BUDGET..NAMED_BUDGET + 12 {
            if index == result.path.index || index == result.attributes.index {
                continue;
            }
            assert_eq!(
                vm.global(index),
                RtValue::Num(-1.0),
                "slot {} not retired",
                index
            );
        }
    }

    #[test]
    fn test_restricted_segment_never_relaxes_without_its_attribute() {
        let mut vars = VarCollection::new();
        let nodes = vars.assign(Namespace::Global, "nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "segments").unwrap();
        let map = PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        };

        let lower = |attributes: Option<Value>, vars: &mut VarCollection| {
            let mut aset = ActionSet::new(vars, "pf", EventKind::OngoingGlobal);
            let origin = Value::vector(Value::Num(0.0), Value::Num(0.0), Value::Num(0.0));
            let target = Value::vector(Value::Num(2.0), Value::Num(0.0), Value::Num(0.0));
            let result =
                lower_single_source(&mut aset, &map, origin, target, attributes).unwrap();
            (aset.into_rule(), result)
        };

        let setup = |vm: &mut RuleVm| {
            // A line 0 - 1 - 2 whose last hop requires attribute 5.
            vm.set_global(
                nodes.index,
                RtValue::Array(vec![
                    RtValue::Vector(0.0, 0.0, 0.0),
                    RtValue::Vector(1.0, 0.0, 0.0),
                    RtValue::Vector(2.0, 0.0, 0.0),
                ]),
            );
            vm.set_global(
                segments.index,
                RtValue::Array(vec![
                    RtValue::Vector(0.0, 1.0, 0.0),
                    RtValue::Vector(1.05, 2.05, 0.0),
                ]),
            );
        };

        // Empty allowed set: the restricted hop never enters the relaxed
        // neighbor set, so node 2 keeps no parent.
        let (rule, result) = lower(Some(Value::EmptyArray), &mut vars);
        let mut vm = RuleVm::new();
        setup(&mut vm);
        vm.run_rule(&rule, None).unwrap();
        assert_eq!(vm.global(result.path.index), num_array(&[2.0]));

        // Allowing attribute 5 opens it up.
        let (rule, result) = lower(
            Some(Value::MakeArray(vec![Value::Num(5.0)])),
            &mut vars,
        );
        let mut vm = RuleVm::new();
        setup(&mut vm);
        vm.run_rule(&rule, None).unwrap();
        assert_eq!(vm.global(result.path.index), num_array(&[0.0, 1.0, 2.0]));
    }

    #[test]
    fn test_append_direction_keeps_the_walk_order() {
        let mut vars = VarCollection::new();
        let nodes = vars.assign(Namespace::Global, "nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "segments").unwrap();
        let map = PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        };
        let mut aset = ActionSet::new(&mut vars, "pf", EventKind::OngoingGlobal);

        let path = aset.assign_extended(Namespace::Global).unwrap();
        let attrs = aset.assign_extended(Namespace::Global).unwrap();
        let mut search = Search::begin(&mut aset, &map, None, Namespace::Global).unwrap();
        search.seed(Value::Num(0.0), Namespace::Global).unwrap();
        search
            .relax(Value::array_contains(
                search.unvisited.get(None),
                Value::Num(2.0),
            ))
            .unwrap();
        search
            .backtrack(Value::Num(2.0), &path, &attrs, BuildDirection::Append)
            .unwrap();
        search.finish().unwrap();
        let rule = aset.into_rule();

        let mut vm = RuleVm::new();
        vm.set_global(
            nodes.index,
            RtValue::Array(vec![
                RtValue::Vector(0.0, 0.0, 0.0),
                RtValue::Vector(1.0, 0.0, 0.0),
                RtValue::Vector(2.0, 0.0, 0.0),
            ]),
        );
        vm.set_global(
            segments.index,
            RtValue::Array(vec![
                RtValue::Vector(0.0, 1.0, 0.0),
                RtValue::Vector(1.0, 2.0, 0.0),
            ]),
        );
        vm.run_rule(&rule, None).unwrap();

        // The walk starts at the destination, so append keeps it first.
        assert_eq!(vm.global(path.index), num_array(&[2.0, 1.0, 0.0]));
    }

    #[test]
    fn test_multi_source_paths_end_at_each_actors_own_node() {
        let mut vars = VarCollection::new();
        let nodes = vars.assign(Namespace::Global, "nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "segments").unwrap();
        let actors = vars.assign(Namespace::Global, "actors").unwrap();
        let store = ActorPathStore {
            path: vars.assign(Namespace::PerActor, "path").unwrap(),
            attributes: vars.assign(Namespace::PerActor, "path_attributes").unwrap(),
        };
        let map = PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        };

        let mut aset = ActionSet::new(&mut vars, "pf all", EventKind::OngoingGlobal);
        let target = Value::vector(Value::Num(2.0), Value::Num(0.0), Value::Num(0.0));
        lower_multi_source(&mut aset, &map, actors.get(None), target, None, &store).unwrap();
        let rule = aset.into_rule();

        let mut vm = RuleVm::new();
        let a = vm.add_actor(0.0, 0.0, 0.0);
        let b = vm.add_actor(3.0, 0.0, 0.0);
        // A line 0 - 1 - 2 - 3; the shared destination is node 2.
        vm.set_global(
            nodes.index,
            RtValue::Array(vec![
                RtValue::Vector(0.0, 0.0, 0.0),
                RtValue::Vector(1.0, 0.0, 0.0),
                RtValue::Vector(2.0, 0.0, 0.0),
                RtValue::Vector(3.0, 0.0, 0.0),
            ]),
        );
        vm.set_global(
            segments.index,
            RtValue::Array(vec![
                RtValue::Vector(0.0, 1.0, 0.0),
                RtValue::Vector(1.0, 2.0, 0.0),
                RtValue::Vector(2.0, 3.0, 0.0),
            ]),
        );
        vm.set_global(
            actors.index,
            RtValue::Array(vec![RtValue::Actor(a), RtValue::Actor(b)]),
        );
        vm.run_rule(&rule, None).unwrap();

        // One shared relax pass, one path per actor, each ending at its
        // own start node.
        assert_eq!(vm.player(a, store.path.index), num_array(&[2.0, 1.0, 0.0]));
        assert_eq!(vm.player(b, store.path.index), num_array(&[2.0, 3.0]));
    }

    #[test]
    fn test_lookahead_walks_the_parent_links() {
        let mut vars = VarCollection::new();
        let parents = vars.assign(Namespace::Global, "parents").unwrap();
        let mut aset = ActionSet::new(&mut vars, "lookahead", EventKind::OngoingGlobal);
        let on_route = lower_is_traveling_to_node(
            &mut aset,
            parents.get(None),
            Value::Num(2.0),
            Value::Num(0.0),
        )
        .unwrap();
        let off_route = lower_is_traveling_to_node(
            &mut aset,
            parents.get(None),
            Value::Num(2.0),
            Value::Num(5.0),
        )
        .unwrap();
        let rule = aset.into_rule();

        let mut vm = RuleVm::new();
        // The chain 2 -> 1 -> 0, seed at 0, with the +1 offset.
        vm.set_global(parents.index, num_array(&[0.0, 1.0, 2.0]));
        vm.run_rule(&rule, None).unwrap();

        assert_eq!(vm.global(on_route.index), RtValue::Bool(true));
        assert_eq!(vm.global(off_route.index), RtValue::Bool(false));
    }

    #[test]
    fn test_per_actor_searches_keep_their_temporaries_apart() {
        let mut vars = VarCollection::new();
        let nodes = vars.assign(Namespace::Global, "nodes").unwrap();
        let segments = vars.assign(Namespace::Global, "segments").unwrap();
        let map = PathMap {
            nodes: nodes.get(None),
            segments: segments.get(None),
        };

        // An each-actor rule: position comes from the event actor, so the
        // same lowered rule serves every actor with per-actor temporaries.
        let mut aset = ActionSet::new(&mut vars, "pf each", EventKind::OngoingEachActor);
        let origin = Value::position_of(Value::EventActor);
        let target = Value::vector(Value::Num(1.0), Value::Num(1.0), Value::Num(0.0));
        let result = lower_single_source(&mut aset, &map, origin, target, None).unwrap();
        let rule = aset.into_rule();

        let mut vm = RuleVm::new();
        let a = vm.add_actor(0.0, 0.0, 0.0);
        let b = vm.add_actor(0.0, 1.0, 0.0);
        load_square(&mut vm, nodes.index, segments.index);
        vm.run_rule(&rule, Some(a)).unwrap();
        vm.run_rule(&rule, Some(b)).unwrap();

        let path_a = vm.player(a, result.path.index);
        assert!(
            path_a == num_array(&[0.0, 1.0, 2.0]) || path_a == num_array(&[0.0, 3.0, 2.0]),
            "actor a took an unexpected path: {:?}",
            path_a
        );
        assert_eq!(vm.player(b, result.path.index), num_array(&[3.0, 2.0]));
    }
}
