use std::collections::HashMap;

use log::trace;

use crate::ir::element::{Action, ArithOp, CompareOp, ModifyOp, Rounding, Value};
use crate::ir::rule::Rule;
use crate::run_error::RunError;

// =============================================================================
// VM - Reference interpreter for compiled rules
// =============================================================================
//
// A small host model, enough to execute what the lowering engine emits and
// check its behavior: flat global and per-actor storage defaulting to 0,
// forward skips, the restart-style `Loop`, and the handful of array values
// the backend leans on. `Wait` is a step, not real time.

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Executed-action budget per `run_rule`; generated loops that fail to
    /// terminate trip this instead of hanging the tests.
    pub max_steps: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { max_steps: 200_000 }
    }
}

/// A runtime value. Storage slots start out as `Num(0.0)`.
#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Num(f64),
    Bool(bool),
    Null,
    Vector(f64, f64, f64),
    Actor(u32),
    Array(Vec<RtValue>),
}

impl RtValue {
    fn truthy(&self) -> bool {
        match self {
            RtValue::Bool(b) => *b,
            RtValue::Num(n) => *n != 0.0,
            _ => false,
        }
    }

    fn as_num(&self) -> f64 {
        match self {
            RtValue::Num(n) => *n,
            RtValue::Bool(true) => 1.0,
            _ => 0.0,
        }
    }

    /// Concatenation operand: a non-array behaves as a one-element array.
    fn into_elements(self) -> Vec<RtValue> {
        match self {
            RtValue::Array(items) => items,
            other => vec![other],
        }
    }
}

pub struct RuleVm {
    globals: HashMap<u32, RtValue>,
    per_actor: HashMap<(u32, u32), RtValue>,
    actor_positions: Vec<(f64, f64, f64)>,
    config: VmConfig,
}

impl Default for RuleVm {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleVm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        RuleVm {
            globals: HashMap::new(),
            per_actor: HashMap::new(),
            actor_positions: Vec::new(),
            config,
        }
    }

    /// Register an actor at a world position; returns its handle.
    pub fn add_actor(&mut self, x: f64, y: f64, z: f64) -> u32 {
        self.actor_positions.push((x, y, z));
        (self.actor_positions.len() - 1) as u32
    }

    pub fn set_global(&mut self, index: u32, value: RtValue) {
        self.globals.insert(index, value);
    }

    pub fn global(&self, index: u32) -> RtValue {
        self.globals.get(&index).cloned().unwrap_or(RtValue::Num(0.0))
    }

    pub fn set_player(&mut self, actor: u32, index: u32, value: RtValue) {
        self.per_actor.insert((actor, index), value);
    }

    pub fn player(&self, actor: u32, index: u32) -> RtValue {
        self.per_actor
            .get(&(actor, index))
            .cloned()
            .unwrap_or(RtValue::Num(0.0))
    }

    /// Run one rule to completion for the given event actor. `Loop`
    /// restarts the action list only while the rule's conditions still
    /// hold, mirroring the host's re-evaluation.
    pub fn run_rule(&mut self, rule: &Rule, actor: Option<u32>) -> Result<(), RunError> {
        if !self.conditions_hold(rule, actor)? {
            return Ok(());
        }

        let mut pc = 0usize;
        let mut steps = 0usize;
        while pc < rule.actions.len() {
            steps += 1;
            if steps > self.config.max_steps {
                return Err(RunError::new(&format!(
                    "rule '{}' exceeded {} steps",
                    rule.name, self.config.max_steps
                )));
            }

            trace!("rule '{}' pc {:04}", rule.name, pc);
            match &rule.actions[pc] {
                Action::Skip { count } => {
                    let count = self.eval_num(count, actor)?;
                    pc += 1 + count.max(0.0) as usize;
                }
                Action::SkipIf { condition, count } => {
                    if self.eval(condition, actor, &mut Vec::new())?.truthy() {
                        let count = self.eval_num(count, actor)?;
                        pc += 1 + count.max(0.0) as usize;
                    } else {
                        pc += 1;
                    }
                }
                Action::Loop => {
                    if self.conditions_hold(rule, actor)? {
                        pc = 0;
                    } else {
                        break;
                    }
                }
                Action::Wait { .. } => {
                    pc += 1;
                }
                action => {
                    self.execute(action, actor)?;
                    pc += 1;
                }
            }
        }
        Ok(())
    }

    fn conditions_hold(&self, rule: &Rule, actor: Option<u32>) -> Result<bool, RunError> {
        let mut elements = Vec::new();
        for condition in &rule.conditions {
            let lhs = self.eval(&condition.lhs, actor, &mut elements)?;
            let rhs = self.eval(&condition.rhs, actor, &mut elements)?;
            if !compare(condition.op, &lhs, &rhs) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn execute(&mut self, action: &Action, actor: Option<u32>) -> Result<(), RunError> {
        let mut elements = Vec::new();
        match action {
            Action::SetGlobal {
                index,
                element,
                value,
            } => {
                let value = self.eval(value, actor, &mut elements)?;
                match element {
                    Some(element) => {
                        let at = self.eval_num(element, actor)? as usize;
                        let slot = self.globals.entry(*index).or_insert(RtValue::Num(0.0));
                        write_element(slot, at, value);
                    }
                    None => {
                        self.globals.insert(*index, value);
                    }
                }
            }
            Action::SetPlayer {
                index,
                actor: target,
                element,
                value,
            } => {
                let target = self.eval_actor(target, actor)?;
                let value = self.eval(value, actor, &mut elements)?;
                match element {
                    Some(element) => {
                        let at = self.eval_num(element, actor)? as usize;
                        let slot = self
                            .per_actor
                            .entry((target, *index))
                            .or_insert(RtValue::Num(0.0));
                        write_element(slot, at, value);
                    }
                    None => {
                        self.per_actor.insert((target, *index), value);
                    }
                }
            }
            Action::ModifyGlobal { index, op, value } => {
                let operand = self.eval(value, actor, &mut elements)?;
                let slot = self.globals.entry(*index).or_insert(RtValue::Num(0.0));
                modify(slot, *op, operand);
            }
            Action::ModifyPlayer {
                index,
                actor: target,
                op,
                value,
            } => {
                let target = self.eval_actor(target, actor)?;
                let operand = self.eval(value, actor, &mut elements)?;
                let slot = self
                    .per_actor
                    .entry((target, *index))
                    .or_insert(RtValue::Num(0.0));
                modify(slot, *op, operand);
            }
            Action::Skip { .. } | Action::SkipIf { .. } | Action::Loop | Action::Wait { .. } => {
                return Err(RunError::new("control action reached execute"));
            }
        }
        Ok(())
    }

    fn eval_num(&self, value: &Value, actor: Option<u32>) -> Result<f64, RunError> {
        Ok(self.eval(value, actor, &mut Vec::new())?.as_num())
    }

    fn eval_actor(&self, value: &Value, actor: Option<u32>) -> Result<u32, RunError> {
        match self.eval(value, actor, &mut Vec::new())? {
            RtValue::Actor(a) => Ok(a),
            other => Err(RunError::new(&format!("expected actor, got {:?}", other))),
        }
    }

    fn position_of(&self, value: &RtValue) -> Result<(f64, f64, f64), RunError> {
        match value {
            RtValue::Vector(x, y, z) => Ok((*x, *y, *z)),
            RtValue::Actor(a) => self
                .actor_positions
                .get(*a as usize)
                .copied()
                .ok_or_else(|| RunError::new(&format!("unknown actor {}", a))),
            other => Err(RunError::new(&format!("expected position, got {:?}", other))),
        }
    }

    /// Evaluate one value. `elements` is the stack of array elements under
    /// inspection by enclosing sort/filter/any ranks.
    fn eval(
        &self,
        value: &Value,
        actor: Option<u32>,
        elements: &mut Vec<RtValue>,
    ) -> Result<RtValue, RunError> {
        match value {
            Value::Num(n) => Ok(RtValue::Num(*n)),
            Value::Bool(b) => Ok(RtValue::Bool(*b)),
            Value::Null => Ok(RtValue::Null),
            Value::Vector { x, y, z } => Ok(RtValue::Vector(
                self.eval(x, actor, elements)?.as_num(),
                self.eval(y, actor, elements)?.as_num(),
                self.eval(z, actor, elements)?.as_num(),
            )),
            Value::EventActor => actor
                .map(RtValue::Actor)
                .ok_or_else(|| RunError::new("no event actor in this rule")),
            Value::PositionOf(inner) => {
                let inner = self.eval(inner, actor, elements)?;
                let (x, y, z) = self.position_of(&inner)?;
                Ok(RtValue::Vector(x, y, z))
            }
            Value::ArrayElement => elements
                .last()
                .cloned()
                .ok_or_else(|| RunError::new("array element outside a rank context")),
            Value::EmptyArray => Ok(RtValue::Array(Vec::new())),
            Value::MakeArray(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, actor, elements)?);
                }
                Ok(RtValue::Array(out))
            }
            Value::GetGlobal { index } => Ok(self.global(*index)),
            Value::GetPlayer { index, actor: target } => {
                let target = match self.eval(target, actor, elements)? {
                    RtValue::Actor(a) => a,
                    other => {
                        return Err(RunError::new(&format!("expected actor, got {:?}", other)))
                    }
                };
                Ok(self.player(target, *index))
            }
            Value::ValueInArray { array, index } => {
                let array = self.eval(array, actor, elements)?;
                let index = self.eval(index, actor, elements)?.as_num();
                match array {
                    RtValue::Array(items) if index >= 0.0 => Ok(items
                        .get(index as usize)
                        .cloned()
                        .unwrap_or(RtValue::Num(0.0))),
                    _ => Ok(RtValue::Num(0.0)),
                }
            }
            Value::CountOf(array) => match self.eval(array, actor, elements)? {
                RtValue::Array(items) => Ok(RtValue::Num(items.len() as f64)),
                _ => Ok(RtValue::Num(0.0)),
            },
            Value::FirstOf(array) => match self.eval(array, actor, elements)? {
                RtValue::Array(items) => {
                    Ok(items.into_iter().next().unwrap_or(RtValue::Num(0.0)))
                }
                _ => Ok(RtValue::Num(0.0)),
            },
            Value::SortedArray { array, rank } => {
                let items = self.eval(array, actor, elements)?.into_elements();
                let mut ranked = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(item.clone());
                    let key = self.eval(rank, actor, elements)?.as_num();
                    elements.pop();
                    ranked.push((key, item));
                }
                // Stable: equal ranks keep array order.
                ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                Ok(RtValue::Array(ranked.into_iter().map(|(_, v)| v).collect()))
            }
            Value::FilteredArray { array, predicate } => {
                let items = self.eval(array, actor, elements)?.into_elements();
                let mut out = Vec::new();
                for item in items {
                    elements.push(item.clone());
                    let keep = self.eval(predicate, actor, elements)?.truthy();
                    elements.pop();
                    if keep {
                        out.push(item);
                    }
                }
                Ok(RtValue::Array(out))
            }
            Value::IsTrueForAny { array, predicate } => {
                let items = self.eval(array, actor, elements)?.into_elements();
                for item in items {
                    elements.push(item);
                    let hit = self.eval(predicate, actor, elements)?.truthy();
                    elements.pop();
                    if hit {
                        return Ok(RtValue::Bool(true));
                    }
                }
                Ok(RtValue::Bool(false))
            }
            Value::ArrayContains { array, value } => {
                let needle = self.eval(value, actor, elements)?;
                let items = self.eval(array, actor, elements)?.into_elements();
                Ok(RtValue::Bool(items.contains(&needle)))
            }
            Value::IndexOfValue { array, value } => {
                let needle = self.eval(value, actor, elements)?;
                let items = self.eval(array, actor, elements)?.into_elements();
                Ok(RtValue::Num(
                    items
                        .iter()
                        .position(|item| *item == needle)
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                ))
            }
            Value::Append { array, value } => {
                let mut items = self.eval(array, actor, elements)?.into_elements();
                items.extend(self.eval(value, actor, elements)?.into_elements());
                Ok(RtValue::Array(items))
            }
            Value::ArraySlice {
                array,
                start,
                count,
            } => {
                let items = self.eval(array, actor, elements)?.into_elements();
                let start = (self.eval(start, actor, elements)?.as_num().max(0.0)) as usize;
                let count = (self.eval(count, actor, elements)?.as_num().max(0.0)) as usize;
                Ok(RtValue::Array(
                    items.into_iter().skip(start).take(count).collect(),
                ))
            }
            Value::RemoveFromArray { array, value } => {
                let needle = self.eval(value, actor, elements)?;
                let items = self.eval(array, actor, elements)?.into_elements();
                Ok(RtValue::Array(
                    items.into_iter().filter(|item| *item != needle).collect(),
                ))
            }
            Value::Arith { op, lhs, rhs } => {
                let lhs = self.eval(lhs, actor, elements)?.as_num();
                let rhs = self.eval(rhs, actor, elements)?.as_num();
                let out = match op {
                    ArithOp::Add => lhs + rhs,
                    ArithOp::Sub => lhs - rhs,
                    ArithOp::Mul => lhs * rhs,
                    ArithOp::Div => {
                        if rhs == 0.0 {
                            0.0
                        } else {
                            lhs / rhs
                        }
                    }
                    ArithOp::Mod => {
                        if rhs == 0.0 {
                            0.0
                        } else {
                            lhs % rhs
                        }
                    }
                };
                Ok(RtValue::Num(out))
            }
            Value::Compare { op, lhs, rhs } => {
                let lhs = self.eval(lhs, actor, elements)?;
                let rhs = self.eval(rhs, actor, elements)?;
                Ok(RtValue::Bool(compare(*op, &lhs, &rhs)))
            }
            Value::And(lhs, rhs) => Ok(RtValue::Bool(
                self.eval(lhs, actor, elements)?.truthy()
                    && self.eval(rhs, actor, elements)?.truthy(),
            )),
            Value::Or(lhs, rhs) => Ok(RtValue::Bool(
                self.eval(lhs, actor, elements)?.truthy()
                    || self.eval(rhs, actor, elements)?.truthy(),
            )),
            Value::Not(inner) => Ok(RtValue::Bool(!self.eval(inner, actor, elements)?.truthy())),
            Value::Ternary {
                condition,
                on_true,
                on_false,
            } => {
                if self.eval(condition, actor, elements)?.truthy() {
                    self.eval(on_true, actor, elements)
                } else {
                    self.eval(on_false, actor, elements)
                }
            }
            Value::DistanceBetween(a, b) => {
                let a = self.eval(a, actor, elements)?;
                let b = self.eval(b, actor, elements)?;
                let (ax, ay, az) = self.position_of(&a)?;
                let (bx, by, bz) = self.position_of(&b)?;
                let (dx, dy, dz) = (ax - bx, ay - by, az - bz);
                Ok(RtValue::Num((dx * dx + dy * dy + dz * dz).sqrt()))
            }
            Value::XOf(inner) => match self.eval(inner, actor, elements)? {
                RtValue::Vector(x, _, _) => Ok(RtValue::Num(x)),
                _ => Ok(RtValue::Num(0.0)),
            },
            Value::YOf(inner) => match self.eval(inner, actor, elements)? {
                RtValue::Vector(_, y, _) => Ok(RtValue::Num(y)),
                _ => Ok(RtValue::Num(0.0)),
            },
            Value::RoundToInt { value, mode } => {
                let n = self.eval(value, actor, elements)?.as_num();
                let out = match mode {
                    Rounding::Down => n.floor(),
                    Rounding::Nearest => n.round(),
                    Rounding::Up => n.ceil(),
                };
                Ok(RtValue::Num(out))
            }
        }
    }
}

fn compare(op: CompareOp, lhs: &RtValue, rhs: &RtValue) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Lt => lhs.as_num() < rhs.as_num(),
        CompareOp::Le => lhs.as_num() <= rhs.as_num(),
        CompareOp::Gt => lhs.as_num() > rhs.as_num(),
        CompareOp::Ge => lhs.as_num() >= rhs.as_num(),
    }
}

/// Write one element of a slot, growing it as an array if needed. A
/// non-array slot (the `0` default included) starts over as an array.
fn write_element(slot: &mut RtValue, index: usize, value: RtValue) {
    let mut items = match std::mem::replace(slot, RtValue::Null) {
        RtValue::Array(items) => items,
        _ => Vec::new(),
    };
    if items.len() <= index {
        items.resize(index + 1, RtValue::Num(0.0));
    }
    items[index] = value;
    *slot = RtValue::Array(items);
}

fn modify(slot: &mut RtValue, op: ModifyOp, operand: RtValue) {
    match op {
        ModifyOp::Add => {
            *slot = RtValue::Num(slot.as_num() + operand.as_num());
        }
        ModifyOp::AppendToArray => {
            let mut items = match std::mem::replace(slot, RtValue::Null) {
                RtValue::Array(items) => items,
                RtValue::Num(n) if n == 0.0 => Vec::new(),
                other => vec![other],
            };
            items.extend(operand.into_elements());
            *slot = RtValue::Array(items);
        }
        ModifyOp::RemoveFromArrayByValue => {
            let items = match std::mem::replace(slot, RtValue::Null) {
                RtValue::Array(items) => items,
                other => vec![other],
            };
            *slot = RtValue::Array(items.into_iter().filter(|item| *item != operand).collect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::rule::{Condition, EventKind};

    fn rule(actions: Vec<Action>) -> Rule {
        Rule {
            name: "test".to_string(),
            event: EventKind::OngoingGlobal,
            conditions: Vec::new(),
            actions,
        }
    }

    #[test]
    fn test_skip_jumps_over_actions() {
        let mut vm = RuleVm::new();
        vm.run_rule(
            &rule(vec![
                Action::Skip {
                    count: Value::Num(1.0),
                },
                Action::SetGlobal {
                    index: 0,
                    element: None,
                    value: Value::Num(1.0),
                },
                Action::SetGlobal {
                    index: 1,
                    element: None,
                    value: Value::Num(2.0),
                },
            ]),
            None,
        )
        .unwrap();

        assert_eq!(vm.global(0), RtValue::Num(0.0), "skipped");
        assert_eq!(vm.global(1), RtValue::Num(2.0));
    }

    #[test]
    fn test_skip_if_consults_the_condition() {
        let mut vm = RuleVm::new();
        vm.run_rule(
            &rule(vec![
                Action::SkipIf {
                    condition: Value::Bool(false),
                    count: Value::Num(1.0),
                },
                Action::SetGlobal {
                    index: 0,
                    element: None,
                    value: Value::Num(5.0),
                },
            ]),
            None,
        )
        .unwrap();

        assert_eq!(vm.global(0), RtValue::Num(5.0));
    }

    #[test]
    fn test_dynamic_skip_count_reads_storage() {
        let mut vm = RuleVm::new();
        vm.set_global(9, RtValue::Num(2.0));
        vm.run_rule(
            &rule(vec![
                Action::Skip {
                    count: Value::GetGlobal { index: 9 },
                },
                Action::SetGlobal {
                    index: 0,
                    element: None,
                    value: Value::Num(1.0),
                },
                Action::SetGlobal {
                    index: 1,
                    element: None,
                    value: Value::Num(1.0),
                },
                Action::SetGlobal {
                    index: 2,
                    element: None,
                    value: Value::Num(1.0),
                },
            ]),
            None,
        )
        .unwrap();

        assert_eq!(vm.global(0), RtValue::Num(0.0));
        assert_eq!(vm.global(1), RtValue::Num(0.0));
        assert_eq!(vm.global(2), RtValue::Num(1.0));
    }

    #[test]
    fn test_element_write_grows_the_array() {
        let mut vm = RuleVm::new();
        vm.run_rule(
            &rule(vec![Action::SetGlobal {
                index: 0,
                element: Some(Value::Num(2.0)),
                value: Value::Num(7.0),
            }]),
            None,
        )
        .unwrap();

        assert_eq!(
            vm.global(0),
            RtValue::Array(vec![
                RtValue::Num(0.0),
                RtValue::Num(0.0),
                RtValue::Num(7.0)
            ])
        );
    }

    #[test]
    fn test_sorted_array_rank_sees_each_element() {
        let vm = RuleVm::new();
        let sorted = vm
            .eval(
                &Value::sorted_array(
                    Value::MakeArray(vec![Value::Num(3.0), Value::Num(1.0), Value::Num(2.0)]),
                    Value::ArrayElement,
                ),
                None,
                &mut Vec::new(),
            )
            .unwrap();

        assert_eq!(
            sorted,
            RtValue::Array(vec![
                RtValue::Num(1.0),
                RtValue::Num(2.0),
                RtValue::Num(3.0)
            ])
        );
    }

    #[test]
    fn test_loop_restarts_while_conditions_hold() {
        let mut vm = RuleVm::new();
        vm.set_global(0, RtValue::Num(3.0));
        let looping = Rule {
            name: "countdown".to_string(),
            event: EventKind::OngoingGlobal,
            conditions: vec![Condition::new(
                Value::GetGlobal { index: 0 },
                CompareOp::Gt,
                Value::Num(0.0),
            )],
            actions: vec![
                Action::SetGlobal {
                    index: 0,
                    element: None,
                    value: Value::sub(Value::GetGlobal { index: 0 }, Value::Num(1.0)),
                },
                Action::Loop,
            ],
        };

        vm.run_rule(&looping, None).unwrap();
        assert_eq!(vm.global(0), RtValue::Num(0.0));
    }

    #[test]
    fn test_step_budget_stops_runaway_rules() {
        let mut vm = RuleVm::with_config(VmConfig { max_steps: 100 });
        let err = vm
            .run_rule(&rule(vec![Action::Loop]), None)
            .unwrap_err();
        assert!(err.to_string().contains("steps"));
    }

    #[test]
    fn test_per_actor_storage_is_isolated() {
        let mut vm = RuleVm::new();
        let a = vm.add_actor(0.0, 0.0, 0.0);
        let b = vm.add_actor(1.0, 0.0, 0.0);
        vm.set_player(a, 0, RtValue::Num(1.0));

        assert_eq!(vm.player(a, 0), RtValue::Num(1.0));
        assert_eq!(vm.player(b, 0), RtValue::Num(0.0));
    }
}
