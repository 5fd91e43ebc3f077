use crate::ir::element::{Action, ArithOp, CompareOp, ModifyOp, Rounding, Value};
use crate::ir::rule::{Rule, RuleSet};

/// Print a whole compiled rule set.
pub fn print_rule_set(rules: &RuleSet) {
    for rule in &rules.rules {
        print!("{}", rule_to_string(rule));
        println!();
    }
}

/// Render one rule as a numbered action listing.
pub fn rule_to_string(rule: &Rule) -> String {
    let mut out = String::new();
    out.push_str(&format!("rule \"{}\" ({:?})\n", rule.name, rule.event));

    for cond in &rule.conditions {
        out.push_str(&format!(
            "  if {} {} {}\n",
            fmt_value(&cond.lhs),
            cmp_symbol(cond.op),
            fmt_value(&cond.rhs)
        ));
    }

    for (ip, action) in rule.actions.iter().enumerate() {
        out.push_str(&format!("  {:04} {}\n", ip, fmt_action(action)));
    }

    out
}

pub fn fmt_action(action: &Action) -> String {
    match action {
        Action::SetGlobal {
            index,
            element,
            value,
        } => match element {
            Some(e) => format!("g{}[{}] = {}", index, fmt_value(e), fmt_value(value)),
            None => format!("g{} = {}", index, fmt_value(value)),
        },
        Action::SetPlayer {
            index,
            actor,
            element,
            value,
        } => match element {
            Some(e) => format!(
                "p{}@{}[{}] = {}",
                index,
                fmt_value(actor),
                fmt_value(e),
                fmt_value(value)
            ),
            None => format!("p{}@{} = {}", index, fmt_value(actor), fmt_value(value)),
        },
        Action::ModifyGlobal { index, op, value } => {
            format!("g{} {}= {}", index, modify_symbol(*op), fmt_value(value))
        }
        Action::ModifyPlayer {
            index,
            actor,
            op,
            value,
        } => format!(
            "p{}@{} {}= {}",
            index,
            fmt_value(actor),
            modify_symbol(*op),
            fmt_value(value)
        ),
        Action::Skip { count } => format!("skip {}", fmt_value(count)),
        Action::SkipIf { condition, count } => {
            format!("skip-if {} -> {}", fmt_value(condition), fmt_value(count))
        }
        Action::Loop => "loop".to_string(),
        Action::Wait { seconds } => format!("wait {}", fmt_value(seconds)),
    }
}

pub fn fmt_value(value: &Value) -> String {
    match value {
        Value::Num(n) => format!("{}", n),
        Value::Bool(b) => format!("{}", b),
        Value::Null => "null".to_string(),
        Value::Vector { x, y, z } => {
            format!("vec({}, {}, {})", fmt_value(x), fmt_value(y), fmt_value(z))
        }
        Value::EventActor => "event-actor".to_string(),
        Value::PositionOf(a) => format!("position-of({})", fmt_value(a)),
        Value::ArrayElement => "elem".to_string(),
        Value::EmptyArray => "[]".to_string(),
        Value::MakeArray(items) => {
            let parts: Vec<String> = items.iter().map(fmt_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::GetGlobal { index } => format!("g{}", index),
        Value::GetPlayer { index, actor } => format!("p{}@{}", index, fmt_value(actor)),
        Value::ValueInArray { array, index } => {
            format!("{}[{}]", fmt_value(array), fmt_value(index))
        }
        Value::CountOf(a) => format!("count({})", fmt_value(a)),
        Value::FirstOf(a) => format!("first({})", fmt_value(a)),
        Value::SortedArray { array, rank } => {
            format!("sort({}, by {})", fmt_value(array), fmt_value(rank))
        }
        Value::FilteredArray { array, predicate } => {
            format!("filter({}, {})", fmt_value(array), fmt_value(predicate))
        }
        Value::IsTrueForAny { array, predicate } => {
            format!("any({}, {})", fmt_value(array), fmt_value(predicate))
        }
        Value::ArrayContains { array, value } => {
            format!("contains({}, {})", fmt_value(array), fmt_value(value))
        }
        Value::IndexOfValue { array, value } => {
            format!("index-of({}, {})", fmt_value(array), fmt_value(value))
        }
        Value::Append { array, value } => {
            format!("append({}, {})", fmt_value(array), fmt_value(value))
        }
        Value::ArraySlice {
            array,
            start,
            count,
        } => format!(
            "slice({}, {}, {})",
            fmt_value(array),
            fmt_value(start),
            fmt_value(count)
        ),
        Value::RemoveFromArray { array, value } => {
            format!("remove({}, {})", fmt_value(array), fmt_value(value))
        }
        Value::Arith { op, lhs, rhs } => format!(
            "({} {} {})",
            fmt_value(lhs),
            arith_symbol(*op),
            fmt_value(rhs)
        ),
        Value::Compare { op, lhs, rhs } => {
            format!("({} {} {})", fmt_value(lhs), cmp_symbol(*op), fmt_value(rhs))
        }
        Value::And(a, b) => format!("({} && {})", fmt_value(a), fmt_value(b)),
        Value::Or(a, b) => format!("({} || {})", fmt_value(a), fmt_value(b)),
        Value::Not(a) => format!("!{}", fmt_value(a)),
        Value::Ternary {
            condition,
            on_true,
            on_false,
        } => format!(
            "({} ? {} : {})",
            fmt_value(condition),
            fmt_value(on_true),
            fmt_value(on_false)
        ),
        Value::DistanceBetween(a, b) => {
            format!("dist({}, {})", fmt_value(a), fmt_value(b))
        }
        Value::XOf(a) => format!("x-of({})", fmt_value(a)),
        Value::YOf(a) => format!("y-of({})", fmt_value(a)),
        Value::RoundToInt { value, mode } => {
            let mode = match mode {
                Rounding::Down => "down",
                Rounding::Nearest => "nearest",
                Rounding::Up => "up",
            };
            format!("round-{}({})", mode, fmt_value(value))
        }
    }
}

fn cmp_symbol(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "==",
        CompareOp::Ne => "!=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
    }
}

fn arith_symbol(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "+",
        ArithOp::Sub => "-",
        ArithOp::Mul => "*",
        ArithOp::Div => "/",
        ArithOp::Mod => "%",
    }
}

fn modify_symbol(op: ModifyOp) -> &'static str {
    match op {
        ModifyOp::Add => "+",
        ModifyOp::AppendToArray => "++",
        ModifyOp::RemoveFromArrayByValue => "--",
    }
}
