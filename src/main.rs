mod ir;
mod lang;
mod lower;
mod pathfind;
mod run_error;
mod vm;

use std::{env, fs};

use crate::ir::disasm::print_rule_set;
use crate::ir::element::{ArithOp, Namespace, Value};
use crate::ir::rule::{EventKind, RuleSet};
use crate::lang::ast::{Expr, Stmt, VarId};
use crate::lang::builtin::{Builtin, BuiltinKind};
use crate::lower::{lower_rule, ActionSet, CompileError, TypeRegistry, VarCollection};
use crate::pathfind::{
    lower_multi_source, lower_single_source, pack_segment, ActorPathStore, PathMap,
};
use crate::vm::{RtValue, RuleVm};

struct Demo {
    rules: RuleSet,
    path_index: u32,
    attributes_index: u32,
    actors_index: u32,
    actor_path_index: u32,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_usage();
        return;
    }

    let run = args.contains(&"--run".to_string());
    let dis = args.contains(&"--dis".to_string());
    let emit = args
        .iter()
        .position(|a| a == "--emit")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let demo = match build_demo() {
        Ok(demo) => demo,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if dis || (!run && emit.is_none()) {
        print_rule_set(&demo.rules);
    }

    if let Some(path) = emit {
        let bytes = match postcard::to_allocvec(&demo.rules) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Failed to encode rule set: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = fs::write(&path, &bytes) {
            eprintln!("Failed to write '{}': {}", path, e);
            std::process::exit(1);
        }
        println!("wrote {} bytes to {}", bytes.len(), path);
    }

    if run {
        run_demo(&demo);
    }
}

fn print_usage() {
    println!("rulec - lowering backend for the rule VM");
    println!();
    println!("Usage:");
    println!("  rulec                 Disassemble the built-in demo rules");
    println!("  rulec --dis           Same, explicitly");
    println!("  rulec --run           Execute the demo on the reference interpreter");
    println!("  rulec --emit <file>   Write the encoded rule set to a file");
    println!("  rulec --help, -h      Show this help");
    println!();
    println!("Builtins:");
    for builtin in Builtin::all() {
        let kind = match builtin.kind() {
            BuiltinKind::Value => "value",
            BuiltinKind::ValueWithSetup => "value, emits setup",
            BuiltinKind::Action => "action",
        };
        println!("  {}/{}  ({})", builtin.name(), builtin.arity(), kind);
    }
}

fn vec3(x: f64, y: f64, z: f64) -> Value {
    Value::vector(Value::Num(x), Value::Num(y), Value::Num(z))
}

/// Three demo rules: a map loader, a scripted loop through the statement
/// driver, and a single-source shortest path across the map.
fn build_demo() -> Result<Demo, CompileError> {
    let mut vars = VarCollection::new();
    let types = TypeRegistry::new();

    let nodes = vars
        .assign(Namespace::Global, "map_nodes")
        .map_err(|e| e.into_compile_error("load map"))?;
    let segments = vars
        .assign(Namespace::Global, "map_segments")
        .map_err(|e| e.into_compile_error("load map"))?;

    let mut rules = RuleSet::new();

    // A square map; the diagonal shortcut needs attribute 1.
    let mut load = ActionSet::new(&mut vars, "load map", EventKind::OngoingGlobal);
    load.add(nodes.set(
        Value::MakeArray(vec![
            vec3(0.0, 0.0, 0.0),
            vec3(4.0, 0.0, 0.0),
            vec3(4.0, 4.0, 0.0),
            vec3(0.0, 4.0, 0.0),
        ]),
        None,
    ));
    load.add(segments.set(
        Value::MakeArray(vec![
            pack_segment(0, 1, 0, 0),
            pack_segment(1, 2, 0, 0),
            pack_segment(2, 3, 0, 0),
            pack_segment(3, 0, 0, 0),
            pack_segment(0, 2, 1, 1),
        ]),
        None,
    ));
    rules.rules.push(load.into_rule());

    // sum = 0; for x in range_array(4) { sum = sum + x }
    let body = vec![
        Stmt::Declare {
            id: VarId(0),
            name: "sum".to_string(),
            extended: false,
            init: Some(Expr::num(0.0)),
        },
        Stmt::Foreach {
            id: VarId(1),
            array: Expr::Call {
                builtin: Builtin::RangeArray,
                args: vec![Expr::num(4.0)],
            },
            body: vec![Stmt::Assign {
                target: Expr::var(VarId(0)),
                value: Expr::arith(ArithOp::Add, Expr::var(VarId(0)), Expr::var(VarId(1))),
            }],
        },
    ];
    rules
        .rules
        .push(lower_rule(&mut vars, &types, "sum range", EventKind::OngoingGlobal, Vec::new(), &body)?);

    let mut pf = ActionSet::new(&mut vars, "find path", EventKind::OngoingGlobal);
    let map = PathMap {
        nodes: nodes.get(None),
        segments: segments.get(None),
    };
    let result = lower_single_source(
        &mut pf,
        &map,
        vec3(0.0, 0.0, 0.0),
        vec3(4.0, 4.0, 0.0),
        None,
    )?;
    rules.rules.push(pf.into_rule());

    // One relax pass shared by every registered actor.
    let actors = vars
        .assign(Namespace::Global, "actors")
        .map_err(|e| e.into_compile_error("find all paths"))?;
    let store = ActorPathStore {
        path: vars
            .assign(Namespace::PerActor, "path")
            .map_err(|e| e.into_compile_error("find all paths"))?,
        attributes: vars
            .assign(Namespace::PerActor, "path_attributes")
            .map_err(|e| e.into_compile_error("find all paths"))?,
    };
    let mut pf_all = ActionSet::new(&mut vars, "find all paths", EventKind::OngoingGlobal);
    lower_multi_source(
        &mut pf_all,
        &map,
        actors.get(None),
        vec3(4.0, 4.0, 0.0),
        None,
        &store,
    )?;
    rules.rules.push(pf_all.into_rule());

    Ok(Demo {
        rules,
        path_index: result.path.index,
        attributes_index: result.attributes.index,
        actors_index: actors.index,
        actor_path_index: store.path.index,
    })
}

fn run_demo(demo: &Demo) {
    let mut vm = RuleVm::new();
    let near = vm.add_actor(0.5, 0.0, 0.0);
    let far = vm.add_actor(0.0, 3.5, 0.0);
    vm.set_global(
        demo.actors_index,
        RtValue::Array(vec![RtValue::Actor(near), RtValue::Actor(far)]),
    );

    for rule in &demo.rules.rules {
        if let Err(e) = vm.run_rule(rule, None) {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
    println!("path:       {:?}", vm.global(demo.path_index));
    println!("attributes: {:?}", vm.global(demo.attributes_index));
    for (label, actor) in [("near", near), ("far", far)] {
        println!(
            "actor {}:   {:?}",
            label,
            vm.player(actor, demo.actor_path_index)
        );
    }
}
