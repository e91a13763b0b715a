#![allow(dead_code)]

use std::rc::Rc;

use serde_json::{json, Value};
use tagflow_core::ast::Program;
use tagflow_core::config::{EngineConfig, InstrumentOptions};
use tagflow_core::engine::Engine;
use tagflow_core::instrument::instrument_program;
use tagflow_core::policy::Policy;
use tagflow_core::runtime::{engine_with_runtime, ShadowRuntime, Tag};

pub const URL: &str = "t.js";

pub fn config() -> EngineConfig {
    EngineConfig { max_call_depth: 32 }
}

// ----- program trees -----

pub fn id(name: &str) -> Value {
    json!({"type": "Identifier", "name": name})
}

pub fn num(n: f64) -> Value {
    json!({"type": "Literal", "value": n})
}

pub fn s(text: &str) -> Value {
    json!({"type": "Literal", "value": text})
}

pub fn boolean(b: bool) -> Value {
    json!({"type": "Literal", "value": b})
}

pub fn null() -> Value {
    json!({"type": "Literal", "value": null})
}

pub fn this() -> Value {
    json!({"type": "ThisExpression"})
}

pub fn get(object: Value, prop: &str) -> Value {
    json!({"type": "MemberExpression", "object": object, "property": id(prop), "computed": false})
}

pub fn index(object: Value, key: Value) -> Value {
    json!({"type": "MemberExpression", "object": object, "property": key, "computed": true})
}

pub fn call(callee: Value, args: Vec<Value>) -> Value {
    json!({"type": "CallExpression", "callee": callee, "arguments": args})
}

pub fn method(object: Value, prop: &str, args: Vec<Value>) -> Value {
    call(get(object, prop), args)
}

pub fn new(callee: &str, args: Vec<Value>) -> Value {
    json!({"type": "NewExpression", "callee": id(callee), "arguments": args})
}

pub fn bin(op: &str, left: Value, right: Value) -> Value {
    json!({"type": "BinaryExpression", "operator": op, "left": left, "right": right})
}

pub fn logical(op: &str, left: Value, right: Value) -> Value {
    json!({"type": "LogicalExpression", "operator": op, "left": left, "right": right})
}

pub fn unary(op: &str, argument: Value) -> Value {
    json!({"type": "UnaryExpression", "operator": op, "argument": argument})
}

pub fn cond(test: Value, consequent: Value, alternate: Value) -> Value {
    json!({
        "type": "ConditionalExpression",
        "test": test,
        "consequent": consequent,
        "alternate": alternate,
    })
}

pub fn array(elements: Vec<Value>) -> Value {
    json!({"type": "ArrayExpression", "elements": elements})
}

pub fn object(props: Vec<(&str, Value)>) -> Value {
    let properties: Vec<Value> = props
        .into_iter()
        .map(|(key, value)| json!({"key": key, "value": value, "kind": "init"}))
        .collect();
    json!({"type": "ObjectExpression", "properties": properties})
}

/// Object literal with one accessor pair `key`.
pub fn accessor_object(key: &str, getter: Value, setter: Value) -> Value {
    json!({
        "type": "ObjectExpression",
        "properties": [
            {"key": key, "value": getter, "kind": "get"},
            {"key": key, "value": setter, "kind": "set"},
        ],
    })
}

pub fn func(params: &[&str], body: Vec<Value>) -> Value {
    json!({"type": "FunctionExpression", "params": params, "body": body})
}

pub fn named_func(name: &str, params: &[&str], body: Vec<Value>) -> Value {
    json!({"type": "FunctionExpression", "id": name, "params": params, "body": body})
}

pub fn decl(name: &str, params: &[&str], body: Vec<Value>) -> Value {
    json!({
        "type": "FunctionDeclaration",
        "function": {"id": name, "params": params, "body": body},
    })
}

pub fn expr(e: Value) -> Value {
    json!({"type": "ExpressionStatement", "expression": e})
}

pub fn assign(name: &str, value: Value) -> Value {
    expr(json!({"type": "AssignmentExpression", "operator": "=", "left": id(name), "right": value}))
}

pub fn set(object: Value, prop: &str, value: Value) -> Value {
    expr(json!({
        "type": "AssignmentExpression",
        "operator": "=",
        "left": get(object, prop),
        "right": value,
    }))
}

pub fn set_index(object: Value, key: Value, value: Value) -> Value {
    expr(json!({
        "type": "AssignmentExpression",
        "operator": "=",
        "left": index(object, key),
        "right": value,
    }))
}

pub fn var(name: &str, init: Value) -> Value {
    json!({"type": "VariableDeclaration", "declarations": [{"id": name, "init": init}]})
}

pub fn vars(names: &[&str]) -> Value {
    let declarations: Vec<Value> = names.iter().map(|n| json!({"id": n})).collect();
    json!({"type": "VariableDeclaration", "declarations": declarations})
}

pub fn ret(value: Value) -> Value {
    json!({"type": "ReturnStatement", "argument": value})
}

pub fn ret_void() -> Value {
    json!({"type": "ReturnStatement"})
}

pub fn block(body: Vec<Value>) -> Value {
    json!({"type": "BlockStatement", "body": body})
}

pub fn if_(test: Value, consequent: Vec<Value>, alternate: Option<Vec<Value>>) -> Value {
    let mut stmt = json!({"type": "IfStatement", "test": test, "consequent": block(consequent)});
    if let Some(alt) = alternate {
        stmt["alternate"] = block(alt);
    }
    stmt
}

pub fn while_(test: Value, body: Vec<Value>) -> Value {
    json!({"type": "WhileStatement", "test": test, "body": block(body)})
}

pub fn for_in(left: &str, declare: bool, right: Value, body: Vec<Value>) -> Value {
    json!({
        "type": "ForInStatement",
        "left": left,
        "declare": declare,
        "right": right,
        "body": block(body),
    })
}

pub fn labeled(label: &str, body: Value) -> Value {
    json!({"type": "LabeledStatement", "label": label, "body": body})
}

pub fn break_(label: Option<&str>) -> Value {
    match label {
        Some(l) => json!({"type": "BreakStatement", "label": l}),
        None => json!({"type": "BreakStatement"}),
    }
}

pub fn continue_() -> Value {
    json!({"type": "ContinueStatement"})
}

pub fn throw(argument: Value) -> Value {
    json!({"type": "ThrowStatement", "argument": argument})
}

pub fn try_(block: Vec<Value>, handler: Option<(&str, Vec<Value>)>, finalizer: Option<Vec<Value>>) -> Value {
    let mut stmt = json!({"type": "TryStatement", "block": block});
    if let Some((param, body)) = handler {
        stmt["handler"] = json!({"param": param, "body": body});
    }
    if let Some(fin) = finalizer {
        stmt["finalizer"] = json!(fin);
    }
    stmt
}

/// `console.log(args...)`
pub fn log(args: Vec<Value>) -> Value {
    expr(method(id("console"), "log", args))
}

/// Places a statement on source line `line`.
pub fn at(line: u32, mut stmt: Value) -> Value {
    stmt["span"] = json!({
        "start_line": line,
        "start_offset": 0,
        "end_line": line,
        "end_offset": 40,
    });
    stmt
}

pub fn program(body: Vec<Value>) -> Program {
    serde_json::from_value(json!({"body": body})).expect("decode program")
}

// ----- running -----

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub output: Vec<String>,
    pub completion: String,
}

fn outcome(engine: &Engine, res: tagflow_core::engine::Completion<()>) -> Outcome {
    Outcome {
        output: engine.output.clone(),
        completion: match res {
            Ok(()) => "normal".to_string(),
            Err(abrupt) => engine.describe_abrupt(&abrupt),
        },
    }
}

pub fn run_plain(program: &Program) -> Outcome {
    let mut engine = Engine::new(config());
    let res = engine.run_program(program);
    outcome(&engine, res)
}

pub fn instrument(program: &Program) -> Program {
    instrument_program(program, &InstrumentOptions::with_url(URL)).expect("instrument")
}

pub fn run_instrumented<P: Policy + 'static>(
    program: &Program,
    policy: P,
) -> (Outcome, Rc<ShadowRuntime<P>>) {
    let instrumented = instrument(program);
    let (mut engine, runtime) = engine_with_runtime(policy, config()).expect("install runtime");
    let res = engine.run_program(&instrumented);
    (outcome(&engine, res), runtime)
}

/// Tag payload written by the test policies.
pub fn label(tag: Option<&Tag>) -> String {
    tag.and_then(|t| t.downcast_ref::<String>())
        .cloned()
        .unwrap_or_else(|| "-".to_string())
}
