mod common;

use std::rc::Rc;

use anyhow::{bail, Result};
use common::*;
use tagflow_contracts::{hooks, POSITION_FIELDS, RUNTIME_BINDING};
use tagflow_core::engine::{Property, Value};
use tagflow_core::policy::{brief, Policy, TracePolicy};
use tagflow_core::runtime::{
    engine_with_runtime, CallKind, Operator, Position, Tag, TaggedValue,
};

/// Tags literals with `L<line>:<value>` and records the events the tests
/// look at.
#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    enters: usize,
    leaves: usize,
    depth: i64,
    min_depth: i64,
    fail_binop: bool,
}

impl Recorder {
    fn failing() -> Self {
        Recorder {
            fail_binop: true,
            ..Recorder::default()
        }
    }

    fn has(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    fn count(&self, prefix: &str) -> usize {
        self.events.iter().filter(|e| e.starts_with(prefix)).count()
    }
}

fn access(computed: bool) -> &'static str {
    if computed {
        "computed"
    } else {
        "static"
    }
}

impl Policy for Recorder {
    fn tag_literal(&mut self, pos: &Position, value: &Value) -> Result<Option<Tag>> {
        Ok(Some(Tag::new(format!("L{}:{}", pos.span.start_line, brief(value)))))
    }

    fn tag_for_in_var(&mut self, _pos: &Position, key: &Value) -> Result<Option<Tag>> {
        self.events.push(format!("for-in {}", brief(key)));
        Ok(Some(Tag::new(format!("key:{}", brief(key)))))
    }

    fn tag_native_exception(&mut self, _pos: &Position, _exception: &Value) -> Result<Option<Tag>> {
        self.events.push("native exception".to_string());
        Ok(Some(Tag::new("native-exception".to_string())))
    }

    fn tag_absent_argument(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        index: usize,
    ) -> Result<Option<Tag>> {
        self.events.push(format!("absent from {index}"));
        Ok(Some(Tag::new("absent".to_string())))
    }

    fn tag_native_result(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        result: &Value,
    ) -> Result<Option<Tag>> {
        self.events.push(format!("native result {}", brief(result)));
        Ok(Some(Tag::new(format!("result:{}", brief(result)))))
    }

    fn tag_native_property(
        &mut self,
        _pos: &Position,
        _holder: &Value,
        key: &str,
        _value: &Value,
    ) -> Result<Option<Tag>> {
        Ok(Some(Tag::new(format!("native:{key}"))))
    }

    fn tag_callee(&mut self, _pos: &Position, _callee: &Value) -> Result<Option<Tag>> {
        Ok(Some(Tag::new("callee".to_string())))
    }

    fn tag_binop_result(
        &mut self,
        _pos: &Position,
        op: Operator,
        left: &TaggedValue,
        right: &TaggedValue,
        result: &Value,
    ) -> Result<Option<Tag>> {
        if self.fail_binop {
            bail!("binop refused");
        }
        self.events.push(format!(
            "binop {} {} {} = {}",
            label(left.tag.as_ref()),
            op.as_str(),
            label(right.tag.as_ref()),
            brief(result)
        ));
        Ok(None)
    }

    fn tag_prop_read(
        &mut self,
        _pos: &Position,
        _object: &TaggedValue,
        key: &str,
        computed: bool,
        _value: &Value,
        stored: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        self.events.push(format!("read {key} {}", access(computed)));
        Ok(stored.cloned())
    }

    fn tag_prop_write(
        &mut self,
        _pos: &Position,
        _object: &TaggedValue,
        key: &str,
        computed: bool,
        value: &TaggedValue,
        _previous: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        self.events.push(format!("put {key} {}", access(computed)));
        self.events.push(format!("write {key} {}", label(value.tag.as_ref())));
        Ok(value.tag.clone())
    }

    fn tag_prop_delete(
        &mut self,
        _pos: &Position,
        _object: &TaggedValue,
        key: &str,
        computed: bool,
        _stored: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        self.events.push(format!("delete {key} {}", access(computed)));
        Ok(None)
    }

    fn funcall(
        &mut self,
        _pos: &Position,
        _callee: &TaggedValue,
        receiver: &TaggedValue,
        args: &[Rc<TaggedValue>],
        kind: CallKind,
    ) -> Result<()> {
        let shown: Vec<String> = args.iter().map(|a| brief(&a.value)).collect();
        self.events.push(format!(
            "{} call this={} args=[{}]",
            kind.as_str(),
            brief(&receiver.value),
            shown.join(",")
        ));
        Ok(())
    }

    fn enter_function(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        _arguments: &Value,
        _receiver: &TaggedValue,
    ) -> Result<()> {
        self.enters += 1;
        self.depth += 1;
        Ok(())
    }

    fn leave_function(&mut self, _pos: &Position) -> Result<()> {
        self.leaves += 1;
        self.depth -= 1;
        self.min_depth = self.min_depth.min(self.depth);
        Ok(())
    }

    fn leave_script(&mut self, _pos: &Position) -> Result<()> {
        self.events.push("leave script".to_string());
        Ok(())
    }
}

#[test]
fn binop_sees_operand_tags_and_raw_result() {
    let program = program(vec![
        at(1, var("x", num(1.0))),
        at(2, assign("x", bin("+", id("x"), num(2.0)))),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert!(policy.has("write x L1:1"), "{:?}", policy.events);
    assert!(policy.has("binop L1:1 + L2:2 = 3"), "{:?}", policy.events);
}

#[test]
fn native_method_result_is_tagged_once() {
    let program = program(vec![
        at(1, var("arr", array(vec![num(1.0)]))),
        at(2, var("r", method(id("arr"), "push", vec![num(2.0)]))),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert_eq!(policy.count("native result"), 1);
    assert!(policy.has("native result 2"));
    assert!(policy.has("write r result:2"));
    assert_eq!(policy.enters, 0);
    assert_eq!(policy.leaves, 0);
}

#[test]
fn for_in_key_is_rewrapped_every_iteration() {
    let program = program(vec![
        at(1, var("o", object(vec![("a", num(1.0)), ("b", num(2.0))]))),
        at(2, for_in("k", true, id("o"), vec![at(3, assign("k", s("z")))])),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert_eq!(policy.count("for-in"), 2);
    assert!(policy.has("for-in \"a\""));
    assert!(policy.has("for-in \"b\""));
    assert!(policy.has("write k key:\"b\""));
    assert_eq!(policy.count("write k L3:\"z\""), 2);
}

#[test]
fn property_tags_follow_writes_literals_and_accessors() {
    let program = program(vec![
        at(1, var("o", object(vec![]))),
        at(2, var("a", s("secret"))),
        at(3, set(id("o"), "p", id("a"))),
        at(4, var("r", get(id("o"), "p"))),
        at(5, var("q", accessor_object(
            "v",
            func(&[], vec![at(6, ret(num(7.0)))]),
            func(&["x"], vec![]),
        ))),
        at(7, var("g", get(id("q"), "v"))),
        at(8, var("lit", object(vec![("n", num(5.0))]))),
        at(9, var("m", get(id("lit"), "n"))),
        at(10, var("xs", array(vec![s("e0")]))),
        at(11, var("e", index(id("xs"), num(0.0)))),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert!(policy.has("write p L2:\"secret\""), "{:?}", policy.events);
    assert!(policy.has("write r L2:\"secret\""), "{:?}", policy.events);
    assert!(policy.has("write g L6:7"), "{:?}", policy.events);
    assert!(policy.has("write m L8:5"), "{:?}", policy.events);
    assert!(policy.has("write e L10:\"e0\""), "{:?}", policy.events);
}

#[test]
fn activations_balance_on_every_exit_path() {
    let program = program(vec![
        decl("ok", &[], vec![ret(num(1.0))]),
        decl("bad", &[], vec![throw(s("x"))]),
        decl("outer", &[], vec![expr(call(id("bad"), vec![]))]),
        decl(
            "nested",
            &[],
            vec![
                vars(&["t"]),
                try_(vec![ret(num(1.0))], None, Some(vec![assign("t", num(2.0))])),
            ],
        ),
        decl("P", &[], vec![set(this(), "a", num(1.0))]),
        vars(&["r", "xs"]),
        assign("r", call(id("ok"), vec![])),
        try_(vec![expr(call(id("bad"), vec![]))], Some(("e", vec![])), None),
        try_(vec![expr(call(id("outer"), vec![]))], Some(("e", vec![])), None),
        assign("r", call(id("nested"), vec![])),
        assign("xs", array(vec![num(1.0), num(2.0)])),
        assign("r", method(id("xs"), "map", vec![func(&["x"], vec![ret(id("x"))])])),
        assign("r", new("P", vec![])),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert_eq!(policy.enters, 8);
    assert_eq!(policy.leaves, 8);
    assert_eq!(policy.depth, 0);
    assert_eq!(policy.min_depth, 0);
}

#[test]
fn thrown_values_keep_their_tag_across_native_frames() {
    let program = program(vec![
        decl("thrower", &["x"], vec![at(2, throw(s("oops")))]),
        at(3, var("xs", array(vec![num(1.0)]))),
        at(4, try_(
            vec![expr(method(id("xs"), "forEach", vec![id("thrower")]))],
            Some(("e", vec![assign("caught", id("e"))])),
            None,
        )),
        at(5, var("n", null())),
        at(6, try_(
            vec![assign("r", get(id("n"), "x"))],
            Some(("e", vec![assign("caught2", id("e"))])),
            None,
        )),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert!(policy.has("write caught L2:\"oops\""), "{:?}", policy.events);
    assert!(policy.has("write caught2 native-exception"), "{:?}", policy.events);
    assert_eq!(policy.count("native exception"), 1);
}

#[test]
fn exception_tags_survive_nested_native_frames_and_rethrows() {
    let program = program(vec![
        decl("inner", &["x"], vec![at(2, throw(s("deep")))]),
        decl(
            "middle",
            &["x"],
            vec![
                var("ys", array(vec![num(1.0)])),
                expr(method(id("ys"), "forEach", vec![id("inner")])),
            ],
        ),
        decl(
            "relay",
            &["x"],
            vec![try_(
                vec![expr(call(id("middle"), vec![id("x")]))],
                Some(("e", vec![throw(id("e"))])),
                None,
            )],
        ),
        decl(
            "broken",
            &["x"],
            vec![var("n", null()), var("t", get(id("n"), "x"))],
        ),
        decl(
            "via",
            &["x"],
            vec![
                var("ys", array(vec![num(1.0)])),
                expr(method(id("ys"), "forEach", vec![id("broken")])),
            ],
        ),
        var("xs", array(vec![num(1.0)])),
        try_(
            vec![assign("r", method(id("xs"), "map", vec![id("relay")]))],
            Some(("e", vec![assign("caught", id("e"))])),
            None,
        ),
        try_(
            vec![try_(
                vec![assign("r", method(id("xs"), "map", vec![id("via")]))],
                Some(("e", vec![throw(id("e"))])),
                None,
            )],
            Some(("e2", vec![assign("caught2", id("e2"))])),
            None,
        ),
        var("name", get(id("caught2"), "name")),
        log(vec![id("name")]),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    assert_eq!(out.output, ["TypeError"]);
    let policy = runtime.policy();
    assert!(policy.has("write caught L2:\"deep\""), "{:?}", policy.events);
    assert!(policy.has("write caught2 native-exception"), "{:?}", policy.events);
    assert_eq!(policy.count("native exception"), 1, "{:?}", policy.events);
    assert_eq!(policy.enters, policy.leaves);
    assert_eq!(policy.depth, 0);
}

#[test]
fn computed_and_static_accesses_are_told_apart() {
    let program = program(vec![
        var("o", object(vec![("k", num(1.0))])),
        var("key", s("k")),
        var("a", get(id("o"), "k")),
        var("b", index(id("o"), id("key"))),
        set_index(id("o"), id("key"), num(2.0)),
        set(id("o"), "j", num(3.0)),
        expr(unary("delete", index(id("o"), id("key")))),
        expr(unary("delete", get(id("o"), "j"))),
        var("xs", array(vec![])),
        var("verb", s("push")),
        expr(call(index(id("xs"), id("verb")), vec![num(1.0)])),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    for event in [
        "read k static",
        "read k computed",
        "put k computed",
        "put j static",
        "delete k computed",
        "delete j static",
        "read push computed",
        "put a static",
    ] {
        assert!(policy.has(event), "{event}: {:?}", policy.events);
    }
    assert!(!policy.has("read push static"));
}

#[test]
fn policy_errors_bypass_catch_and_finally() {
    let program = program(vec![try_(
        vec![var("x", bin("+", num(1.0), num(2.0)))],
        Some(("e", vec![log(vec![s("caught")])])),
        Some(vec![log(vec![s("finally")])]),
    )]);
    let (out, runtime) = run_instrumented(&program, Recorder::failing());
    assert!(out.output.is_empty(), "{:?}", out.output);
    assert!(out.completion.starts_with("policy error"), "{}", out.completion);
    assert!(out.completion.contains("binop refused"));
    assert!(!runtime.policy().has("leave script"));
}

#[test]
fn missing_parameters_share_one_fill_tag() {
    let program = program(vec![
        decl(
            "f",
            &["a", "b", "c"],
            vec![assign("gb", id("b")), assign("gc", id("c"))],
        ),
        expr(call(id("f"), vec![num(1.0)])),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert_eq!(policy.count("absent from"), 1);
    assert!(policy.has("absent from 1"));
    assert!(policy.has("write gb absent"));
    assert!(policy.has("write gc absent"));
}

#[test]
fn call_and_apply_reach_the_policy_as_the_calls_they_perform() {
    let program = program(vec![
        decl("f", &["a", "b"], vec![]),
        var("o", object(vec![])),
        expr(method(id("f"), "call", vec![id("o"), num(1.0)])),
        var("list", array(vec![num(1.0), num(2.0)])),
        expr(method(id("f"), "apply", vec![id("o"), id("list")])),
        expr(call(id("f"), vec![num(3.0)])),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    let calls: Vec<&String> = policy.events.iter().filter(|e| e.contains(" call ")).collect();
    assert_eq!(calls.len(), 3, "{calls:?}");
    assert!(calls[0].starts_with("method call this=object"));
    assert!(calls[0].ends_with("args=[1]"));
    assert!(calls[1].ends_with("args=[1,2]"));
    assert_eq!(calls[2], "function call this=null args=[3]");
}

#[test]
fn arguments_object_carries_meta_tags() {
    let program = program(vec![
        decl(
            "f",
            &["a"],
            vec![
                assign("len", get(id("arguments"), "length")),
                assign("who", get(id("arguments"), "callee")),
                assign("first", index(id("arguments"), num(0.0))),
            ],
        ),
        at(9, expr(call(id("f"), vec![s("v")]))),
    ]);
    let (out, runtime) = run_instrumented(&program, Recorder::default());
    assert_eq!(out.completion, "normal");
    let policy = runtime.policy();
    assert!(policy.has("write len native:length"), "{:?}", policy.events);
    assert!(policy.has("write who callee"), "{:?}", policy.events);
    assert!(policy.has("write first L9:\"v\""), "{:?}", policy.events);
}

#[test]
fn trace_policy_is_deterministic() {
    let program = program(vec![
        at(1, var("a", num(1.0))),
        at(2, decl("f", &["x"], vec![at(3, ret(bin("+", id("x"), id("a"))))])),
        at(4, var("b", call(id("f"), vec![num(2.0)]))),
        at(5, log(vec![id("b")])),
    ]);
    let trace = || {
        let (_, runtime) = run_instrumented(&program, TracePolicy::new());
        let lines: Vec<String> = runtime.policy().lines().map(str::to_string).collect();
        lines
    };
    let first = trace();
    let second = trace();
    assert_eq!(first, second);
    assert!(first.contains(&"t.js@1:0: literal 1".to_string()), "{first:?}");
    assert!(first.iter().any(|l| l.ends_with("enter script")));
    assert!(first.iter().any(|l| l.ends_with("leave script")));
    assert!(first.contains(&"t.js@4:0: function call to t.js@2:0".to_string()), "{first:?}");
    assert!(first.contains(&"t.js@5:0: method call to console.log".to_string()), "{first:?}");
    assert!(first.iter().any(|l| l.contains("return 3 [from t.js@")));
    assert!(first.iter().any(|l| l.contains("native result undefined")));
}

fn position(engine: &mut tagflow_core::engine::Engine) -> Value {
    let id = engine.new_object();
    let [url, rest @ ..] = POSITION_FIELDS;
    engine.heap.define(id, url, Property::data(Value::str(URL)));
    for field in rest {
        engine.heap.define(id, field, Property::data(Value::Number(1.0)));
    }
    Value::Object(id)
}

#[test]
fn boundary_wrappers_are_idempotent() {
    let (mut engine, runtime) = engine_with_runtime(Recorder::default(), config()).expect("runtime");
    let rt = engine.global_get(RUNTIME_BINDING).expect("runtime binding");
    let pos = position(&mut engine);
    for name in [hooks::WRAP_LITERAL, hooks::WRAP_FOR_IN_VAR, hooks::WRAP_NATIVE_EXCEPTION] {
        let hook = engine.get(&rt, name).expect("hook");
        let once = engine
            .call_function(&hook, Value::Undefined, &[pos.clone(), Value::str("k")])
            .expect("first wrap");
        let twice = engine
            .call_function(&hook, Value::Undefined, &[pos.clone(), once.clone()])
            .expect("second wrap");
        match (&once, &twice) {
            (Value::Tagged(a), Value::Tagged(b)) => assert!(Rc::ptr_eq(a, b), "{name}"),
            other => panic!("{name} did not tag: {other:?}"),
        }
    }
    let unwrap = engine.get(&rt, hooks::UNWRAP).expect("unwrap");
    let raw = engine
        .call_function(&unwrap, Value::Undefined, &[Value::Number(4.0)])
        .expect("unwrap raw");
    assert!(matches!(raw, Value::Number(n) if n == 4.0));
    let tagged = Value::Tagged(TaggedValue::new(Value::Number(5.0), Some(Tag::new(1u8))));
    let raw = engine
        .call_function(&unwrap, Value::Undefined, &[tagged])
        .expect("unwrap tagged");
    assert!(matches!(raw, Value::Number(n) if n == 5.0));
    assert_eq!(runtime.policy().count("for-in"), 1);
    assert_eq!(runtime.policy().count("native exception"), 1);
}

#[test]
fn runtime_binding_exposes_every_hook() {
    let (mut engine, _) = engine_with_runtime(Recorder::default(), config()).expect("runtime");
    let rt = engine.global_get(RUNTIME_BINDING).expect("runtime binding");
    for name in hooks::ALL {
        let hook = engine.get(&rt, name).expect("read hook");
        let Value::Object(id) = hook else {
            panic!("{name} is not an object");
        };
        assert!(engine.heap.is_callable(id), "{name} is not callable");
    }
}

#[test]
fn global_hook_before_wrap_global_is_fatal() {
    let (mut engine, _) = engine_with_runtime(Recorder::default(), config()).expect("runtime");
    let rt = engine.global_get(RUNTIME_BINDING).expect("runtime binding");
    let hook = engine.get(&rt, hooks::GLOBAL).expect("global hook");
    let err = engine
        .call_function(&hook, Value::Undefined, &[])
        .expect_err("must fail");
    assert!(engine.describe_abrupt(&err).starts_with("fatal:"));
}
