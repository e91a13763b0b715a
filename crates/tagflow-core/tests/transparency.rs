mod common;

use common::*;
use tagflow_core::policy::InertPolicy;

/// Runs `body` plain and instrumented under the inert policy; both runs must
/// print the same lines and complete the same way.
fn assert_transparent(body: Vec<serde_json::Value>) -> Outcome {
    let program = program(body);
    let plain = run_plain(&program);
    let (instrumented, _) = run_instrumented(&program, InertPolicy);
    assert_eq!(plain, instrumented);
    plain
}

#[test]
fn arithmetic_strings_and_operators() {
    let out = assert_transparent(vec![
        var("a", num(6.0)),
        var("b", num(7.0)),
        vars(&["c", "t", "u", "w", "l", "up", "n"]),
        assign("c", bin("*", id("a"), id("b"))),
        log(vec![id("c")]),
        assign("t", bin("+", s("x"), id("c"))),
        log(vec![id("t")]),
        assign("u", unary("typeof", id("missingName"))),
        log(vec![id("u")]),
        assign("w", bin(">", id("a"), id("b"))),
        assign("w", cond(id("w"), id("a"), id("b"))),
        log(vec![id("w")]),
        assign("l", logical("&&", id("a"), id("b"))),
        log(vec![id("l")]),
        assign("l", logical("||", num(0.0), s("fallback"))),
        log(vec![id("l")]),
        assign("up", method(id("t"), "toUpperCase", vec![])),
        assign("n", get(id("t"), "length")),
        log(vec![id("up"), id("n")]),
        assign("n", unary("-", id("n"))),
        assign("l", unary("!", id("n"))),
        log(vec![id("n"), id("l")]),
    ]);
    assert_eq!(
        out.output,
        ["42", "x42", "undefined", "7", "7", "fallback", "X42 3", "-3 false"]
    );
    assert_eq!(out.completion, "normal");
}

#[test]
fn recursion_through_declared_functions() {
    let out = assert_transparent(vec![
        decl(
            "fact",
            &["n"],
            vec![
                vars(&["c", "m", "r"]),
                assign("c", bin("<=", id("n"), num(1.0))),
                if_(id("c"), vec![ret(num(1.0))], None),
                assign("m", bin("-", id("n"), num(1.0))),
                assign("r", call(id("fact"), vec![id("m")])),
                assign("r", bin("*", id("n"), id("r"))),
                ret(id("r")),
            ],
        ),
        vars(&["v"]),
        assign("v", call(id("fact"), vec![num(5.0)])),
        log(vec![id("v")]),
    ]);
    assert_eq!(out.output, ["120"]);
}

#[test]
fn constructors_prototypes_and_methods() {
    let out = assert_transparent(vec![
        decl(
            "Point",
            &["x", "y"],
            vec![set(this(), "x", id("x")), set(this(), "y", id("y"))],
        ),
        vars(&["proto", "p", "d", "k"]),
        assign("proto", get(id("Point"), "prototype")),
        set(
            id("proto"),
            "sum",
            func(
                &[],
                vec![
                    vars(&["r", "y"]),
                    assign("r", get(this(), "x")),
                    assign("y", get(this(), "y")),
                    assign("r", bin("+", id("r"), id("y"))),
                    ret(id("r")),
                ],
            ),
        ),
        assign("p", new("Point", vec![num(2.0), num(3.0)])),
        assign("d", method(id("p"), "sum", vec![])),
        log(vec![id("d")]),
        assign("k", bin("instanceof", id("p"), id("Point"))),
        log(vec![id("k")]),
        assign("k", get(id("p"), "constructor")),
        assign("k", bin("===", id("k"), id("Point"))),
        log(vec![id("k")]),
        assign("d", new("Array", vec![num(3.0)])),
        assign("d", get(id("d"), "length")),
        log(vec![id("d")]),
    ]);
    assert_eq!(out.output, ["5", "true", "true", "3"]);
}

#[test]
fn exceptions_from_natives_and_programs() {
    let out = assert_transparent(vec![
        var("n", null()),
        vars(&["r", "m"]),
        try_(
            vec![assign("r", get(id("n"), "x"))],
            Some(("e", vec![assign("m", get(id("e"), "message")), log(vec![id("m")])])),
            Some(vec![log(vec![s("finally 1")])]),
        ),
        decl("boom", &[], vec![throw(s("boom"))]),
        try_(
            vec![expr(call(id("boom"), vec![]))],
            Some(("e", vec![log(vec![s("caught"), id("e")])])),
            None,
        ),
        try_(
            vec![assign("r", call(id("n"), vec![]))],
            Some(("e", vec![assign("m", get(id("e"), "name")), log(vec![id("m")])])),
            None,
        ),
        try_(
            vec![assign("r", id("notDeclared"))],
            Some(("e", vec![assign("m", get(id("e"), "name")), log(vec![id("m")])])),
            None,
        ),
    ]);
    assert_eq!(out.output.len(), 5);
    assert_eq!(out.output[1], "finally 1");
    assert_eq!(out.output[2], "caught boom");
    assert_eq!(out.output[3], "TypeError");
    assert_eq!(out.output[4], "ReferenceError");
}

#[test]
fn callbacks_invoked_by_natives() {
    let out = assert_transparent(vec![
        var("xs", array(vec![num(1.0), num(2.0), num(3.0)])),
        vars(&["ys", "sum", "odd", "text"]),
        assign(
            "ys",
            method(
                id("xs"),
                "map",
                vec![func(&["x"], vec![vars(&["d"]), assign("d", bin("*", id("x"), num(2.0))), ret(id("d"))])],
            ),
        ),
        assign("text", method(id("ys"), "join", vec![s(",")])),
        log(vec![id("text")]),
        assign("sum", num(0.0)),
        expr(method(
            id("xs"),
            "forEach",
            vec![func(&["x", "i"], vec![assign("sum", bin("+", id("sum"), id("x")))])],
        )),
        log(vec![id("sum")]),
        assign(
            "odd",
            method(
                id("xs"),
                "filter",
                vec![func(&["x"], vec![vars(&["r"]), assign("r", bin("%", id("x"), num(2.0))), ret(id("r"))])],
            ),
        ),
        assign("text", method(id("odd"), "join", vec![s("-")])),
        log(vec![id("text")]),
    ]);
    assert_eq!(out.output, ["2,4,6", "6", "1-3"]);
}

#[test]
fn call_and_apply() {
    let out = assert_transparent(vec![
        decl(
            "describe",
            &["a", "b"],
            vec![
                vars(&["r"]),
                assign("r", get(this(), "name")),
                assign("r", bin("+", id("r"), id("a"))),
                assign("r", bin("+", id("r"), id("b"))),
                ret(id("r")),
            ],
        ),
        var("o", object(vec![("name", s("o:"))])),
        vars(&["r", "list"]),
        assign("r", method(id("describe"), "call", vec![id("o"), num(1.0), num(2.0)])),
        log(vec![id("r")]),
        assign("list", array(vec![s("x"), s("y")])),
        assign("r", method(id("describe"), "apply", vec![id("o"), id("list")])),
        log(vec![id("r")]),
        assign("list", array(vec![num(4.0), num(9.0)])),
        assign("r", get(id("Math"), "max")),
        assign("r", method(id("r"), "apply", vec![null(), id("list")])),
        log(vec![id("r")]),
    ]);
    assert_eq!(out.output, ["o:12", "o:xy", "9"]);
}

#[test]
fn accessors_on_literals() {
    let out = assert_transparent(vec![
        var(
            "o",
            accessor_object(
                "v",
                func(
                    &[],
                    vec![
                        vars(&["r"]),
                        assign("r", get(this(), "raw")),
                        assign("r", bin("*", id("r"), num(10.0))),
                        ret(id("r")),
                    ],
                ),
                func(&["x"], vec![set(this(), "raw", id("x"))]),
            ),
        ),
        set(id("o"), "raw", num(1.0)),
        vars(&["r"]),
        assign("r", get(id("o"), "v")),
        log(vec![id("r")]),
        set(id("o"), "v", num(4.0)),
        assign("r", get(id("o"), "v")),
        log(vec![id("r")]),
    ]);
    assert_eq!(out.output, ["10", "40"]);
}

#[test]
fn loops_labels_and_for_in() {
    let out = assert_transparent(vec![
        var("o", object(vec![("a", num(1.0)), ("b", num(2.0)), ("c", num(3.0))])),
        vars(&["keys", "i", "c", "v"]),
        assign("keys", s("")),
        for_in(
            "k",
            true,
            id("o"),
            vec![
                assign("c", bin("===", id("k"), s("b"))),
                if_(id("c"), vec![continue_()], None),
                assign("keys", bin("+", id("keys"), id("k"))),
            ],
        ),
        log(vec![id("keys")]),
        assign("i", num(0.0)),
        labeled(
            "outer",
            while_(
                boolean(true),
                vec![
                    assign("i", bin("+", id("i"), num(1.0))),
                    assign("c", bin(">", id("i"), num(4.0))),
                    if_(id("c"), vec![break_(Some("outer"))], None),
                ],
            ),
        ),
        log(vec![id("i")]),
        set(id("o"), "d", num(4.0)),
        assign("v", unary("delete", get(id("o"), "a"))),
        assign("c", bin("in", s("a"), id("o"))),
        log(vec![id("v"), id("c")]),
        assign("v", get(id("Object"), "keys")),
        assign("v", method(id("v"), "call", vec![null(), id("o")])),
        assign("v", method(id("v"), "join", vec![s("")])),
        log(vec![id("v")]),
    ]);
    assert_eq!(out.output, ["ac", "5", "true false", "bcd"]);
}

#[test]
fn arguments_and_missing_parameters() {
    let out = assert_transparent(vec![
        decl(
            "f",
            &["a", "b"],
            vec![
                vars(&["n", "first", "t"]),
                assign("n", get(id("arguments"), "length")),
                assign("first", index(id("arguments"), num(0.0))),
                assign("t", unary("typeof", id("b"))),
                log(vec![id("n"), id("first"), id("t")]),
                ret(id("a")),
            ],
        ),
        expr(call(id("f"), vec![s("one")])),
        expr(call(id("f"), vec![s("x"), s("y"), s("z")])),
    ]);
    assert_eq!(out.output, ["1 one undefined", "3 x string"]);
}

#[test]
fn closures_and_self_named_functions() {
    let out = assert_transparent(vec![
        decl(
            "counter",
            &[],
            vec![
                var("count", num(0.0)),
                ret(func(
                    &[],
                    vec![assign("count", bin("+", id("count"), num(1.0))), ret(id("count"))],
                )),
            ],
        ),
        vars(&["next", "r", "fib"]),
        assign("next", call(id("counter"), vec![])),
        expr(call(id("next"), vec![])),
        assign("r", call(id("next"), vec![])),
        log(vec![id("r")]),
        assign(
            "fib",
            named_func(
                "go",
                &["n"],
                vec![
                    vars(&["c", "a", "b"]),
                    assign("c", bin("<", id("n"), num(2.0))),
                    if_(id("c"), vec![ret(id("n"))], None),
                    assign("a", bin("-", id("n"), num(1.0))),
                    assign("a", call(id("go"), vec![id("a")])),
                    assign("b", bin("-", id("n"), num(2.0))),
                    assign("b", call(id("go"), vec![id("b")])),
                    assign("a", bin("+", id("a"), id("b"))),
                    ret(id("a")),
                ],
            ),
        ),
        assign("r", call(id("fib"), vec![num(10.0)])),
        log(vec![id("r")]),
        assign("r", call(func(&["x"], vec![ret(bin("*", id("x"), id("x")))]), vec![num(7.0)])),
        log(vec![id("r")]),
    ]);
    assert_eq!(out.output, ["2", "55", "49"]);
}

#[test]
fn uncaught_exception_describes_identically() {
    let out = assert_transparent(vec![
        log(vec![s("before")]),
        throw(s("boom")),
        log(vec![s("after")]),
    ]);
    assert_eq!(out.output, ["before"]);
    assert_eq!(out.completion, "throw 'boom'");
}

#[test]
fn runaway_recursion_raises_range_error() {
    let out = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            assert_transparent(vec![
                decl("down", &[], vec![expr(call(id("down"), vec![]))]),
                vars(&["m"]),
                try_(
                    vec![expr(call(id("down"), vec![]))],
                    Some(("e", vec![assign("m", get(id("e"), "name")), log(vec![id("m")])])),
                    None,
                ),
            ])
        })
        .expect("spawn")
        .join()
        .expect("join");
    assert_eq!(out.output, ["RangeError"]);
}

#[test]
fn returns_are_transparent_without_unification() {
    let program = program(vec![
        decl(
            "sign",
            &["n"],
            vec![
                vars(&["c"]),
                assign("c", bin("<", id("n"), num(0.0))),
                if_(id("c"), vec![ret(s("neg"))], None),
                ret(s("pos")),
            ],
        ),
        vars(&["r"]),
        assign("r", call(id("sign"), vec![num(-1.0)])),
        log(vec![id("r")]),
        assign("r", call(id("sign"), vec![num(1.0)])),
        log(vec![id("r")]),
    ]);
    let options = tagflow_core::config::InstrumentOptions {
        url: URL.to_string(),
        unify_returns: false,
    };
    let instrumented =
        tagflow_core::instrument::instrument_program(&program, &options).expect("instrument");
    let (mut engine, _) =
        tagflow_core::runtime::engine_with_runtime(InertPolicy, config()).expect("runtime");
    engine.run_program(&instrumented).expect("run");
    assert_eq!(engine.output, run_plain(&program).output);
    assert_eq!(engine.output, ["neg", "pos"]);
}
