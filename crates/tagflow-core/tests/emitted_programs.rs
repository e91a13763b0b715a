mod common;

use std::io::Write;

use common::*;
use tagflow_core::emit::{emit_program, parse_program_json, SourceInfo};
use tagflow_core::policy::InertPolicy;
use tagflow_core::runtime::engine_with_runtime;

#[test]
fn instrumented_program_survives_a_file_round_trip() {
    let original = program(vec![
        decl(
            "greet",
            &["name"],
            vec![vars(&["r"]), assign("r", bin("+", s("hi "), id("name"))), ret(id("r"))],
        ),
        vars(&["g"]),
        assign("g", call(id("greet"), vec![s("there")])),
        log(vec![id("g")]),
    ]);
    let instrumented = instrument(&original);
    let text = emit_program(
        &instrumented,
        &SourceInfo {
            url: Some(URL),
            bytes: None,
        },
    )
    .expect("emit");

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write");
    let bytes = std::fs::read(file.path()).expect("read back");
    let reloaded = parse_program_json(&bytes).expect("parse emitted program");
    assert_eq!(reloaded, instrumented);

    let (mut engine, _) = engine_with_runtime(InertPolicy, config()).expect("runtime");
    engine.run_program(&reloaded).expect("run reloaded program");
    assert_eq!(engine.output, ["hi there"]);
    assert_eq!(engine.output, run_plain(&original).output);
}

#[test]
fn instrumentation_is_deterministic() {
    let original = program(vec![
        var("o", object(vec![("a", num(1.0))])),
        for_in("k", true, id("o"), vec![log(vec![id("k")])]),
    ]);
    let first = emit_program(&instrument(&original), &SourceInfo::default()).expect("emit");
    let second = emit_program(&instrument(&original), &SourceInfo::default()).expect("emit");
    assert_eq!(first, second);
}
