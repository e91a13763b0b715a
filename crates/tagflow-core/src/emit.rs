use anyhow::{Context, Result};
use serde_json::Value;
use tagflow_contracts::{GENERATED_BY, PROGRAM_SCHEMA_VERSION};

use crate::ast::Program;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};
use crate::util::sha256_hex;

/// Where an emitted program came from, recorded under `meta`.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo<'a> {
    pub url: Option<&'a str>,
    pub bytes: Option<&'a [u8]>,
}

pub fn emit_program(program: &Program, source: &SourceInfo<'_>) -> Result<String> {
    let v = emit_program_value(program, source)?;
    Ok(serde_json::to_string(&v)? + "\n")
}

pub fn emit_program_value(program: &Program, source: &SourceInfo<'_>) -> Result<Value> {
    let mut root = serde_json::Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::String(PROGRAM_SCHEMA_VERSION.to_string()),
    );
    root.insert("kind".to_string(), Value::String("program".to_string()));
    root.insert(
        "body".to_string(),
        serde_json::to_value(&program.body).context("serialize program body")?,
    );
    root.insert(
        "span".to_string(),
        serde_json::to_value(program.span).context("serialize program span")?,
    );

    let mut meta = serde_json::Map::new();
    meta.insert(
        "generated_by".to_string(),
        Value::String(GENERATED_BY.to_string()),
    );
    if let Some(url) = source.url {
        meta.insert("source_url".to_string(), Value::String(url.to_string()));
    }
    if let Some(bytes) = source.bytes {
        meta.insert("source_sha256".to_string(), Value::String(sha256_hex(bytes)));
    }
    root.insert("meta".to_string(), Value::Object(meta));

    Ok(Value::Object(root))
}

/// Decodes a program tree. Documents that carry a `schema_version` must match
/// the current program schema; bare front-end trees are accepted as-is.
pub fn parse_program_json(bytes: &[u8]) -> Result<Program> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|err| {
        Diagnostic::error(
            DiagnosticCode::TFI0001ParseError,
            Phase::Parse,
            format!("invalid JSON: {err}"),
        )
    })?;
    parse_program_value(doc)
}

pub fn parse_program_value(doc: Value) -> Result<Program> {
    if let Some(v) = doc.get("schema_version") {
        let got = v.as_str().unwrap_or_default();
        if got.trim() != PROGRAM_SCHEMA_VERSION {
            return Err(Diagnostic::error(
                DiagnosticCode::TFI0002SchemaMismatch,
                Phase::Parse,
                format!("expected {PROGRAM_SCHEMA_VERSION} got {v}"),
            )
            .into());
        }
    }
    let program: Program = serde_json::from_value(doc).map_err(|err| {
        Diagnostic::error(
            DiagnosticCode::TFI0001ParseError,
            Phase::Parse,
            format!("{}: {err}", DiagnosticCode::TFI0001ParseError.default_message()),
        )
    })?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::find_diagnostic;
    use serde_json::json;

    fn sample() -> Program {
        serde_json::from_value(json!({
            "type": "Program",
            "body": [
                {"type": "VariableDeclaration", "declarations": [
                    {"id": "x", "init": {"type": "Literal", "value": 1.0}}
                ]}
            ]
        }))
        .expect("decode sample")
    }

    #[test]
    fn emitted_program_reparses() {
        let src = br#"{"body": []}"#;
        let out = emit_program(
            &sample(),
            &SourceInfo {
                url: Some("a.js"),
                bytes: Some(src),
            },
        )
        .expect("emit");
        assert!(out.ends_with('\n'));
        let v: Value = serde_json::from_str(&out).expect("json");
        assert_eq!(v["meta"]["generated_by"], "tagflow");
        assert_eq!(v["meta"]["source_url"], "a.js");
        assert_eq!(v["meta"]["source_sha256"].as_str().map(str::len), Some(64));
        let back = parse_program_json(out.as_bytes()).expect("reparse");
        assert_eq!(back, sample());
    }

    #[test]
    fn schema_mismatch_is_reported() {
        let err = parse_program_json(br#"{"schema_version": "tagflow.program@9", "body": []}"#)
            .expect_err("must reject");
        let diag = find_diagnostic(&err).expect("diagnostic");
        assert_eq!(diag.code, DiagnosticCode::TFI0002SchemaMismatch);
    }

    #[test]
    fn malformed_tree_is_a_parse_error() {
        let err = parse_program_json(br#"{"body": [{"type": "WithStatement"}]}"#)
            .expect_err("must reject");
        let diag = find_diagnostic(&err).expect("diagnostic");
        assert_eq!(diag.code, DiagnosticCode::TFI0001ParseError);
    }
}
