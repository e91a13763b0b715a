use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Parse,
    Normalize,
    Instrument,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticCode {
    TFI0001ParseError,
    TFI0002SchemaMismatch,
    TFI0110UnsupportedExpression,
    TFI0120UnsupportedAssignTarget,
    TFI0130UnsupportedOperand,
    TFI0140UnsupportedCallee,
    TFI0150UnsupportedDelete,
    TFI0200ArgumentsRedeclared,
    TFI0201ArgumentsAssigned,
    TFI0210ReservedName,
    TFI0300ReturnOutsideFunction,
    TFI0901InternalBug,
}

impl DiagnosticCode {
    pub fn code_str(self) -> &'static str {
        match self {
            DiagnosticCode::TFI0001ParseError => "TFI0001",
            DiagnosticCode::TFI0002SchemaMismatch => "TFI0002",
            DiagnosticCode::TFI0110UnsupportedExpression => "TFI0110",
            DiagnosticCode::TFI0120UnsupportedAssignTarget => "TFI0120",
            DiagnosticCode::TFI0130UnsupportedOperand => "TFI0130",
            DiagnosticCode::TFI0140UnsupportedCallee => "TFI0140",
            DiagnosticCode::TFI0150UnsupportedDelete => "TFI0150",
            DiagnosticCode::TFI0200ArgumentsRedeclared => "TFI0200",
            DiagnosticCode::TFI0201ArgumentsAssigned => "TFI0201",
            DiagnosticCode::TFI0210ReservedName => "TFI0210",
            DiagnosticCode::TFI0300ReturnOutsideFunction => "TFI0300",
            DiagnosticCode::TFI0901InternalBug => "TFI0901",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            DiagnosticCode::TFI0001ParseError => "failed to decode program tree",
            DiagnosticCode::TFI0002SchemaMismatch => "program tree schema version mismatch",
            DiagnosticCode::TFI0110UnsupportedExpression => "unsupported expression shape",
            DiagnosticCode::TFI0120UnsupportedAssignTarget => "unsupported assignment target",
            DiagnosticCode::TFI0130UnsupportedOperand => "operand is not an identifier, literal or this",
            DiagnosticCode::TFI0140UnsupportedCallee => "unsupported call target",
            DiagnosticCode::TFI0150UnsupportedDelete => "delete of a variable is not supported",
            DiagnosticCode::TFI0200ArgumentsRedeclared => "function re-declares the arguments binding",
            DiagnosticCode::TFI0201ArgumentsAssigned => "assignment to arguments is not supported",
            DiagnosticCode::TFI0210ReservedName => "name is reserved for instrumentation",
            DiagnosticCode::TFI0300ReturnOutsideFunction => "return outside of a function body",
            DiagnosticCode::TFI0901InternalBug => "internal tagflow bug",
        }
    }

    pub fn default_help(self) -> Option<&'static str> {
        match self {
            DiagnosticCode::TFI0001ParseError => Some(
                "The input must be an ESTree-shaped JSON program tree produced by the front end.",
            ),
            DiagnosticCode::TFI0110UnsupportedExpression | DiagnosticCode::TFI0130UnsupportedOperand => {
                Some("Run the normalizer first: every operand must be a variable, literal or this.")
            }
            DiagnosticCode::TFI0200ArgumentsRedeclared => {
                Some("Rename the parameter or local variable called `arguments`.")
            }
            DiagnosticCode::TFI0901InternalBug => {
                Some("This is a bug in tagflow. Please report it with the input program tree.")
            }
            _ => None,
        }
    }

    fn phase(self) -> Phase {
        match self {
            DiagnosticCode::TFI0001ParseError | DiagnosticCode::TFI0002SchemaMismatch => Phase::Parse,
            DiagnosticCode::TFI0300ReturnOutsideFunction => Phase::Normalize,
            DiagnosticCode::TFI0901InternalBug => Phase::Internal,
            _ => Phase::Instrument,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub phase: Phase,
    pub severity: Severity,
    pub message: String,
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, phase: Phase, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            phase,
            severity: Severity::Error,
            message: message.into(),
            help: code.default_help().map(|s| s.to_string()),
            span: None,
        }
    }

    pub fn unsupported(code: DiagnosticCode, span: Span, message: impl Into<String>) -> Self {
        let mut diag = Diagnostic::error(code, code.phase(), message);
        diag.span = Some(span);
        diag
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {:?}: {}",
            self.code.code_str(),
            self.phase,
            self.severity,
            self.message
        )?;
        if let Some(span) = &self.span {
            write!(f, " (at {}:{})", span.start_line, span.start_offset)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Recovers the diagnostic carried by an instrumentation error, if any.
pub fn find_diagnostic(err: &anyhow::Error) -> Option<&Diagnostic> {
    err.chain().find_map(|cause| cause.downcast_ref::<Diagnostic>())
}

pub fn render_diagnostics_md() -> String {
    let mut rows: Vec<(String, Phase, Severity, String, String)> = Vec::new();
    for code in all_codes() {
        rows.push((
            code.code_str().to_string(),
            code.phase(),
            Severity::Error,
            code.default_message().to_string(),
            code.default_help().unwrap_or("").to_string(),
        ));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    out.push_str("# tagflow diagnostics catalog\n\n");
    out.push_str("This document is generated from `crates/tagflow-core/src/diagnostics.rs`.\n\n");
    out.push_str("| Code | Phase | Severity | Message | Help |\n");
    out.push_str("| ---- | ----- | -------- | ------- | ---- |\n");
    for (code, phase, sev, msg, help) in rows {
        out.push_str(&format!(
            "| {code} | {phase:?} | {sev:?} | {msg} | {help} |\n"
        ));
    }
    out
}

fn all_codes() -> &'static [DiagnosticCode] {
    &[
        DiagnosticCode::TFI0001ParseError,
        DiagnosticCode::TFI0002SchemaMismatch,
        DiagnosticCode::TFI0110UnsupportedExpression,
        DiagnosticCode::TFI0120UnsupportedAssignTarget,
        DiagnosticCode::TFI0130UnsupportedOperand,
        DiagnosticCode::TFI0140UnsupportedCallee,
        DiagnosticCode::TFI0150UnsupportedDelete,
        DiagnosticCode::TFI0200ArgumentsRedeclared,
        DiagnosticCode::TFI0201ArgumentsAssigned,
        DiagnosticCode::TFI0210ReservedName,
        DiagnosticCode::TFI0300ReturnOutsideFunction,
        DiagnosticCode::TFI0901InternalBug,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_every_code_once() {
        let md = render_diagnostics_md();
        for code in all_codes() {
            assert_eq!(md.matches(code.code_str()).count(), 1, "{}", code.code_str());
        }
    }

    #[test]
    fn diagnostic_survives_anyhow_context() {
        let diag = Diagnostic::unsupported(
            DiagnosticCode::TFI0200ArgumentsRedeclared,
            Span::default(),
            "param `arguments`",
        );
        let err = anyhow::Error::new(diag).context("instrument program");
        let found = find_diagnostic(&err).expect("diagnostic in chain");
        assert_eq!(found.code, DiagnosticCode::TFI0200ArgumentsRedeclared);
        assert_eq!(found.phase, Phase::Instrument);
    }
}
