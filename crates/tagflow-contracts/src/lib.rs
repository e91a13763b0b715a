//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings and
//! reserved names that appear in machine-readable I/O and in instrumented
//! program trees. Generated code and the shadow runtime agree on hook names only
//! through this crate.

pub const PROGRAM_SCHEMA_VERSION: &str = "tagflow.program@0.1.0";
pub const MANIFEST_SCHEMA_VERSION: &str = "tagflow.manifest@0.1.0";
pub const TRACE_REPORT_SCHEMA_VERSION: &str = "tagflow.trace.report@0.1.0";

pub const GENERATED_BY: &str = "tagflow";

/// Global binding under which the shadow runtime is installed.
pub const RUNTIME_BINDING: &str = "__rt";

/// Prefix reserved for names introduced by normalization and instrumentation.
pub const RESERVED_PREFIX: &str = "__";

/// Local holding the unified return value of a function.
pub const RETURN_VAR: &str = "__ret";

/// Label of the block that return-point unification breaks out of.
pub const RETURN_LABEL: &str = "__body";

pub const ARGUMENTS: &str = "arguments";

pub mod hooks {
    pub const WRAP_GLOBAL: &str = "wrapGlobal";
    pub const GLOBAL: &str = "global";
    pub const ENTER_SCRIPT: &str = "enterScript";
    pub const LEAVE_SCRIPT: &str = "leaveScript";
    pub const WRAP_LITERAL: &str = "wrapLiteral";
    pub const PROPREAD: &str = "propread";
    pub const PROPWRITE: &str = "propwrite";
    pub const PROPDEL: &str = "propdel";
    pub const GLOBALREAD: &str = "globalread";
    pub const FUNCALL: &str = "funcall";
    pub const METHCALL: &str = "methcall";
    pub const NEWEXPR: &str = "newexpr";
    pub const UNOP: &str = "unop";
    pub const BINOP: &str = "binop";
    pub const WRAP_FOR_IN_VAR: &str = "wrapForInVar";
    pub const WRAP_NATIVE_EXCEPTION: &str = "wrapNativeException";
    pub const UNWRAP: &str = "unwrap";
    pub const IS_NATIVE_CALL: &str = "isNativeCall";
    pub const CALL_WRAPPED: &str = "callWrapped";
    pub const PREPARE_ARGUMENTS: &str = "prepareArguments";
    pub const ENTER_FUNCTION: &str = "enterFunction";
    pub const RETURN_FROM_FUNCTION: &str = "returnFromFunction";
    pub const LEAVE_FUNCTION: &str = "leaveFunction";

    pub const ALL: &[&str] = &[
        WRAP_GLOBAL,
        GLOBAL,
        ENTER_SCRIPT,
        LEAVE_SCRIPT,
        WRAP_LITERAL,
        PROPREAD,
        PROPWRITE,
        PROPDEL,
        GLOBALREAD,
        FUNCALL,
        METHCALL,
        NEWEXPR,
        UNOP,
        BINOP,
        WRAP_FOR_IN_VAR,
        WRAP_NATIVE_EXCEPTION,
        UNWRAP,
        IS_NATIVE_CALL,
        CALL_WRAPPED,
        PREPARE_ARGUMENTS,
        ENTER_FUNCTION,
        RETURN_FROM_FUNCTION,
        LEAVE_FUNCTION,
    ];
}

/// Call kinds passed to `funcall` as a string literal.
pub mod call_kind {
    pub const FUNCTION: &str = "function";
    pub const METHOD: &str = "method";
}

/// Field names of a position record, in emission order.
pub const POSITION_FIELDS: [&str; 5] = ["url", "start_line", "start_offset", "end_line", "end_offset"];
