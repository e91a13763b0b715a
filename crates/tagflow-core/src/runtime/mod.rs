//! Shadow runtime: the hook implementations instrumented programs call through
//! the reserved `__rt` global.
//!
//! Every value that flows between instrumented code is a [`TaggedValue`].
//! Objects keep raw property values; the tags of their properties live in a
//! [`ShadowTable`] attached to the object the first time the runtime observes
//! it. Tags themselves are computed by a [`Policy`].

mod hooks;
mod install;
mod native_paths;
pub mod shadow;
mod tagged;

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use anyhow::anyhow;
use tagflow_contracts::{call_kind, POSITION_FIELDS};

use crate::ast::{BinaryOp, LogicalOp, Span};
use crate::engine::{Abrupt, Completion, Engine, ObjectId, Slot, Value};
use crate::policy::Policy;

pub use install::engine_with_runtime;
pub use native_paths::NativePaths;
pub use shadow::ShadowTable;
pub use tagged::{Tag, TaggedValue};

/// Source position of a hook call site, decoded from the position record the
/// instrumentor emits as the first hook argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub url: Rc<str>,
    pub span: Span,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.url, self.span.start_line, self.span.start_offset
        )
    }
}

impl Position {
    fn from_value(engine: &Engine, v: &Value) -> Completion<Position> {
        let Value::Object(id) = v.untagged() else {
            return Err(fatal(format!(
                "expected a position record, got {}",
                engine.inspect(v)
            )));
        };
        let [url, start_line, start_offset, end_line, end_offset] = POSITION_FIELDS;
        let url = match own_data(engine, id, url) {
            Some(Value::Str(s)) => s,
            _ => return Err(fatal("position record without a url")),
        };
        let number = |name: &str| -> Completion<u32> {
            match own_data(engine, id, name) {
                Some(Value::Number(n)) if n >= 0.0 => Ok(n as u32),
                _ => Err(fatal(format!("position record without `{name}`"))),
            }
        };
        Ok(Position {
            url,
            span: Span {
                start_line: number(start_line)?,
                start_offset: number(start_offset)?,
                end_line: number(end_line)?,
                end_offset: number(end_offset)?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Function,
    Method,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Function => call_kind::FUNCTION,
            CallKind::Method => call_kind::METHOD,
        }
    }

    fn from_value(v: &Value) -> Completion<CallKind> {
        match v {
            Value::Str(s) if &**s == call_kind::FUNCTION => Ok(CallKind::Function),
            Value::Str(s) if &**s == call_kind::METHOD => Ok(CallKind::Method),
            other => Err(fatal(format!("unknown call kind {other:?}"))),
        }
    }
}

/// Where a value handed over by native code sits in the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSlot {
    Receiver,
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Binary(op) => op.as_str(),
            Operator::Logical(op) => op.as_str(),
        }
    }

    fn from_value(v: &Value) -> Completion<Operator> {
        let Value::Str(sym) = v else {
            return Err(fatal(format!("operator must be a string, got {v:?}")));
        };
        if let Some(op) = BinaryOp::from_symbol(sym) {
            return Ok(Operator::Binary(op));
        }
        LogicalOp::from_symbol(sym)
            .map(Operator::Logical)
            .ok_or_else(|| fatal(format!("unknown binary operator `{sym}`")))
    }
}

/// Native `Function.prototype.call` and `apply`, captured at installation.
#[derive(Debug, Clone, Copy)]
struct NativeIds {
    call: ObjectId,
    apply: ObjectId,
}

pub struct ShadowRuntime<P: Policy> {
    policy: RefCell<P>,
    global: RefCell<Option<Rc<TaggedValue>>>,
    natives: Cell<Option<NativeIds>>,
}

impl<P: Policy> ShadowRuntime<P> {
    pub fn new(policy: P) -> Rc<Self> {
        Rc::new(ShadowRuntime {
            policy: RefCell::new(policy),
            global: RefCell::new(None),
            natives: Cell::new(None),
        })
    }

    pub fn policy(&self) -> Ref<'_, P> {
        self.policy.borrow()
    }

    /// The tagged global object, once `wrapGlobal` has run.
    pub fn tagged_global(&self) -> Option<Rc<TaggedValue>> {
        self.global.borrow().clone()
    }

    /// Runs one policy hook. The borrow ends before control returns to the
    /// engine, so hooks never observe each other.
    fn with_policy<T>(&self, f: impl FnOnce(&mut P) -> anyhow::Result<T>) -> Completion<T> {
        let mut policy = self
            .policy
            .try_borrow_mut()
            .map_err(|_| fatal("policy re-entered while one of its hooks is running"))?;
        f(&mut policy).map_err(Abrupt::Policy)
    }
}

fn fatal(message: impl Into<String>) -> Abrupt {
    Abrupt::Fatal(anyhow!(message.into()))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn own_data(engine: &Engine, id: ObjectId, key: &str) -> Option<Value> {
    match engine.heap.get_own(id, key).map(|p| &p.slot) {
        Some(Slot::Data { value, .. }) => Some(value.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_renders_url_line_offset() {
        let pos = Position {
            url: Rc::from("a.js"),
            span: Span {
                start_line: 3,
                start_offset: 7,
                end_line: 3,
                end_offset: 12,
            },
        };
        assert_eq!(pos.to_string(), "a.js@3:7");
    }

    #[test]
    fn operators_resolve_binary_before_logical() {
        assert_eq!(
            Operator::from_value(&Value::str("+")).ok(),
            Some(Operator::Binary(BinaryOp::Add))
        );
        assert_eq!(
            Operator::from_value(&Value::str("||")).ok(),
            Some(Operator::Logical(LogicalOp::Or))
        );
        assert!(matches!(
            Operator::from_value(&Value::str("??")),
            Err(Abrupt::Fatal(_))
        ));
        assert!(matches!(
            CallKind::from_value(&Value::str("method")),
            Ok(CallKind::Method)
        ));
    }
}
