//! Policy contract: the pluggable supplier of tags.
//!
//! The shadow runtime calls exactly one tag hook per tag-affecting operation
//! and a notification hook around calls, constructions and activations. Every
//! method has an inert default, so a policy overrides only what it cares about.
//! Errors returned by a hook abort the running program; the subject program
//! cannot catch them.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::Result;
use indexmap::IndexSet;
use log::trace;

use crate::ast::UnaryOp;
use crate::engine::{array_index, number_to_string, ObjectId, Value};
use crate::runtime::{ArgumentSlot, CallKind, NativePaths, Operator, Position, Tag, TaggedValue};

pub trait Policy {
    fn tag_global(&mut self, _pos: &Position, _global: &Value) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_literal(&mut self, _pos: &Position, _value: &Value) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// Tag of the `prototype` object created with a function literal.
    fn tag_default_prototype(
        &mut self,
        _pos: &Position,
        _function: &Value,
        _prototype: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_for_in_var(&mut self, _pos: &Position, _key: &Value) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// Exception caught without a tag (raised by a built-in or the host).
    fn tag_native_exception(&mut self, _pos: &Position, _exception: &Value) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// Receiver or argument handed to an instrumented function by native code.
    fn tag_native_argument(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        _slot: ArgumentSlot,
        _value: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// Fill for formal parameters beyond the passed arguments. `index` is the
    /// first missing position.
    fn tag_absent_argument(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        _index: usize,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_native_result(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        _result: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// Property that has no recorded tag on its holder.
    fn tag_native_property(
        &mut self,
        _pos: &Position,
        _holder: &Value,
        _key: &str,
        _value: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_callee(&mut self, _pos: &Position, _callee: &Value) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_new_instance(
        &mut self,
        _pos: &Position,
        _constructor: &TaggedValue,
        _instance: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_new_native_instance(
        &mut self,
        _pos: &Position,
        _constructor: &TaggedValue,
        _instance: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_unop_result(
        &mut self,
        _pos: &Position,
        _op: UnaryOp,
        _operand: &TaggedValue,
        _result: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    fn tag_binop_result(
        &mut self,
        _pos: &Position,
        _op: Operator,
        _left: &TaggedValue,
        _right: &TaggedValue,
        _result: &Value,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// `computed` is set for `o[k]` accesses, clear for `o.k`.
    fn tag_prop_read(
        &mut self,
        _pos: &Position,
        _object: &TaggedValue,
        _key: &str,
        _computed: bool,
        _value: &Value,
        stored: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        Ok(stored.cloned())
    }

    fn tag_prop_write(
        &mut self,
        _pos: &Position,
        _object: &TaggedValue,
        _key: &str,
        _computed: bool,
        value: &TaggedValue,
        _previous: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        Ok(value.tag.clone())
    }

    /// Tag of the boolean result of `delete`.
    fn tag_prop_delete(
        &mut self,
        _pos: &Position,
        _object: &TaggedValue,
        _key: &str,
        _computed: bool,
        _stored: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        Ok(None)
    }

    /// Called once, after the global object is tagged. `natives` names the
    /// built-in functions reachable from it.
    fn set_global(&mut self, _global: &TaggedValue, _natives: &NativePaths) -> Result<()> {
        Ok(())
    }

    fn funcall(
        &mut self,
        _pos: &Position,
        _callee: &TaggedValue,
        _receiver: &TaggedValue,
        _args: &[Rc<TaggedValue>],
        _kind: CallKind,
    ) -> Result<()> {
        Ok(())
    }

    fn newexpr(
        &mut self,
        _pos: &Position,
        _callee: &TaggedValue,
        _args: &[Rc<TaggedValue>],
    ) -> Result<()> {
        Ok(())
    }

    /// `arguments` is the activation's prepared arguments object.
    fn enter_function(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        _arguments: &Value,
        _receiver: &TaggedValue,
    ) -> Result<()> {
        Ok(())
    }

    fn return_from_function(&mut self, _pos: &Position, _value: &TaggedValue) -> Result<()> {
        Ok(())
    }

    fn leave_function(&mut self, _pos: &Position) -> Result<()> {
        Ok(())
    }

    fn enter_script(&mut self, _pos: &Position) -> Result<()> {
        Ok(())
    }

    fn leave_script(&mut self, _pos: &Position) -> Result<()> {
        Ok(())
    }
}

/// Supplies no tags at all. Instrumented programs behave exactly like the
/// originals under it.
#[derive(Debug, Clone, Copy, Default)]
pub struct InertPolicy;

impl Policy for InertPolicy {}

/// Provenance tracing: literals are tagged with the position that created
/// them, operator results inherit the first tagged operand, and every hook
/// event is logged once as `url@line:offset: message`.
///
/// Callees are described by the position of their function literal, or by
/// their global path for built-ins. Computed property accesses, accesses to
/// an `arguments` object and to `constructor` are logged as they happen.
#[derive(Debug, Default)]
pub struct TracePolicy {
    lines: IndexSet<String>,
    natives: NativePaths,
    sources: HashMap<ObjectId, String>,
    arguments: HashSet<ObjectId>,
}

impl TracePolicy {
    pub fn new() -> Self {
        TracePolicy::default()
    }

    /// Logged events in first-seen order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    fn record(&mut self, pos: &Position, message: String) {
        let line = format!("{pos}: {message}");
        trace!("{line}");
        self.lines.insert(line);
    }

    fn origin(pos: &Position) -> Tag {
        Tag::new(pos.to_string())
    }

    fn describe_callee(&self, callee: &Value) -> Option<String> {
        let id = callee.untagged().as_object()?;
        match self.sources.get(&id) {
            Some(pos) => Some(pos.clone()),
            None => self.natives.get(callee).map(str::to_string),
        }
    }

    fn access(
        &mut self,
        pos: &Position,
        object: &TaggedValue,
        key: &str,
        computed: bool,
        mode: &str,
    ) {
        if computed && array_index(key).is_none() {
            self.record(pos, format!("dynamic {mode} of property {key}"));
        }
        if object.value.as_object().is_some_and(|id| self.arguments.contains(&id)) {
            self.record(pos, format!("access to arguments['{key}']"));
        }
        if key == "constructor" {
            self.record(pos, "access to constructor property".to_string());
        }
    }
}

/// Short rendering of a value for trace lines.
pub fn brief(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::Str(s) => format!("{s:?}"),
        Value::Object(id) => format!("object{id}"),
        Value::Tagged(tv) => brief(&tv.value),
    }
}

fn describe_tag(tag: Option<&Tag>) -> String {
    match tag.and_then(|t| t.downcast_ref::<String>()) {
        Some(origin) => format!(" [from {origin}]"),
        None => String::new(),
    }
}

impl Policy for TracePolicy {
    fn tag_global(&mut self, pos: &Position, _global: &Value) -> Result<Option<Tag>> {
        self.record(pos, "global object".to_string());
        Ok(Some(Self::origin(pos)))
    }

    fn set_global(&mut self, _global: &TaggedValue, natives: &NativePaths) -> Result<()> {
        self.natives = natives.clone();
        Ok(())
    }

    fn tag_literal(&mut self, pos: &Position, value: &Value) -> Result<Option<Tag>> {
        self.record(pos, format!("literal {}", brief(value)));
        Ok(Some(Self::origin(pos)))
    }

    /// Runs once for every function literal, at its creation site.
    fn tag_default_prototype(
        &mut self,
        pos: &Position,
        function: &Value,
        _prototype: &Value,
    ) -> Result<Option<Tag>> {
        if let Some(id) = function.as_object() {
            self.sources.entry(id).or_insert_with(|| pos.to_string());
        }
        Ok(Some(Self::origin(pos)))
    }

    fn tag_native_exception(&mut self, pos: &Position, exception: &Value) -> Result<Option<Tag>> {
        self.record(pos, format!("caught native exception {}", brief(exception)));
        Ok(Some(Self::origin(pos)))
    }

    fn tag_native_result(
        &mut self,
        pos: &Position,
        _callee: &Value,
        result: &Value,
    ) -> Result<Option<Tag>> {
        self.record(pos, format!("native result {}", brief(result)));
        Ok(None)
    }

    fn tag_unop_result(
        &mut self,
        _pos: &Position,
        _op: UnaryOp,
        operand: &TaggedValue,
        _result: &Value,
    ) -> Result<Option<Tag>> {
        Ok(operand.tag.clone())
    }

    fn tag_binop_result(
        &mut self,
        _pos: &Position,
        _op: Operator,
        left: &TaggedValue,
        right: &TaggedValue,
        _result: &Value,
    ) -> Result<Option<Tag>> {
        Ok(left.tag.clone().or_else(|| right.tag.clone()))
    }

    fn tag_prop_read(
        &mut self,
        pos: &Position,
        object: &TaggedValue,
        key: &str,
        computed: bool,
        _value: &Value,
        stored: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        self.access(pos, object, key, computed, "read");
        Ok(stored.cloned())
    }

    fn tag_prop_write(
        &mut self,
        pos: &Position,
        object: &TaggedValue,
        key: &str,
        computed: bool,
        value: &TaggedValue,
        _previous: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        self.access(pos, object, key, computed, "write");
        self.record(
            pos,
            format!("write {key} = {}{}", brief(&value.value), describe_tag(value.tag.as_ref())),
        );
        Ok(value.tag.clone())
    }

    fn tag_prop_delete(
        &mut self,
        pos: &Position,
        object: &TaggedValue,
        key: &str,
        computed: bool,
        _stored: Option<&Tag>,
    ) -> Result<Option<Tag>> {
        self.access(pos, object, key, computed, "delete");
        Ok(None)
    }

    fn funcall(
        &mut self,
        pos: &Position,
        callee: &TaggedValue,
        _receiver: &TaggedValue,
        _args: &[Rc<TaggedValue>],
        kind: CallKind,
    ) -> Result<()> {
        if let Some(target) = self.describe_callee(&callee.value) {
            self.record(pos, format!("{} call to {target}", kind.as_str()));
        }
        Ok(())
    }

    fn newexpr(
        &mut self,
        pos: &Position,
        callee: &TaggedValue,
        _args: &[Rc<TaggedValue>],
    ) -> Result<()> {
        if let Some(target) = self.describe_callee(&callee.value) {
            self.record(pos, format!("new call to {target}"));
        }
        Ok(())
    }

    fn enter_function(
        &mut self,
        _pos: &Position,
        _callee: &Value,
        arguments: &Value,
        _receiver: &TaggedValue,
    ) -> Result<()> {
        if let Some(id) = arguments.as_object() {
            self.arguments.insert(id);
        }
        Ok(())
    }

    fn return_from_function(&mut self, pos: &Position, value: &TaggedValue) -> Result<()> {
        self.record(
            pos,
            format!("return {}{}", brief(&value.value), describe_tag(value.tag.as_ref())),
        );
        Ok(())
    }

    fn enter_script(&mut self, pos: &Position) -> Result<()> {
        self.record(pos, "enter script".to_string());
        Ok(())
    }

    fn leave_script(&mut self, pos: &Position) -> Result<()> {
        self.record(pos, "leave script".to_string());
        Ok(())
    }
}
