//! Host engine: a tree-walking evaluator with a prototype-based object model.
//! It runs both original and instrumented program trees; the shadow runtime is
//! installed into it as an ordinary global object with native methods.

mod heap;
mod interp;
mod natives;
mod ops;
mod value;

use std::rc::Rc;

use anyhow::anyhow;
use log::debug;

pub use heap::{
    array_index, Closure, FunctionKind, Heap, NativeFn, NativeFunction, Object, ObjectClass,
    Property, Resolved, Slot,
};
pub use interp::Env;
pub use natives::Intrinsics;
pub(crate) use natives::list_from_array_like;
pub use ops::{number_to_string, string_to_number, Hint};
pub use value::{ObjectId, Value};

use crate::ast::Program;
use crate::config::EngineConfig;

/// Abrupt completion of an evaluation step.
#[derive(Debug)]
pub enum Abrupt {
    /// Exception thrown by the program or a built-in; catchable.
    Throw(Value),
    /// Error raised by a policy hook. Bypasses `catch` and `finally`.
    Policy(anyhow::Error),
    /// Misuse of the runtime contract. Bypasses `catch` and `finally`.
    Fatal(anyhow::Error),
}

pub type Completion<T = Value> = Result<T, Abrupt>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
        }
    }
}

pub struct Engine {
    pub heap: Heap,
    pub intrinsics: Intrinsics,
    pub global: ObjectId,
    global_env: Env,
    config: EngineConfig,
    depth: usize,
    /// Lines written by `console.log`.
    pub output: Vec<String>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut heap = Heap::default();
        let (intrinsics, global) = natives::install(&mut heap);
        let global_env = interp::global_env(Value::Object(global));
        Engine {
            heap,
            intrinsics,
            global,
            global_env,
            config,
            depth: 0,
            output: Vec::new(),
        }
    }

    /// Runs `program` to completion in the global scope.
    pub fn run_program(&mut self, program: &Program) -> Completion<()> {
        debug!(
            "run program: {} top-level statements, heap {} objects",
            program.body.len(),
            self.heap.len()
        );
        let env = self.global_env.clone();
        let res = self.exec_program(program, &env);
        if let Err(abrupt) = &res {
            debug!("program completed abruptly: {}", self.describe_abrupt(abrupt));
        }
        res
    }

    /// Turns an abrupt completion that escaped to the embedder into an error.
    pub fn abrupt_to_error(&self, abrupt: Abrupt) -> anyhow::Error {
        match abrupt {
            Abrupt::Throw(v) => anyhow!("uncaught exception: {}", self.display(&v)),
            Abrupt::Policy(err) => err.context("policy hook failed"),
            Abrupt::Fatal(err) => err.context("runtime contract violated"),
        }
    }

    pub fn describe_abrupt(&self, abrupt: &Abrupt) -> String {
        match abrupt {
            Abrupt::Throw(v) => format!("throw {}", self.inspect(v)),
            Abrupt::Policy(err) => format!("policy error: {err:#}"),
            Abrupt::Fatal(err) => format!("fatal: {err:#}"),
        }
    }

    // ----- objects -----

    pub fn new_object(&mut self) -> ObjectId {
        let proto = self.intrinsics.object_prototype;
        self.heap.alloc(Object::new(Some(proto), ObjectClass::Ordinary))
    }

    pub fn new_object_with_proto(&mut self, proto: Option<ObjectId>) -> ObjectId {
        self.heap.alloc(Object::new(proto, ObjectClass::Ordinary))
    }

    pub fn new_array(&mut self, items: Vec<Value>) -> ObjectId {
        let proto = self.intrinsics.array_prototype;
        let id = self.heap.alloc(Object::new(Some(proto), ObjectClass::Array));
        self.heap.set_array_length(id, 0);
        for (i, v) in items.into_iter().enumerate() {
            self.heap.write_own(id, &i.to_string(), v);
        }
        id
    }

    pub fn new_native_function(
        &mut self,
        name: &str,
        call: impl Fn(&mut Engine, &Value, &[Value]) -> Completion + 'static,
    ) -> ObjectId {
        natives::native_function(&mut self.heap, &self.intrinsics, name, false, Rc::new(call))
    }

    pub fn make_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        let proto = self.intrinsics.error_prototype(kind);
        let id = self.heap.alloc(Object::new(Some(proto), ObjectClass::Error));
        self.heap
            .define(id, "message", Property::hidden(Value::str(message)));
        Value::Object(id)
    }

    pub fn throw(&mut self, kind: ErrorKind, message: impl AsRef<str>) -> Abrupt {
        Abrupt::Throw(self.make_error(kind, message.as_ref()))
    }

    pub fn global_value(&self) -> Value {
        Value::Object(self.global)
    }

    /// Own data property of the global object, without running accessors.
    pub fn global_get(&self, name: &str) -> Option<Value> {
        match self.heap.get_own(self.global, name).map(|p| &p.slot) {
            Some(Slot::Data { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.heap.define(self.global, name, Property::hidden(value));
    }

    // ----- property access -----

    fn primitive_proto(&self, base: &Value) -> Option<ObjectId> {
        match base {
            Value::Str(_) => Some(self.intrinsics.string_prototype),
            Value::Number(_) => Some(self.intrinsics.number_prototype),
            Value::Bool(_) => Some(self.intrinsics.boolean_prototype),
            _ => None,
        }
    }

    /// Looks `key` up on any value, including virtual string properties.
    pub fn resolve_value(&self, base: &Value, key: &str) -> Resolved {
        match base {
            Value::Object(id) => self.heap.resolve(*id, key),
            Value::Tagged(tv) => self.resolve_value(&tv.value, key),
            Value::Str(s) => {
                if key == "length" {
                    return Resolved::Data {
                        holder: None,
                        value: Value::Number(s.encode_utf16().count() as f64),
                    };
                }
                if let Some(i) = array_index(key) {
                    if let Some(unit) = s.encode_utf16().nth(i as usize) {
                        return Resolved::Data {
                            holder: None,
                            value: Value::Str(Rc::from(String::from_utf16_lossy(&[unit]))),
                        };
                    }
                }
                self.heap.resolve(self.intrinsics.string_prototype, key)
            }
            other => match self.primitive_proto(other) {
                Some(proto) => self.heap.resolve(proto, key),
                None => Resolved::Absent,
            },
        }
    }

    /// Throws the host `TypeError` for property access on `null`/`undefined`.
    pub fn check_coercible(&mut self, base: &Value, key: &str) -> Completion<()> {
        if base.untagged().is_nullish() {
            let what = self.display(base);
            return Err(self.throw(
                ErrorKind::TypeError,
                format!("Cannot access property '{key}' of {what}"),
            ));
        }
        Ok(())
    }

    pub fn get(&mut self, base: &Value, key: &str) -> Completion {
        self.check_coercible(base, key)?;
        match self.resolve_value(base, key) {
            Resolved::Data { value, .. } => Ok(value),
            Resolved::Accessor { get: Some(getter), .. } => {
                self.call_function(&Value::Object(getter), base.clone(), &[])
            }
            Resolved::Accessor { get: None, .. } | Resolved::Absent => Ok(Value::Undefined),
        }
    }

    /// Sloppy-mode `base[key] = value`. Writes to primitives and read-only
    /// properties are dropped silently. Returns whether a data property was
    /// actually written.
    pub fn put(&mut self, base: &Value, key: &str, value: Value) -> Completion<bool> {
        self.check_coercible(base, key)?;
        let id = match base.untagged() {
            Value::Object(id) => id,
            _ => return Ok(false),
        };
        match self.heap.resolve(id, key) {
            Resolved::Accessor { set: Some(setter), .. } => {
                self.call_function(&Value::Object(setter), base.clone(), &[value])?;
                return Ok(false);
            }
            Resolved::Accessor { set: None, .. } => return Ok(false),
            Resolved::Data { holder: Some(holder), .. } if holder != id => {
                if let Some(Property {
                    slot: Slot::Data {
                        writable: false, ..
                    },
                    ..
                }) = self.heap.get_own(holder, key)
                {
                    return Ok(false);
                }
            }
            _ => {}
        }
        if key == "length" && self.heap.is_array(id) {
            let n = self.to_number(&value)?;
            if n < 0.0 || n.fract() != 0.0 || n >= u32::MAX as f64 {
                return Err(self.throw(ErrorKind::RangeError, "Invalid array length"));
            }
            self.heap.set_array_length(id, n as u32);
            return Ok(true);
        }
        Ok(self.heap.write_own(id, key, value))
    }

    pub fn delete_property(&mut self, base: &Value, key: &str) -> Completion<bool> {
        self.check_coercible(base, key)?;
        match base.untagged() {
            Value::Object(id) => Ok(self.heap.delete(id, key)),
            _ => Ok(true),
        }
    }

    pub fn has_property(&self, id: ObjectId, key: &str) -> bool {
        !matches!(self.heap.resolve(id, key), Resolved::Absent)
    }

    // ----- calls -----

    pub fn is_callable(&self, v: &Value) -> bool {
        matches!(v, Value::Object(id) if self.heap.is_callable(*id))
    }

    pub fn call_function(&mut self, callee: &Value, this: Value, args: &[Value]) -> Completion {
        self.call_function_filled(callee, this, args, Value::Undefined)
    }

    /// Calls `callee`; formal parameters without an argument are bound to
    /// `fill` while `arguments.length` stays `args.len()`.
    pub fn call_function_filled(
        &mut self,
        callee: &Value,
        this: Value,
        args: &[Value],
        fill: Value,
    ) -> Completion {
        let (id, kind) = match callee {
            Value::Object(id) => match self.heap.function_kind(*id) {
                Some(kind) => (*id, kind),
                None => return Err(self.not_a_function(callee)),
            },
            _ => return Err(self.not_a_function(callee)),
        };
        if self.depth >= self.config.max_call_depth {
            return Err(self.throw(ErrorKind::RangeError, "Maximum call stack size exceeded"));
        }
        self.depth += 1;
        let res = match kind {
            FunctionKind::Native(native) => (native.call)(self, &this, args),
            FunctionKind::Closure(closure) => self.invoke_closure(id, &closure, this, args, fill),
        };
        self.depth -= 1;
        res
    }

    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> Completion {
        let kind = match callee {
            Value::Object(id) => self.heap.function_kind(*id),
            _ => None,
        };
        match kind {
            Some(FunctionKind::Closure(_)) => {
                let instance = self.allocate_instance(callee)?;
                let res = self.call_function(callee, Value::Object(instance), args)?;
                Ok(match res {
                    Value::Object(_) => res,
                    _ => Value::Object(instance),
                })
            }
            Some(FunctionKind::Native(native)) if native.constructor => {
                let res = self.call_function(callee, Value::Undefined, args)?;
                Ok(match res {
                    Value::Object(_) => res,
                    _ => Value::Object(self.new_object()),
                })
            }
            _ => {
                let what = self.display(callee);
                Err(self.throw(ErrorKind::TypeError, format!("{what} is not a constructor")))
            }
        }
    }

    /// Fresh instance whose prototype is `constructor.prototype`, or
    /// `Object.prototype` when that is not an object.
    pub fn allocate_instance(&mut self, constructor: &Value) -> Completion<ObjectId> {
        let proto = match self.get(constructor, "prototype")? {
            Value::Object(p) => p,
            _ => self.intrinsics.object_prototype,
        };
        Ok(self.new_object_with_proto(Some(proto)))
    }

    pub fn is_native_function(&self, v: &Value) -> bool {
        matches!(v, Value::Object(id)
            if matches!(self.heap.function_kind(*id), Some(FunctionKind::Native(_))))
    }

    fn not_a_function(&mut self, callee: &Value) -> Abrupt {
        let what = self.display(callee);
        self.throw(ErrorKind::TypeError, format!("{what} is not a function"))
    }

    // ----- rendering -----

    /// Console rendering: strings bare, everything else as `inspect`.
    pub fn display(&self, v: &Value) -> String {
        match v {
            Value::Str(s) => s.to_string(),
            Value::Tagged(tv) => self.display(&tv.value),
            other => self.inspect(other),
        }
    }

    /// Side-effect free rendering; never runs program code.
    pub fn inspect(&self, v: &Value) -> String {
        self.inspect_depth(v, 0)
    }

    fn inspect_depth(&self, v: &Value, depth: usize) -> String {
        match v {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => format!("'{s}'"),
            Value::Tagged(tv) => self.inspect_depth(&tv.value, depth),
            Value::Object(id) => self.inspect_object(*id, depth),
        }
    }

    fn data_string(&self, id: ObjectId, key: &str) -> Option<String> {
        match self.heap.resolve(id, key) {
            Resolved::Data {
                value: Value::Str(s),
                ..
            } => Some(s.to_string()),
            _ => None,
        }
    }

    fn inspect_object(&self, id: ObjectId, depth: usize) -> String {
        let obj = self.heap.get(id);
        match &obj.class {
            ObjectClass::Function(kind) => {
                let name = match kind {
                    FunctionKind::Native(n) => Some(n.name.to_string()),
                    FunctionKind::Closure(c) => c.function.id.clone(),
                };
                return match name {
                    Some(n) if !n.is_empty() => format!("[Function: {n}]"),
                    _ => "[Function (anonymous)]".to_string(),
                };
            }
            ObjectClass::Error => {
                let name = self.data_string(id, "name").unwrap_or_else(|| "Error".into());
                let message = self.data_string(id, "message").unwrap_or_default();
                return if message.is_empty() {
                    name
                } else {
                    format!("{name}: {message}")
                };
            }
            _ => {}
        }
        let is_array = matches!(obj.class, ObjectClass::Array);
        if depth > 2 {
            return if is_array { "[Array]" } else { "[Object]" }.to_string();
        }
        let mut parts = Vec::new();
        for key in self.heap.own_keys(id, true) {
            let rendered = match self.heap.get_own(id, &key).map(|p| &p.slot) {
                Some(Slot::Data { value, .. }) => self.inspect_depth(value, depth + 1),
                _ => "[Getter/Setter]".to_string(),
            };
            if is_array && array_index(&key).is_some() {
                parts.push(rendered);
            } else {
                parts.push(format!("{key}: {rendered}"));
            }
        }
        if is_array {
            format!("[{}]", parts.join(", "))
        } else if parts.is_empty() {
            "{}".to_string()
        } else {
            format!("{{{}}}", parts.join(", "))
        }
    }
}
