//! Built-in objects of the host engine.

use std::rc::Rc;

use super::heap::{Heap, NativeFn, NativeFunction, Object, ObjectClass, Property, Slot};
use super::ops::{number_to_string, string_to_number, to_int32};
use super::{Completion, Engine, ErrorKind, FunctionKind, ObjectId, Value};

#[derive(Debug, Clone)]
pub struct Intrinsics {
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub string_prototype: ObjectId,
    pub number_prototype: ObjectId,
    pub boolean_prototype: ObjectId,
    pub error_prototype: ObjectId,
    pub type_error_prototype: ObjectId,
    pub range_error_prototype: ObjectId,
    pub reference_error_prototype: ObjectId,
    /// `Function.prototype.call`
    pub function_call: ObjectId,
    /// `Function.prototype.apply`
    pub function_apply: ObjectId,
}

impl Intrinsics {
    pub fn error_prototype(&self, kind: ErrorKind) -> ObjectId {
        match kind {
            ErrorKind::Error => self.error_prototype,
            ErrorKind::TypeError => self.type_error_prototype,
            ErrorKind::RangeError => self.range_error_prototype,
            ErrorKind::ReferenceError => self.reference_error_prototype,
        }
    }
}

type NativeBody = fn(&mut Engine, &Value, &[Value]) -> Completion;

pub(super) fn native_function(
    heap: &mut Heap,
    intrinsics: &Intrinsics,
    name: &str,
    constructor: bool,
    call: NativeFn,
) -> ObjectId {
    alloc_native(heap, intrinsics.function_prototype, name, constructor, call)
}

fn alloc_native(
    heap: &mut Heap,
    fproto: ObjectId,
    name: &str,
    constructor: bool,
    call: NativeFn,
) -> ObjectId {
    let native = NativeFunction {
        name: Rc::from(name),
        call,
        constructor,
    };
    heap.alloc(Object::new(
        Some(fproto),
        ObjectClass::Function(FunctionKind::Native(Rc::new(native))),
    ))
}

struct Builder<'a> {
    heap: &'a mut Heap,
    fproto: ObjectId,
}

impl Builder<'_> {
    fn object(&mut self, proto: Option<ObjectId>) -> ObjectId {
        self.heap.alloc(Object::new(proto, ObjectClass::Ordinary))
    }

    fn function(&mut self, name: &str, body: NativeBody) -> ObjectId {
        alloc_native(self.heap, self.fproto, name, false, Rc::new(body))
    }

    fn method(&mut self, target: ObjectId, name: &str, body: NativeBody) -> ObjectId {
        let f = self.function(name, body);
        self.heap
            .define(target, name, Property::hidden(Value::Object(f)));
        f
    }

    fn value(&mut self, target: ObjectId, name: &str, value: Value) {
        self.heap.define(target, name, Property::hidden(value));
    }

    fn constant(&mut self, target: ObjectId, name: &str, value: Value) {
        self.heap.define(
            target,
            name,
            Property {
                slot: Slot::Data {
                    value,
                    writable: false,
                },
                enumerable: false,
                configurable: false,
            },
        );
    }

    /// Constructor `name` whose `prototype` is `proto`.
    fn constructor(&mut self, global: ObjectId, name: &str, proto: ObjectId, call: NativeFn) -> ObjectId {
        let ctor = alloc_native(self.heap, self.fproto, name, true, call);
        self.constant(ctor, "prototype", Value::Object(proto));
        self.value(proto, "constructor", Value::Object(ctor));
        self.value(global, name, Value::Object(ctor));
        ctor
    }
}

/// Builds the built-in objects; returns them with the global object.
pub(super) fn install(heap: &mut Heap) -> (Intrinsics, ObjectId) {
    let object_prototype = heap.alloc(Object::new(None, ObjectClass::Ordinary));
    let empty: NativeFn =
        Rc::new(|_: &mut Engine, _: &Value, _: &[Value]| -> Completion { Ok(Value::Undefined) });
    let function_prototype = heap.alloc(Object::new(
        Some(object_prototype),
        ObjectClass::Function(FunctionKind::Native(Rc::new(NativeFunction {
            name: Rc::from(""),
            call: empty,
            constructor: false,
        }))),
    ));
    let mut b = Builder {
        heap,
        fproto: function_prototype,
    };
    let global = b.object(Some(object_prototype));
    let array_prototype = b.heap.alloc(Object::new(Some(object_prototype), ObjectClass::Array));
    b.heap.set_array_length(array_prototype, 0);
    let string_prototype = b.object(Some(object_prototype));
    let number_prototype = b.object(Some(object_prototype));
    let boolean_prototype = b.object(Some(object_prototype));
    let error_prototype = b.object(Some(object_prototype));
    let type_error_prototype = b.object(Some(error_prototype));
    let range_error_prototype = b.object(Some(error_prototype));
    let reference_error_prototype = b.object(Some(error_prototype));

    // Object
    let object_ctor = b.constructor(global, "Object", object_prototype, Rc::new(object_call));
    b.method(object_ctor, "keys", object_keys);
    b.method(object_ctor, "getPrototypeOf", object_get_prototype_of);
    b.method(object_ctor, "create", object_create);
    b.method(object_ctor, "defineProperty", object_define_property);
    b.method(object_prototype, "hasOwnProperty", object_has_own_property);
    b.method(object_prototype, "toString", object_to_string);
    b.method(object_prototype, "valueOf", |_, this, _| Ok(this.clone()));

    // Function
    let function_ctor: NativeFn = Rc::new(|engine: &mut Engine, _: &Value, _: &[Value]| -> Completion {
        Err(engine.throw(
            ErrorKind::TypeError,
            "creating functions from source text is not supported",
        ))
    });
    b.constructor(global, "Function", function_prototype, function_ctor);
    let function_call = b.method(function_prototype, "call", function_call_impl);
    let function_apply = b.method(function_prototype, "apply", function_apply_impl);
    b.method(function_prototype, "toString", function_to_string);

    // Array
    let array_ctor = b.constructor(global, "Array", array_prototype, Rc::new(array_call));
    b.method(array_ctor, "isArray", |engine, _, args| {
        let v = arg(args, 0);
        Ok(Value::Bool(matches!(v, Value::Object(id) if engine.heap.is_array(id))))
    });
    b.method(array_prototype, "push", array_push);
    b.method(array_prototype, "pop", array_pop);
    b.method(array_prototype, "shift", array_shift);
    b.method(array_prototype, "join", array_join);
    b.method(array_prototype, "toString", array_join);
    b.method(array_prototype, "slice", array_slice);
    b.method(array_prototype, "concat", array_concat);
    b.method(array_prototype, "indexOf", array_index_of);
    b.method(array_prototype, "forEach", array_for_each);
    b.method(array_prototype, "map", array_map);
    b.method(array_prototype, "filter", array_filter);

    // String
    let string_fn = b.function("String", |engine, _, args| {
        if args.is_empty() {
            return Ok(Value::str(""));
        }
        Ok(Value::str(&engine.to_string(&args[0])?))
    });
    b.value(string_fn, "prototype", Value::Object(string_prototype));
    b.value(string_prototype, "constructor", Value::Object(string_fn));
    b.value(global, "String", Value::Object(string_fn));
    b.method(string_fn, "fromCharCode", string_from_char_code);
    b.method(string_prototype, "toString", string_value_of);
    b.method(string_prototype, "valueOf", string_value_of);
    b.method(string_prototype, "charAt", string_char_at);
    b.method(string_prototype, "charCodeAt", string_char_code_at);
    b.method(string_prototype, "indexOf", string_index_of);
    b.method(string_prototype, "slice", string_slice);
    b.method(string_prototype, "substring", string_substring);
    b.method(string_prototype, "toUpperCase", |engine, this, _| {
        Ok(Value::str(&engine.to_string(this)?.to_uppercase()))
    });
    b.method(string_prototype, "toLowerCase", |engine, this, _| {
        Ok(Value::str(&engine.to_string(this)?.to_lowercase()))
    });
    b.method(string_prototype, "split", string_split);
    b.method(string_prototype, "concat", |engine, this, args| {
        let mut s = engine.to_string(this)?;
        for a in args {
            s.push_str(&engine.to_string(a)?);
        }
        Ok(Value::str(&s))
    });

    // Number, Boolean
    let number_fn = b.function("Number", |engine, _, args| {
        if args.is_empty() {
            return Ok(Value::Number(0.0));
        }
        Ok(Value::Number(engine.to_number(&args[0])?))
    });
    b.value(number_fn, "prototype", Value::Object(number_prototype));
    b.value(number_prototype, "constructor", Value::Object(number_fn));
    b.value(global, "Number", Value::Object(number_fn));
    b.method(number_prototype, "toString", number_to_string_method);
    b.method(number_prototype, "valueOf", |engine, this, _| {
        Ok(Value::Number(this_number(engine, this)?))
    });
    b.method(number_prototype, "toFixed", number_to_fixed);

    let boolean_fn = b.function("Boolean", |engine, _, args| {
        Ok(Value::Bool(engine.to_boolean(&arg(args, 0))))
    });
    b.value(boolean_fn, "prototype", Value::Object(boolean_prototype));
    b.value(boolean_prototype, "constructor", Value::Object(boolean_fn));
    b.value(global, "Boolean", Value::Object(boolean_fn));
    b.method(boolean_prototype, "toString", |engine, this, _| {
        Ok(Value::str(&engine.to_string(this)?))
    });
    b.method(boolean_prototype, "valueOf", |_, this, _| Ok(this.clone()));

    // Errors
    for (kind, proto) in [
        (ErrorKind::Error, error_prototype),
        (ErrorKind::TypeError, type_error_prototype),
        (ErrorKind::RangeError, range_error_prototype),
        (ErrorKind::ReferenceError, reference_error_prototype),
    ] {
        let call: NativeFn =
            Rc::new(move |engine: &mut Engine, _: &Value, args: &[Value]| error_call(engine, kind, args));
        b.constructor(global, kind.name(), proto, call);
        b.value(proto, "name", Value::str(kind.name()));
    }
    b.value(error_prototype, "message", Value::str(""));
    b.method(error_prototype, "toString", error_to_string);

    // Math
    let math = b.object(Some(object_prototype));
    b.value(global, "Math", Value::Object(math));
    b.constant(math, "PI", Value::Number(std::f64::consts::PI));
    b.method(math, "floor", |e, _, a| math_unary(e, a, f64::floor));
    b.method(math, "ceil", |e, _, a| math_unary(e, a, f64::ceil));
    b.method(math, "abs", |e, _, a| math_unary(e, a, f64::abs));
    b.method(math, "sqrt", |e, _, a| math_unary(e, a, f64::sqrt));
    b.method(math, "round", |e, _, a| math_unary(e, a, |x| (x + 0.5).floor()));
    b.method(math, "pow", |engine, _, args| {
        let x = engine.to_number(&arg(args, 0))?;
        let y = engine.to_number(&arg(args, 1))?;
        Ok(Value::Number(x.powf(y)))
    });
    b.method(math, "max", |engine, _, args| {
        let mut acc = f64::NEG_INFINITY;
        for a in args {
            let n = engine.to_number(a)?;
            if n.is_nan() {
                return Ok(Value::Number(f64::NAN));
            }
            acc = acc.max(n);
        }
        Ok(Value::Number(acc))
    });
    b.method(math, "min", |engine, _, args| {
        let mut acc = f64::INFINITY;
        for a in args {
            let n = engine.to_number(a)?;
            if n.is_nan() {
                return Ok(Value::Number(f64::NAN));
            }
            acc = acc.min(n);
        }
        Ok(Value::Number(acc))
    });

    // console
    let console = b.object(Some(object_prototype));
    b.value(global, "console", Value::Object(console));
    b.method(console, "log", |engine, _, args| {
        let line: Vec<String> = args.iter().map(|a| engine.display(a)).collect();
        engine.output.push(line.join(" "));
        Ok(Value::Undefined)
    });

    // globals
    b.constant(global, "undefined", Value::Undefined);
    b.constant(global, "NaN", Value::Number(f64::NAN));
    b.constant(global, "Infinity", Value::Number(f64::INFINITY));
    b.value(global, "globalThis", Value::Object(global));
    b.method(global, "isNaN", |engine, _, args| {
        Ok(Value::Bool(engine.to_number(&arg(args, 0))?.is_nan()))
    });
    b.method(global, "parseInt", parse_int);
    b.method(global, "parseFloat", parse_float);

    let intrinsics = Intrinsics {
        object_prototype,
        function_prototype,
        array_prototype,
        string_prototype,
        number_prototype,
        boolean_prototype,
        error_prototype,
        type_error_prototype,
        range_error_prototype,
        reference_error_prototype,
        function_call,
        function_apply,
    };
    (intrinsics, global)
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn this_object(engine: &mut Engine, this: &Value, what: &str) -> Completion<ObjectId> {
    match this {
        Value::Object(id) => Ok(*id),
        _ => Err(engine.throw(
            ErrorKind::TypeError,
            format!("{what} called on non-object"),
        )),
    }
}

fn this_array(engine: &mut Engine, this: &Value, what: &str) -> Completion<ObjectId> {
    let id = this_object(engine, this, what)?;
    if !engine.heap.is_array(id) {
        return Err(engine.throw(
            ErrorKind::TypeError,
            format!("{what} called on non-array"),
        ));
    }
    Ok(id)
}

/// Resolves a relative index argument against `len`.
fn relative_index(engine: &mut Engine, v: &Value, len: usize, default: usize) -> Completion<usize> {
    if matches!(v, Value::Undefined) {
        return Ok(default);
    }
    let n = engine.to_number(v)?;
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    Ok(if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    })
}

/// Elements of an array-like value, read through ordinary property access.
pub(crate) fn list_from_array_like(engine: &mut Engine, v: &Value) -> Completion<Vec<Value>> {
    match v {
        Value::Undefined | Value::Null => Ok(Vec::new()),
        Value::Object(id) if engine.heap.is_array(*id) => Ok(engine.heap.list_values(*id)),
        Value::Object(_) => {
            let len = engine.get(v, "length")?;
            let len = engine.to_number(&len)?;
            let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
            (0..len).map(|i| engine.get(v, &i.to_string())).collect()
        }
        _ => Err(engine.throw(
            ErrorKind::TypeError,
            "argument list must be an array-like object",
        )),
    }
}

// ----- Object -----

fn object_call(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    match arg(args, 0) {
        v @ Value::Object(_) => Ok(v),
        _ => Ok(Value::Object(engine.new_object())),
    }
}

fn object_keys(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let target = arg(args, 0);
    let id = this_object(engine, &target, "Object.keys")?;
    let keys = engine
        .heap
        .own_keys(id, true)
        .into_iter()
        .map(|k| Value::str(&k))
        .collect();
    Ok(Value::Object(engine.new_array(keys)))
}

fn object_get_prototype_of(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let target = arg(args, 0);
    let id = this_object(engine, &target, "Object.getPrototypeOf")?;
    Ok(match engine.heap.get(id).proto {
        Some(p) => Value::Object(p),
        None => Value::Null,
    })
}

fn object_create(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let proto = match arg(args, 0) {
        Value::Object(p) => Some(p),
        Value::Null => None,
        _ => {
            return Err(engine.throw(
                ErrorKind::TypeError,
                "Object prototype may only be an Object or null",
            ))
        }
    };
    Ok(Value::Object(engine.new_object_with_proto(proto)))
}

fn object_define_property(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let target = arg(args, 0);
    let id = this_object(engine, &target, "Object.defineProperty")?;
    let key = engine.to_property_key(&arg(args, 1))?;
    let Value::Object(desc) = arg(args, 2) else {
        return Err(engine.throw(
            ErrorKind::TypeError,
            "Property description must be an object",
        ));
    };
    let mut prop = engine.heap.get_own(id, &key).cloned().unwrap_or(Property {
        slot: Slot::Data {
            value: Value::Undefined,
            writable: false,
        },
        enumerable: false,
        configurable: false,
    });
    let field = |engine: &mut Engine, name: &str| -> Completion<Option<Value>> {
        if engine.has_property(desc, name) {
            Ok(Some(engine.get(&Value::Object(desc), name)?))
        } else {
            Ok(None)
        }
    };
    let get = field(engine, "get")?;
    let set = field(engine, "set")?;
    if get.is_some() || set.is_some() {
        let (mut g, mut s) = match prop.slot {
            Slot::Accessor { get, set } => (get, set),
            Slot::Data { .. } => (None, None),
        };
        if let Some(v) = get {
            g = v.as_object();
        }
        if let Some(v) = set {
            s = v.as_object();
        }
        prop.slot = Slot::Accessor { get: g, set: s };
    } else {
        let (mut value, mut writable) = match prop.slot {
            Slot::Data { value, writable } => (value, writable),
            Slot::Accessor { .. } => (Value::Undefined, false),
        };
        if let Some(v) = field(engine, "value")? {
            value = v;
        }
        if let Some(v) = field(engine, "writable")? {
            writable = engine.to_boolean(&v);
        }
        prop.slot = Slot::Data { value, writable };
    }
    if let Some(v) = field(engine, "enumerable")? {
        prop.enumerable = engine.to_boolean(&v);
    }
    if let Some(v) = field(engine, "configurable")? {
        prop.configurable = engine.to_boolean(&v);
    }
    engine.heap.define(id, &key, prop);
    Ok(target)
}

fn object_has_own_property(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let key = engine.to_property_key(&arg(args, 0))?;
    Ok(Value::Bool(match this {
        Value::Object(id) => engine.heap.has_own(*id, &key),
        Value::Str(s) => {
            key == "length"
                || super::array_index(&key).is_some_and(|i| (i as usize) < s.encode_utf16().count())
        }
        _ => false,
    }))
}

fn object_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> Completion {
    let class = match this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::Str(_) => "String",
        Value::Tagged(_) => "Tagged",
        Value::Object(id) => match engine.heap.get(*id).class {
            ObjectClass::Ordinary => "Object",
            ObjectClass::Array => "Array",
            ObjectClass::Function(_) => "Function",
            ObjectClass::Arguments => "Arguments",
            ObjectClass::Error => "Error",
        },
    };
    Ok(Value::str(&format!("[object {class}]")))
}

// ----- Function -----

fn function_call_impl(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let receiver = arg(args, 0);
    let rest = args.get(1..).unwrap_or(&[]);
    engine.call_function(this, receiver, rest)
}

fn function_apply_impl(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let receiver = arg(args, 0);
    let list = list_from_array_like(engine, &arg(args, 1))?;
    engine.call_function(this, receiver, &list)
}

fn function_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> Completion {
    let kind = match this {
        Value::Object(id) => engine.heap.function_kind(*id),
        _ => None,
    };
    match kind {
        Some(FunctionKind::Native(n)) => Ok(Value::str(&format!(
            "function {}() {{ [native code] }}",
            n.name
        ))),
        Some(FunctionKind::Closure(c)) => {
            let f = &c.function;
            Ok(Value::str(&format!(
                "function {}({}) {{ [code] }}",
                f.id.as_deref().unwrap_or(""),
                f.params.join(", ")
            )))
        }
        None => Err(engine.throw(
            ErrorKind::TypeError,
            "Function.prototype.toString requires that 'this' be a Function",
        )),
    }
}

// ----- Array -----

fn array_call(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    if let [Value::Number(n)] = args {
        if *n < 0.0 || n.fract() != 0.0 || *n >= u32::MAX as f64 {
            return Err(engine.throw(ErrorKind::RangeError, "Invalid array length"));
        }
        let id = engine.new_array(Vec::new());
        engine.heap.set_array_length(id, *n as u32);
        return Ok(Value::Object(id));
    }
    Ok(Value::Object(engine.new_array(args.to_vec())))
}

fn array_push(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.push")?;
    for a in args {
        let len = engine.heap.array_length(id);
        engine.heap.write_own(id, &len.to_string(), a.clone());
    }
    Ok(Value::Number(engine.heap.array_length(id) as f64))
}

fn array_pop(engine: &mut Engine, this: &Value, _args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.pop")?;
    let len = engine.heap.array_length(id);
    if len == 0 {
        return Ok(Value::Undefined);
    }
    let last = engine.get(this, &(len - 1).to_string())?;
    engine.heap.set_array_length(id, len - 1);
    Ok(last)
}

fn array_shift(engine: &mut Engine, this: &Value, _args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.shift")?;
    let mut values = engine.heap.list_values(id);
    if values.is_empty() {
        return Ok(Value::Undefined);
    }
    let first = values.remove(0);
    engine.heap.set_array_length(id, 0);
    for (i, v) in values.into_iter().enumerate() {
        engine.heap.write_own(id, &i.to_string(), v);
    }
    Ok(first)
}

fn array_join(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.join")?;
    let sep = match arg(args, 0) {
        Value::Undefined => ",".to_string(),
        v => engine.to_string(&v)?,
    };
    let mut parts = Vec::new();
    for v in engine.heap.list_values(id) {
        parts.push(if v.is_nullish() {
            String::new()
        } else {
            engine.to_string(&v)?
        });
    }
    Ok(Value::str(&parts.join(&sep)))
}

fn array_slice(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.slice")?;
    let values = engine.heap.list_values(id);
    let start = relative_index(engine, &arg(args, 0), values.len(), 0)?;
    let end = relative_index(engine, &arg(args, 1), values.len(), values.len())?;
    let items = if start < end {
        values[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::Object(engine.new_array(items)))
}

fn array_concat(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.concat")?;
    let mut items = engine.heap.list_values(id);
    for a in args {
        match a {
            Value::Object(other) if engine.heap.is_array(*other) => {
                items.extend(engine.heap.list_values(*other))
            }
            v => items.push(v.clone()),
        }
    }
    Ok(Value::Object(engine.new_array(items)))
}

fn array_index_of(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let id = this_array(engine, this, "Array.prototype.indexOf")?;
    let needle = arg(args, 0);
    let values = engine.heap.list_values(id);
    let from = relative_index(engine, &arg(args, 1), values.len(), 0)?;
    for (i, v) in values.iter().enumerate().skip(from) {
        if engine.strict_equals(v, &needle) {
            return Ok(Value::Number(i as f64));
        }
    }
    Ok(Value::Number(-1.0))
}

/// Calls `callback(element, index, array)` for each present element.
fn each_element(
    engine: &mut Engine,
    this: &Value,
    args: &[Value],
    what: &str,
    mut visit: impl FnMut(&mut Engine, usize, Value, Value) -> Completion<()>,
) -> Completion<u32> {
    let id = this_array(engine, this, what)?;
    let callback = arg(args, 0);
    if !engine.is_callable(&callback) {
        let shown = engine.display(&callback);
        return Err(engine.throw(
            ErrorKind::TypeError,
            format!("{shown} is not a function"),
        ));
    }
    let this_arg = arg(args, 1);
    let len = engine.heap.array_length(id);
    for i in 0..len {
        let key = i.to_string();
        if !engine.heap.has_own(id, &key) {
            continue;
        }
        let element = engine.get(this, &key)?;
        let r = engine.call_function(
            &callback,
            this_arg.clone(),
            &[element.clone(), Value::Number(i as f64), this.clone()],
        )?;
        visit(engine, i as usize, element, r)?;
    }
    Ok(len)
}

fn array_for_each(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    each_element(engine, this, args, "Array.prototype.forEach", |_, _, _, _| Ok(()))?;
    Ok(Value::Undefined)
}

fn array_map(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let out = engine.new_array(Vec::new());
    let len = each_element(engine, this, args, "Array.prototype.map", |engine, i, _, r| {
        engine.heap.write_own(out, &i.to_string(), r);
        Ok(())
    })?;
    engine.heap.set_array_length(out, len);
    Ok(Value::Object(out))
}

fn array_filter(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let mut kept = Vec::new();
    each_element(engine, this, args, "Array.prototype.filter", |engine, _, element, r| {
        if engine.to_boolean(&r) {
            kept.push(element);
        }
        Ok(())
    })?;
    Ok(Value::Object(engine.new_array(kept)))
}

// ----- String -----

fn this_units(engine: &mut Engine, this: &Value) -> Completion<Vec<u16>> {
    Ok(engine.to_string(this)?.encode_utf16().collect())
}

fn units_value(units: &[u16]) -> Value {
    Value::str(&String::from_utf16_lossy(units))
}

fn string_value_of(engine: &mut Engine, this: &Value, _args: &[Value]) -> Completion {
    match this {
        Value::Str(_) => Ok(this.clone()),
        _ => Err(engine.throw(
            ErrorKind::TypeError,
            "String.prototype.valueOf requires that 'this' be a String",
        )),
    }
}

fn string_from_char_code(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let mut units = Vec::with_capacity(args.len());
    for a in args {
        units.push(to_int32(engine.to_number(a)?) as u16);
    }
    Ok(units_value(&units))
}

fn string_char_at(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let units = this_units(engine, this)?;
    let i = engine.to_number(&arg(args, 0))?;
    let i = if i.is_nan() { 0.0 } else { i.trunc() };
    if i < 0.0 || i as usize >= units.len() {
        return Ok(Value::str(""));
    }
    Ok(units_value(&units[i as usize..i as usize + 1]))
}

fn string_char_code_at(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let units = this_units(engine, this)?;
    let i = engine.to_number(&arg(args, 0))?;
    let i = if i.is_nan() { 0.0 } else { i.trunc() };
    if i < 0.0 || i as usize >= units.len() {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(units[i as usize] as f64))
}

fn string_index_of(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let units = this_units(engine, this)?;
    let needle: Vec<u16> = engine.to_string(&arg(args, 0))?.encode_utf16().collect();
    let from = relative_index(engine, &arg(args, 1), units.len(), 0)?;
    if needle.is_empty() {
        return Ok(Value::Number(from as f64));
    }
    let found = (from..units.len())
        .find(|&i| units[i..].starts_with(&needle))
        .map(|i| i as f64)
        .unwrap_or(-1.0);
    Ok(Value::Number(found))
}

fn string_slice(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let units = this_units(engine, this)?;
    let start = relative_index(engine, &arg(args, 0), units.len(), 0)?;
    let end = relative_index(engine, &arg(args, 1), units.len(), units.len())?;
    if start >= end {
        return Ok(Value::str(""));
    }
    Ok(units_value(&units[start..end]))
}

fn string_substring(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let units = this_units(engine, this)?;
    let clamp = |engine: &mut Engine, v: &Value, default: usize| -> Completion<usize> {
        if matches!(v, Value::Undefined) {
            return Ok(default);
        }
        let n = engine.to_number(v)?;
        Ok(if n.is_nan() || n < 0.0 {
            0
        } else {
            (n as usize).min(units.len())
        })
    };
    let a = clamp(engine, &arg(args, 0), 0)?;
    let b = clamp(engine, &arg(args, 1), units.len())?;
    let (start, end) = if a <= b { (a, b) } else { (b, a) };
    Ok(units_value(&units[start..end]))
}

fn string_split(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let s = engine.to_string(this)?;
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::str(&s)],
        sep => {
            let sep = engine.to_string(&sep)?;
            if sep.is_empty() {
                s.encode_utf16()
                    .map(|u| units_value(&[u]))
                    .collect()
            } else {
                s.split(sep.as_str()).map(Value::str).collect()
            }
        }
    };
    Ok(Value::Object(engine.new_array(parts)))
}

// ----- Number -----

fn this_number(engine: &mut Engine, this: &Value) -> Completion<f64> {
    match this {
        Value::Number(n) => Ok(*n),
        _ => Err(engine.throw(
            ErrorKind::TypeError,
            "Number.prototype method called on incompatible receiver",
        )),
    }
}

fn number_to_string_method(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let n = this_number(engine, this)?;
    let radix = match arg(args, 0) {
        Value::Undefined => 10,
        v => engine.to_number(&v)? as u32,
    };
    if !(2..=36).contains(&radix) {
        return Err(engine.throw(
            ErrorKind::RangeError,
            "toString() radix must be between 2 and 36",
        ));
    }
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 {
        return Ok(Value::str(&number_to_string(n)));
    }
    let mut digits = Vec::new();
    let mut m = n.abs() as u128;
    if m == 0 {
        digits.push('0');
    }
    while m > 0 {
        let d = (m % radix as u128) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('?'));
        m /= radix as u128;
    }
    if n < 0.0 {
        digits.push('-');
    }
    Ok(Value::str(&digits.iter().rev().collect::<String>()))
}

fn number_to_fixed(engine: &mut Engine, this: &Value, args: &[Value]) -> Completion {
    let n = this_number(engine, this)?;
    let digits = engine.to_number(&arg(args, 0))?;
    let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
    if !(0.0..=100.0).contains(&digits) {
        return Err(engine.throw(
            ErrorKind::RangeError,
            "toFixed() digits argument must be between 0 and 100",
        ));
    }
    if !n.is_finite() {
        return Ok(Value::str(&number_to_string(n)));
    }
    Ok(Value::str(&format!("{:.*}", digits as usize, n)))
}

// ----- Error -----

fn error_call(engine: &mut Engine, kind: ErrorKind, args: &[Value]) -> Completion {
    let proto = engine.intrinsics.error_prototype(kind);
    let id = engine
        .heap
        .alloc(Object::new(Some(proto), ObjectClass::Error));
    let message = arg(args, 0);
    if !matches!(message, Value::Undefined) {
        let text = engine.to_string(&message)?;
        engine
            .heap
            .define(id, "message", Property::hidden(Value::str(&text)));
    }
    Ok(Value::Object(id))
}

fn error_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> Completion {
    let name = match engine.get(this, "name")? {
        Value::Undefined => "Error".to_string(),
        v => engine.to_string(&v)?,
    };
    let message = match engine.get(this, "message")? {
        Value::Undefined => String::new(),
        v => engine.to_string(&v)?,
    };
    Ok(Value::str(&match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => format!("{name}: {message}"),
    }))
}

// ----- globals -----

fn math_unary(engine: &mut Engine, args: &[Value], f: fn(f64) -> f64) -> Completion {
    let x = engine.to_number(&arg(args, 0))?;
    Ok(Value::Number(f(x)))
}

fn parse_int(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let s = engine.to_string(&arg(args, 0))?;
    let mut t = s.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = t.strip_prefix('-') {
        sign = -1.0;
        t = rest;
    } else if let Some(rest) = t.strip_prefix('+') {
        t = rest;
    }
    let mut radix = match arg(args, 1) {
        Value::Undefined => 0,
        v => to_int32(engine.to_number(&v)?) as u32,
    };
    if radix == 0 || radix == 16 {
        if let Some(rest) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            t = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let mut acc: Option<f64> = None;
    for c in t.chars() {
        let Some(d) = c.to_digit(radix) else {
            break;
        };
        acc = Some(acc.unwrap_or(0.0) * radix as f64 + d as f64);
    }
    Ok(Value::Number(acc.map(|n| sign * n).unwrap_or(f64::NAN)))
}

fn parse_float(engine: &mut Engine, _this: &Value, args: &[Value]) -> Completion {
    let s = engine.to_string(&arg(args, 0))?;
    let t = s.trim_start();
    for lit in ["Infinity", "+Infinity", "-Infinity"] {
        if t.starts_with(lit) {
            return Ok(Value::Number(string_to_number(lit)));
        }
    }
    let bytes = t.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'+' | b'-' if i == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[i - 1], b'e' | b'E') => {}
            b'0'..=b'9' => {
                seen_digit = true;
                end = i + 1;
            }
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        i += 1;
    }
    if !seen_digit {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(t[..end].parse::<f64>().unwrap_or(f64::NAN)))
}
