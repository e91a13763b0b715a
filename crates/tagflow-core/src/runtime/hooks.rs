use std::rc::Rc;

use log::trace;

use super::{
    arg, fatal, own_data, ArgumentSlot, CallKind, NativePaths, Operator, Position,
    ShadowRuntime, Tag, TaggedValue,
};
use crate::ast::{LogicalOp, UnaryOp};
use crate::engine::{
    list_from_array_like, Completion, Engine, ErrorKind, FunctionKind, Object,
    ObjectClass, ObjectId, Property, Resolved, Slot, Value,
};
use crate::policy::Policy;

fn tagged(args: &[Value], i: usize) -> Rc<TaggedValue> {
    TaggedValue::of(&arg(args, i))
}

fn property_key(engine: &mut Engine, key: &Value) -> Completion<String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        other => engine.to_property_key(&other.untagged()),
    }
}

/// Elements of the argument-list array the instrumentor builds at call sites.
fn argument_list(engine: &Engine, list: &Value) -> Completion<Vec<Rc<TaggedValue>>> {
    match list {
        Value::Object(id) if engine.heap.is_array(*id) => Ok(engine
            .heap
            .list_values(*id)
            .iter()
            .map(TaggedValue::of)
            .collect()),
        other => Err(fatal(format!(
            "expected an argument list, got {}",
            engine.inspect(other)
        ))),
    }
}

fn name_arg(args: &[Value], i: usize) -> Completion<Rc<str>> {
    match arg(args, i) {
        Value::Str(s) => Ok(s),
        other => Err(fatal(format!("expected a name, got {other:?}"))),
    }
}

fn formal_count(engine: &Engine, callee: &Value) -> usize {
    match callee {
        Value::Object(id) => match engine.heap.function_kind(*id) {
            Some(FunctionKind::Closure(c)) => c.function.params.len(),
            _ => 0,
        },
        _ => 0,
    }
}

impl<P: Policy> ShadowRuntime<P> {
    fn global_or_raw(&self, engine: &Engine) -> Rc<TaggedValue> {
        self.tagged_global()
            .unwrap_or_else(|| TaggedValue::of(&engine.global_value()))
    }

    fn is_instrumented(&self, engine: &Engine, v: &Value) -> bool {
        match v {
            Value::Object(id) => engine.heap.shadow(*id).is_some_and(|s| s.instrumented),
            _ => false,
        }
    }

    fn wrap_with(
        &self,
        value: Value,
        tag: impl FnOnce(&mut P, &Value) -> anyhow::Result<Option<Tag>>,
    ) -> Completion {
        if value.is_tagged() {
            return Ok(value);
        }
        let tag = self.with_policy(|p| tag(p, &value))?;
        Ok(Value::Tagged(TaggedValue::new(value, tag)))
    }

    // ----- program and global -----

    pub(super) fn wrap_global(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        if let Some(global) = self.tagged_global() {
            return Ok(Value::Tagged(global));
        }
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let raw = engine.global_value();
        let tag = self.with_policy(|p| p.tag_global(&pos, &raw))?;
        engine.heap.observe(engine.global);
        let global = TaggedValue::new(raw, tag);
        let natives = NativePaths::collect(engine);
        self.with_policy(|p| p.set_global(&global, &natives))?;
        *self.global.borrow_mut() = Some(global.clone());
        trace!("{pos}: global object wrapped");
        Ok(Value::Tagged(global))
    }

    pub(super) fn global(&self, _engine: &mut Engine, _args: &[Value]) -> Completion {
        self.tagged_global()
            .map(Value::Tagged)
            .ok_or_else(|| fatal("global() called before wrapGlobal"))
    }

    pub(super) fn enter_script(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        self.with_policy(|p| p.enter_script(&pos))?;
        Ok(Value::Undefined)
    }

    pub(super) fn leave_script(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        self.with_policy(|p| p.leave_script(&pos))?;
        Ok(Value::Undefined)
    }

    // ----- literals -----

    pub(super) fn wrap_literal(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let value = arg(args, 1);
        if value.is_tagged() {
            return Ok(value);
        }
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let tag = self.with_policy(|p| p.tag_literal(&pos, &value))?;
        if let Value::Object(id) = value {
            self.adopt(engine, &pos, id, &arg(args, 2))?;
        }
        Ok(Value::Tagged(TaggedValue::new(value, tag)))
    }

    /// Moves the tags of a fresh literal's own properties into its shadow
    /// table, leaving raw values behind. No-op for an already observed object.
    fn adopt(
        &self,
        engine: &mut Engine,
        pos: &Position,
        id: ObjectId,
        accessors: &Value,
    ) -> Completion<()> {
        if !engine.heap.observe(id) {
            return Ok(());
        }
        for key in engine.heap.own_keys(id, true) {
            let slot = engine.heap.get_own(id, &key).map(|p| p.slot.clone());
            match slot {
                Some(Slot::Data { value, .. }) => {
                    let (raw, tag) = match value {
                        Value::Tagged(tv) => (tv.value.clone(), tv.tag.clone()),
                        raw => {
                            let tag = self.with_policy(|p| p.tag_literal(pos, &raw))?;
                            (raw, tag)
                        }
                    };
                    if let Some(Property {
                        slot: Slot::Data { value, .. },
                        ..
                    }) = engine.heap.get_mut(id).props.get_mut(&key)
                    {
                        *value = raw;
                    }
                    if let Some(shadow) = engine.heap.shadow_mut(id) {
                        shadow.set(&key, tag);
                    }
                }
                Some(Slot::Accessor { get, set }) => {
                    for (f, which) in [(get, "get"), (set, "set")] {
                        let Some(f) = f else { continue };
                        let fpos = self
                            .accessor_position(engine, accessors, &key, which)?
                            .unwrap_or_else(|| pos.clone());
                        if engine.heap.observe(f) {
                            self.mark_function(engine, &fpos, f)?;
                        }
                    }
                }
                None => {}
            }
        }
        if engine.heap.is_callable(id) {
            self.mark_function(engine, pos, id)?;
        }
        Ok(())
    }

    fn mark_function(&self, engine: &mut Engine, pos: &Position, id: ObjectId) -> Completion<()> {
        if let Some(shadow) = engine.heap.shadow_mut(id) {
            shadow.instrumented = true;
        }
        let Some(prototype) = own_data(engine, id, "prototype") else {
            return Ok(());
        };
        let function = Value::Object(id);
        let tag = self.with_policy(|p| p.tag_default_prototype(pos, &function, &prototype))?;
        if let Some(shadow) = engine.heap.shadow_mut(id) {
            shadow.set("prototype", tag);
        }
        if let Value::Object(proto) = prototype {
            engine.heap.observe(proto);
        }
        Ok(())
    }

    fn accessor_position(
        &self,
        engine: &Engine,
        accessors: &Value,
        key: &str,
        which: &str,
    ) -> Completion<Option<Position>> {
        let Value::Object(table) = accessors else {
            return Ok(None);
        };
        let Some(Value::Object(entry)) = own_data(engine, *table, key) else {
            return Ok(None);
        };
        match own_data(engine, entry, which) {
            Some(record @ Value::Object(_)) => Position::from_value(engine, &record).map(Some),
            _ => Ok(None),
        }
    }

    // ----- properties -----

    pub(super) fn propread(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let object = tagged(args, 1);
        let key = property_key(engine, &arg(args, 2))?;
        let computed = engine.to_boolean(&arg(args, 3));
        let value = self.read_property(engine, &pos, &object, &key, computed)?;
        Ok(Value::Tagged(value))
    }

    fn read_property(
        &self,
        engine: &mut Engine,
        pos: &Position,
        object: &Rc<TaggedValue>,
        key: &str,
        computed: bool,
    ) -> Completion<Rc<TaggedValue>> {
        let base = object.value.clone();
        engine.check_coercible(&base, key)?;
        let (holder, value) = match engine.resolve_value(&base, key) {
            Resolved::Accessor {
                get: Some(getter), ..
            } => {
                let getter = TaggedValue::of(&Value::Object(getter));
                return self.call(engine, pos, &getter, object, &[], CallKind::Method);
            }
            Resolved::Accessor { holder, get: None, .. } => (Some(holder), Value::Undefined),
            Resolved::Data { holder, value } => (holder, value),
            Resolved::Absent => (None, Value::Undefined),
        };
        let recorded = holder
            .and_then(|h| engine.heap.shadow(h))
            .and_then(|s| s.lookup(key).cloned());
        let stored = match recorded {
            Some(tag) => tag,
            None => {
                let holder_value = holder.map(Value::Object).unwrap_or_else(|| base.clone());
                let tag = self.with_policy(|p| p.tag_native_property(pos, &holder_value, key, &value))?;
                if let Some(shadow) = holder.and_then(|h| engine.heap.shadow_mut(h)) {
                    shadow.set(key, tag.clone());
                }
                tag
            }
        };
        let tag = self.with_policy(|p| p.tag_prop_read(pos, object, key, computed, &value, stored.as_ref()))?;
        Ok(TaggedValue::new(value, tag))
    }

    pub(super) fn propwrite(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let object = tagged(args, 1);
        let key = property_key(engine, &arg(args, 2))?;
        let value = tagged(args, 3);
        let computed = engine.to_boolean(&arg(args, 4));
        self.write_property(engine, &pos, &object, &key, &value, computed)?;
        Ok(Value::Tagged(value))
    }

    fn write_property(
        &self,
        engine: &mut Engine,
        pos: &Position,
        object: &Rc<TaggedValue>,
        key: &str,
        value: &Rc<TaggedValue>,
        computed: bool,
    ) -> Completion<()> {
        let base = object.value.clone();
        engine.check_coercible(&base, key)?;
        let Value::Object(id) = base else {
            return Ok(());
        };
        match engine.heap.resolve(id, key) {
            Resolved::Accessor {
                set: Some(setter), ..
            } => {
                let setter = TaggedValue::of(&Value::Object(setter));
                self.call(engine, pos, &setter, object, &[value.clone()], CallKind::Method)?;
                return Ok(());
            }
            Resolved::Accessor { set: None, .. } => return Ok(()),
            Resolved::Data { .. } | Resolved::Absent => {}
        }
        engine.heap.observe(id);
        let previous = engine.heap.shadow(id).and_then(|s| s.tag(key));
        let tag = self.with_policy(|p| p.tag_prop_write(pos, object, key, computed, value, previous.as_ref()))?;
        if !engine.put(&base, key, value.value.clone())? {
            return Ok(());
        }
        let length = (key == "length" && engine.heap.is_array(id)).then(|| engine.heap.array_length(id));
        if let Some(shadow) = engine.heap.shadow_mut(id) {
            shadow.set(key, tag);
            if let Some(len) = length {
                shadow.truncate_indices(len);
            }
        }
        Ok(())
    }

    pub(super) fn propdel(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let object = tagged(args, 1);
        let key = property_key(engine, &arg(args, 2))?;
        let computed = engine.to_boolean(&arg(args, 3));
        let id = object.value.as_object();
        let stored = id
            .and_then(|id| engine.heap.shadow(id))
            .and_then(|s| s.tag(&key));
        let deleted = engine.delete_property(&object.value, &key)?;
        if deleted {
            if let Some(shadow) = id.and_then(|id| engine.heap.shadow_mut(id)) {
                shadow.remove(&key);
            }
        }
        let tag = self.with_policy(|p| p.tag_prop_delete(&pos, &object, &key, computed, stored.as_ref()))?;
        Ok(Value::Tagged(TaggedValue::new(Value::Bool(deleted), tag)))
    }

    pub(super) fn globalread(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let name = name_arg(args, 1)?;
        let throw_if_missing = engine.to_boolean(&arg(args, 2));
        if throw_if_missing && !engine.has_property(engine.global, &name) {
            return Err(engine.throw(ErrorKind::ReferenceError, format!("{name} is not defined")));
        }
        let global = self.global_or_raw(engine);
        let value = self.read_property(engine, &pos, &global, &name, false)?;
        Ok(Value::Tagged(value))
    }

    // ----- calls -----

    pub(super) fn funcall(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let callee = tagged(args, 1);
        let receiver = tagged(args, 2);
        let argv = argument_list(engine, &arg(args, 3))?;
        let kind = CallKind::from_value(&arg(args, 4))?;
        let result = self.call(engine, &pos, &callee, &receiver, &argv, kind)?;
        Ok(Value::Tagged(result))
    }

    pub(super) fn methcall(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let object = tagged(args, 1);
        let key = property_key(engine, &arg(args, 2))?;
        let computed = engine.to_boolean(&arg(args, 3));
        let argv = argument_list(engine, &arg(args, 4))?;
        let callee = self.read_property(engine, &pos, &object, &key, computed)?;
        let result = self.call(engine, &pos, &callee, &object, &argv, CallKind::Method)?;
        Ok(Value::Tagged(result))
    }

    /// Calls through native `call`/`apply` are replaced by the call they
    /// perform before the policy sees them.
    fn call(
        &self,
        engine: &mut Engine,
        pos: &Position,
        callee: &Rc<TaggedValue>,
        receiver: &Rc<TaggedValue>,
        args: &[Rc<TaggedValue>],
        kind: CallKind,
    ) -> Completion<Rc<TaggedValue>> {
        if let (Some(natives), Value::Object(id)) = (self.natives.get(), &callee.value) {
            if *id == natives.call || *id == natives.apply {
                let this = args
                    .first()
                    .cloned()
                    .unwrap_or_else(|| TaggedValue::of(&Value::Undefined));
                let rest = if *id == natives.call {
                    args.get(1..).unwrap_or_default().to_vec()
                } else {
                    match args.get(1) {
                        Some(list) => self.spread(engine, pos, list)?,
                        None => Vec::new(),
                    }
                };
                return self.call(engine, pos, receiver, &this, &rest, kind);
            }
        }
        self.with_policy(|p| p.funcall(pos, callee, receiver, args, kind))?;
        self.invoke(engine, pos, callee, receiver, args)
    }

    /// Elements of an `apply` argument list with their recorded tags.
    fn spread(
        &self,
        engine: &mut Engine,
        pos: &Position,
        list: &Rc<TaggedValue>,
    ) -> Completion<Vec<Rc<TaggedValue>>> {
        let values = list_from_array_like(engine, &list.value)?;
        let id = list.value.as_object();
        let mut out = Vec::with_capacity(values.len());
        for (i, v) in values.into_iter().enumerate() {
            if v.is_tagged() {
                out.push(TaggedValue::of(&v));
                continue;
            }
            let key = i.to_string();
            let recorded = id
                .and_then(|id| engine.heap.shadow(id))
                .and_then(|s| s.lookup(&key).cloned());
            let tag = match recorded {
                Some(tag) => tag,
                None => self.with_policy(|p| p.tag_native_property(pos, &list.value, &key, &v))?,
            };
            out.push(TaggedValue::new(v, tag));
        }
        Ok(out)
    }

    fn absent_fill(&self, engine: &Engine, pos: &Position, callee: &Value, passed: usize) -> Completion {
        if passed >= formal_count(engine, callee) {
            return Ok(Value::Undefined);
        }
        let tag = self.with_policy(|p| p.tag_absent_argument(pos, callee, passed))?;
        Ok(Value::Tagged(TaggedValue::new(Value::Undefined, tag)))
    }

    fn invoke(
        &self,
        engine: &mut Engine,
        pos: &Position,
        callee: &Rc<TaggedValue>,
        receiver: &Rc<TaggedValue>,
        args: &[Rc<TaggedValue>],
    ) -> Completion<Rc<TaggedValue>> {
        let function = callee.value.clone();
        if self.is_instrumented(engine, &function) {
            let this = if receiver.value.is_nullish() {
                self.global_or_raw(engine)
            } else {
                receiver.clone()
            };
            let fill = self.absent_fill(engine, pos, &function, args.len())?;
            let argv: Vec<Value> = args.iter().cloned().map(Value::Tagged).collect();
            let result = engine.call_function_filled(&function, Value::Tagged(this), &argv, fill)?;
            return Ok(TaggedValue::of(&result));
        }
        let argv: Vec<Value> = args.iter().map(|a| a.value.clone()).collect();
        let result = engine.call_function(&function, receiver.value.clone(), &argv)?;
        if let Value::Tagged(tv) = result {
            return Ok(tv);
        }
        let tag = self.with_policy(|p| p.tag_native_result(pos, &function, &result))?;
        Ok(TaggedValue::new(result, tag))
    }

    pub(super) fn newexpr(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let callee = tagged(args, 1);
        let argv = argument_list(engine, &arg(args, 2))?;
        self.with_policy(|p| p.newexpr(&pos, &callee, &argv))?;
        let constructor = callee.value.clone();
        if self.is_instrumented(engine, &constructor) {
            let id = engine.allocate_instance(&constructor)?;
            engine.heap.observe(id);
            let proto_tag = constructor
                .as_object()
                .and_then(|f| engine.heap.shadow(f))
                .and_then(|s| s.tag("prototype"));
            if let Some(shadow) = engine.heap.shadow_mut(id) {
                shadow.proto_tag = proto_tag;
            }
            let instance = Value::Object(id);
            let tag = self.with_policy(|p| p.tag_new_instance(&pos, &callee, &instance))?;
            let this = TaggedValue::new(instance, tag);
            let result = self.invoke(engine, &pos, &callee, &this, &argv)?;
            let chosen = if matches!(result.value, Value::Object(_)) {
                result
            } else {
                this
            };
            return Ok(Value::Tagged(chosen));
        }
        let raw: Vec<Value> = argv.iter().map(|a| a.value.clone()).collect();
        let instance = engine.construct(&constructor, &raw)?;
        let tag = self.with_policy(|p| p.tag_new_native_instance(&pos, &callee, &instance))?;
        Ok(Value::Tagged(TaggedValue::new(instance, tag)))
    }

    // ----- operators -----

    pub(super) fn unop(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let op = match arg(args, 1) {
            Value::Str(sym) => UnaryOp::from_symbol(&sym)
                .ok_or_else(|| fatal(format!("unknown unary operator `{sym}`")))?,
            other => return Err(fatal(format!("operator must be a string, got {other:?}"))),
        };
        if op == UnaryOp::Delete {
            return Err(fatal("delete must be instrumented as propdel"));
        }
        let operand = tagged(args, 2);
        let result = engine.unary_op(op, &operand.value)?;
        let tag = self.with_policy(|p| p.tag_unop_result(&pos, op, &operand, &result))?;
        Ok(Value::Tagged(TaggedValue::new(result, tag)))
    }

    pub(super) fn binop(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let op = Operator::from_value(&arg(args, 1))?;
        let left = tagged(args, 2);
        let right = tagged(args, 3);
        let result = match op {
            Operator::Binary(op) => engine.binary_op(op, &left.value, &right.value)?,
            Operator::Logical(op) => {
                let truthy = engine.to_boolean(&left.value);
                match (op, truthy) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => left.value.clone(),
                    _ => right.value.clone(),
                }
            }
        };
        let tag = self.with_policy(|p| p.tag_binop_result(&pos, op, &left, &right, &result))?;
        Ok(Value::Tagged(TaggedValue::new(result, tag)))
    }

    // ----- boundary helpers -----

    pub(super) fn wrap_for_in_var(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let key = arg(args, 1);
        if key.is_tagged() {
            return Ok(key);
        }
        let pos = Position::from_value(engine, &arg(args, 0))?;
        self.wrap_with(key, |p, k| p.tag_for_in_var(&pos, k))
    }

    pub(super) fn wrap_native_exception(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let exception = arg(args, 1);
        if exception.is_tagged() {
            return Ok(exception);
        }
        let pos = Position::from_value(engine, &arg(args, 0))?;
        self.wrap_with(exception, |p, e| p.tag_native_exception(&pos, e))
    }

    pub(super) fn unwrap(&self, _engine: &mut Engine, args: &[Value]) -> Completion {
        Ok(arg(args, 0).untagged())
    }

    pub(super) fn is_native_call(&self, _engine: &mut Engine, args: &[Value]) -> Completion {
        Ok(Value::Bool(!arg(args, 0).is_tagged()))
    }

    /// Entry of an instrumented function called by native code: tags the
    /// receiver and arguments, runs the body and hands back a raw result.
    pub(super) fn call_wrapped(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let function = arg(args, 1);
        let receiver = arg(args, 2);
        let passed = list_from_array_like(engine, &arg(args, 3))?;
        let this = match (&receiver, self.tagged_global()) {
            (Value::Object(id), Some(global)) if *id == engine.global => global,
            _ => {
                let tag = self.with_policy(|p| {
                    p.tag_native_argument(&pos, &function, ArgumentSlot::Receiver, &receiver)
                })?;
                TaggedValue::new(receiver, tag)
            }
        };
        let mut argv = Vec::with_capacity(passed.len());
        for (i, v) in passed.into_iter().enumerate() {
            let wrapped = self.wrap_with(v, |p, v| {
                p.tag_native_argument(&pos, &function, ArgumentSlot::Index(i), v)
            })?;
            argv.push(wrapped);
        }
        let fill = self.absent_fill(engine, &pos, &function, argv.len())?;
        let result = engine.call_function_filled(&function, Value::Tagged(this), &argv, fill)?;
        Ok(result.untagged())
    }

    /// Replaces the host arguments object with one whose entries are raw and
    /// whose tags live in its shadow table.
    pub(super) fn prepare_arguments(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let Value::Object(source) = arg(args, 1).untagged() else {
            return Err(fatal("prepareArguments expects the arguments object"));
        };
        let callee = own_data(engine, source, "callee").unwrap_or(Value::Undefined);
        let entries = engine.heap.list_values(source);
        let proto = engine.heap.get(source).proto;

        let id = engine
            .heap
            .alloc(Object::new(proto, ObjectClass::Arguments));
        engine.heap.observe(id);
        let target = Value::Object(id);
        for (i, entry) in entries.iter().enumerate() {
            let tv = TaggedValue::of(entry);
            let key = i.to_string();
            engine.heap.define(id, &key, Property::data(tv.value.clone()));
            if let Some(shadow) = engine.heap.shadow_mut(id) {
                shadow.set(&key, tv.tag.clone());
            }
        }

        let length = Value::Number(entries.len() as f64);
        let length_tag = self.with_policy(|p| p.tag_native_property(&pos, &target, "length", &length))?;
        let callee_tag = self.with_policy(|p| p.tag_callee(&pos, &callee))?;
        let proto_value = proto.map(Value::Object).unwrap_or(Value::Null);
        let proto_tag =
            self.with_policy(|p| p.tag_native_property(&pos, &target, "__proto__", &proto_value))?;
        engine.heap.define(id, "length", Property::hidden(length));
        engine.heap.define(id, "callee", Property::hidden(callee));
        if let Some(shadow) = engine.heap.shadow_mut(id) {
            shadow.set("length", length_tag);
            shadow.set("callee", callee_tag);
            shadow.proto_tag = proto_tag;
        }

        let tag = self.with_policy(|p| p.tag_literal(&pos, &target))?;
        Ok(Value::Tagged(TaggedValue::new(target, tag)))
    }

    // ----- activations -----

    pub(super) fn enter_function(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let arguments = arg(args, 1).untagged();
        let callee = match arguments {
            Value::Object(id) => own_data(engine, id, "callee").unwrap_or(Value::Undefined),
            _ => return Err(fatal("enterFunction expects the prepared arguments object")),
        };
        let receiver = tagged(args, 2);
        self.with_policy(|p| p.enter_function(&pos, &callee, &arguments, &receiver))?;
        Ok(Value::Undefined)
    }

    pub(super) fn return_from_function(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        let value = tagged(args, 2);
        self.with_policy(|p| p.return_from_function(&pos, &value))?;
        Ok(Value::Tagged(value))
    }

    pub(super) fn leave_function(&self, engine: &mut Engine, args: &[Value]) -> Completion {
        let pos = Position::from_value(engine, &arg(args, 0))?;
        self.with_policy(|p| p.leave_function(&pos))?;
        Ok(Value::Undefined)
    }
}

