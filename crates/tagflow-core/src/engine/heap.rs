use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::interp::Env;
use super::{Completion, Engine, ObjectId, Value};
use crate::ast::Function;
use crate::runtime::ShadowTable;

/// Host built-in: `(engine, this, args) -> result`.
pub type NativeFn = Rc<dyn Fn(&mut Engine, &Value, &[Value]) -> Completion>;

pub struct NativeFunction {
    pub name: Rc<str>,
    pub call: NativeFn,
    /// Whether `new` may be applied; the call result becomes the instance.
    pub constructor: bool,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("constructor", &self.constructor)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Closure {
    pub function: Rc<Function>,
    pub env: Env,
    /// Named function expression: its own name is bound (read-only) in the body.
    pub binds_self: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionKind {
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

#[derive(Debug, Clone)]
pub enum ObjectClass {
    Ordinary,
    Array,
    Function(FunctionKind),
    Arguments,
    Error,
}

#[derive(Debug, Clone)]
pub enum Slot {
    Data { value: Value, writable: bool },
    Accessor {
        get: Option<ObjectId>,
        set: Option<ObjectId>,
    },
}

#[derive(Debug, Clone)]
pub struct Property {
    pub slot: Slot,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    pub fn data(value: Value) -> Self {
        Property {
            slot: Slot::Data {
                value,
                writable: true,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable, configurable, not enumerable: the shape of built-in methods.
    pub fn hidden(value: Value) -> Self {
        Property {
            enumerable: false,
            ..Property::data(value)
        }
    }
}

#[derive(Debug)]
pub struct Object {
    pub proto: Option<ObjectId>,
    pub class: ObjectClass,
    pub props: IndexMap<String, Property>,
    pub shadow: Option<ShadowTable>,
}

impl Object {
    pub fn new(proto: Option<ObjectId>, class: ObjectClass) -> Self {
        Object {
            proto,
            class,
            props: IndexMap::new(),
            shadow: None,
        }
    }

    pub fn function_kind(&self) -> Option<&FunctionKind> {
        match &self.class {
            ObjectClass::Function(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Result of looking a key up along the prototype chain.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// `holder` is `None` for virtual properties of primitives (string length
    /// and indices).
    Data {
        holder: Option<ObjectId>,
        value: Value,
    },
    Accessor {
        holder: ObjectId,
        get: Option<ObjectId>,
        set: Option<ObjectId>,
    },
    Absent,
}

/// Canonical array index (`"0"`, `"17"`, never `"01"`).
pub fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|n| *n != u32::MAX)
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn alloc(&mut self, object: Object) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(object);
        id
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.index()]
    }

    pub fn function_kind(&self, id: ObjectId) -> Option<FunctionKind> {
        self.get(id).function_kind().cloned()
    }

    pub fn is_callable(&self, id: ObjectId) -> bool {
        self.get(id).function_kind().is_some()
    }

    pub fn is_array(&self, id: ObjectId) -> bool {
        matches!(self.get(id).class, ObjectClass::Array)
    }

    pub fn get_own(&self, id: ObjectId, key: &str) -> Option<&Property> {
        self.get(id).props.get(key)
    }

    pub fn has_own(&self, id: ObjectId, key: &str) -> bool {
        self.get(id).props.contains_key(key)
    }

    /// Walks `id` and its prototypes for `key`.
    pub fn resolve(&self, id: ObjectId, key: &str) -> Resolved {
        let mut cur = Some(id);
        while let Some(holder) = cur {
            let obj = self.get(holder);
            if let Some(prop) = obj.props.get(key) {
                return match &prop.slot {
                    Slot::Data { value, .. } => Resolved::Data {
                        holder: Some(holder),
                        value: value.clone(),
                    },
                    Slot::Accessor { get, set } => Resolved::Accessor {
                        holder,
                        get: *get,
                        set: *set,
                    },
                };
            }
            cur = obj.proto;
        }
        Resolved::Absent
    }

    /// Own keys in enumeration order: array indices ascending, then the rest
    /// in insertion order.
    pub fn own_keys(&self, id: ObjectId, only_enumerable: bool) -> Vec<String> {
        let obj = self.get(id);
        let mut indices: Vec<(u32, &String)> = Vec::new();
        let mut names: Vec<&String> = Vec::new();
        for (key, prop) in &obj.props {
            if only_enumerable && !prop.enumerable {
                continue;
            }
            match array_index(key) {
                Some(i) => indices.push((i, key)),
                None => names.push(key),
            }
        }
        indices.sort_by_key(|(i, _)| *i);
        indices
            .into_iter()
            .map(|(_, k)| k.clone())
            .chain(names.into_iter().cloned())
            .collect()
    }

    pub fn define(&mut self, id: ObjectId, key: &str, prop: Property) {
        self.get_mut(id).props.insert(key.to_string(), prop);
        self.after_index_write(id, key);
    }

    /// Plain data write on `id` itself. Fails only on a read-only or accessor
    /// own property.
    pub fn write_own(&mut self, id: ObjectId, key: &str, value: Value) -> bool {
        let obj = self.get_mut(id);
        match obj.props.get_mut(key) {
            Some(prop) => match &mut prop.slot {
                Slot::Data {
                    value: slot,
                    writable: true,
                } => *slot = value,
                _ => return false,
            },
            None => {
                obj.props.insert(key.to_string(), Property::data(value));
            }
        }
        self.after_index_write(id, key);
        true
    }

    pub fn delete(&mut self, id: ObjectId, key: &str) -> bool {
        let obj = self.get_mut(id);
        match obj.props.get(key) {
            Some(prop) if !prop.configurable => false,
            Some(_) => {
                obj.props.shift_remove(key);
                true
            }
            None => true,
        }
    }

    pub fn array_length(&self, id: ObjectId) -> u32 {
        match self.get_own(id, "length").map(|p| &p.slot) {
            Some(Slot::Data {
                value: Value::Number(n),
                ..
            }) => *n as u32,
            _ => 0,
        }
    }

    /// Sets `length` of an array, dropping indices at or above it. Returns
    /// the dropped keys.
    pub fn set_array_length(&mut self, id: ObjectId, len: u32) -> Vec<String> {
        let obj = self.get_mut(id);
        let dropped: Vec<String> = obj
            .props
            .keys()
            .filter(|k| array_index(k).is_some_and(|i| i >= len))
            .cloned()
            .collect();
        for key in &dropped {
            obj.props.shift_remove(key);
        }
        obj.props.insert(
            "length".to_string(),
            Property {
                slot: Slot::Data {
                    value: Value::Number(len as f64),
                    writable: true,
                },
                enumerable: false,
                configurable: false,
            },
        );
        dropped
    }

    fn after_index_write(&mut self, id: ObjectId, key: &str) {
        if !self.is_array(id) {
            return;
        }
        if let Some(i) = array_index(key) {
            if i >= self.array_length(id) {
                self.set_array_length(id, i + 1);
            }
        }
    }

    /// Positional values of an array-like object, `undefined` for holes.
    pub fn list_values(&self, id: ObjectId) -> Vec<Value> {
        let len = self.array_length(id);
        (0..len)
            .map(|i| match self.get_own(id, &i.to_string()).map(|p| &p.slot) {
                Some(Slot::Data { value, .. }) => value.clone(),
                _ => Value::Undefined,
            })
            .collect()
    }

    pub fn shadow(&self, id: ObjectId) -> Option<&ShadowTable> {
        self.get(id).shadow.as_ref()
    }

    pub fn shadow_mut(&mut self, id: ObjectId) -> Option<&mut ShadowTable> {
        self.get_mut(id).shadow.as_mut()
    }

    /// Attaches an empty shadow table if none is present. Returns true when
    /// the table was created by this call.
    pub fn observe(&mut self, id: ObjectId) -> bool {
        let obj = self.get_mut(id);
        if obj.shadow.is_some() {
            return false;
        }
        obj.shadow = Some(ShadowTable::default());
        true
    }
}
