use std::collections::{HashMap, HashSet};

use tagflow_contracts::RESERVED_PREFIX;

use crate::engine::{array_index, Engine, ObjectId, Property, Slot, Value};

/// Access paths of the built-in functions reachable from the global object,
/// such as `Math.max` or `Array.prototype.push`.
#[derive(Debug, Clone, Default)]
pub struct NativePaths {
    paths: HashMap<ObjectId, String>,
}

impl NativePaths {
    /// Depth-first walk over own data properties. A function reachable along
    /// several paths keeps the first one found. Index keys and reserved names
    /// are skipped.
    pub(crate) fn collect(engine: &Engine) -> Self {
        let mut walk = Walk {
            engine,
            visited: HashSet::new(),
            path: Vec::new(),
            paths: HashMap::new(),
        };
        walk.visit(engine.global);
        NativePaths { paths: walk.paths }
    }

    pub fn get(&self, function: &Value) -> Option<&str> {
        match function.untagged() {
            Value::Object(id) => self.paths.get(&id).map(String::as_str),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

struct Walk<'a> {
    engine: &'a Engine,
    visited: HashSet<ObjectId>,
    path: Vec<String>,
    paths: HashMap<ObjectId, String>,
}

impl Walk<'_> {
    fn visit(&mut self, id: ObjectId) {
        if !self.visited.insert(id) {
            return;
        }
        if !self.path.is_empty() && self.engine.is_native_function(&Value::Object(id)) {
            self.paths.insert(id, self.path.join("."));
        }
        for key in self.engine.heap.own_keys(id, false) {
            if array_index(&key).is_some() || key.starts_with(RESERVED_PREFIX) {
                continue;
            }
            let child = match self.engine.heap.get_own(id, &key) {
                Some(Property {
                    slot: Slot::Data {
                        value: Value::Object(child),
                        ..
                    },
                    ..
                }) => *child,
                _ => continue,
            };
            self.path.push(key);
            self.visit(child);
            self.path.pop();
        }
    }
}
