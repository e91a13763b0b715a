use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::heap::{Closure, FunctionKind, Object, ObjectClass, Property, Resolved, Slot};
use super::{Abrupt, Completion, Engine, ErrorKind, ObjectId, Value};
use crate::ast::{self, Expr, Function, Lit, LogicalOp, Program, PropKind, Stmt, UnaryOp};

pub type Env = Rc<RefCell<Scope>>;

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// Declarative environment record. The chain ends at the global scope, whose
/// variables are properties of the global object.
#[derive(Debug)]
pub struct Scope {
    vars: BTreeMap<String, Binding>,
    parent: Option<Env>,
    this: Option<Value>,
}

pub(super) fn global_env(global: Value) -> Env {
    Rc::new(RefCell::new(Scope {
        vars: BTreeMap::new(),
        parent: None,
        this: Some(global),
    }))
}

fn child_env(parent: &Env, this: Option<Value>) -> Env {
    Rc::new(RefCell::new(Scope {
        vars: BTreeMap::new(),
        parent: Some(parent.clone()),
        this,
    }))
}

fn bind(env: &Env, name: &str, value: Value, mutable: bool) {
    env.borrow_mut()
        .vars
        .insert(name.to_string(), Binding { value, mutable });
}

#[derive(Debug)]
enum Flow {
    Normal,
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
}

/// What a loop body's completion means for the loop itself.
enum LoopStep {
    Next,
    Exit,
    Propagate(Flow),
}

fn loop_step(flow: Flow, labels: &[String]) -> LoopStep {
    match flow {
        Flow::Normal | Flow::Continue(None) => LoopStep::Next,
        Flow::Continue(Some(l)) if labels.contains(&l) => LoopStep::Next,
        Flow::Break(None) => LoopStep::Exit,
        Flow::Break(Some(l)) if labels.contains(&l) => LoopStep::Exit,
        other => LoopStep::Propagate(other),
    }
}

fn lit_value(lit: &Lit) -> Value {
    match lit {
        Lit::Null => Value::Null,
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Number(n) => Value::Number(*n),
        Lit::String(s) => Value::str(s),
    }
}

impl Engine {
    pub(super) fn exec_program(&mut self, program: &Program, env: &Env) -> Completion<()> {
        let global = self.global;
        for name in ast::var_names(&program.body) {
            if !self.heap.has_own(global, &name) {
                self.heap.define(
                    global,
                    &name,
                    Property {
                        configurable: false,
                        ..Property::data(Value::Undefined)
                    },
                );
            }
        }
        for f in ast::function_declarations(&program.body) {
            let closure = self.make_closure(f, env, false);
            if let Some(name) = &f.id {
                self.put(&Value::Object(global), name, closure)?;
            }
        }
        match self.exec_list(&program.body, env)? {
            Flow::Normal => Ok(()),
            other => Err(Abrupt::Fatal(anyhow::anyhow!(
                "control flow escaped the program: {other:?}"
            ))),
        }
    }

    pub(super) fn invoke_closure(
        &mut self,
        callee: ObjectId,
        closure: &Closure,
        this: Value,
        args: &[Value],
        fill: Value,
    ) -> Completion {
        let this = if this.is_nullish() {
            Value::Object(self.global)
        } else {
            this
        };
        let env = child_env(&closure.env, Some(this));
        let f = &closure.function;
        if closure.binds_self {
            if let Some(id) = &f.id {
                bind(&env, id, Value::Object(callee), false);
            }
        }
        for (i, p) in f.params.iter().enumerate() {
            let v = args.get(i).cloned().unwrap_or_else(|| fill.clone());
            bind(&env, p, v, true);
        }
        if !f.params.iter().any(|p| p == "arguments") {
            let arguments = self.make_arguments(callee, args);
            bind(&env, "arguments", Value::Object(arguments), true);
        }
        for name in ast::var_names(&f.body) {
            let declared = env.borrow().vars.contains_key(&name);
            if !declared {
                bind(&env, &name, Value::Undefined, true);
            }
        }
        for decl in ast::function_declarations(&f.body) {
            let v = self.make_closure(decl, &env, false);
            if let Some(name) = &decl.id {
                bind(&env, name, v, true);
            }
        }
        match self.exec_list(&f.body, &env)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Undefined),
        }
    }

    fn make_arguments(&mut self, callee: ObjectId, args: &[Value]) -> ObjectId {
        let proto = self.intrinsics.object_prototype;
        let id = self
            .heap
            .alloc(Object::new(Some(proto), ObjectClass::Arguments));
        for (i, a) in args.iter().enumerate() {
            self.heap.define(id, &i.to_string(), Property::data(a.clone()));
        }
        self.heap.define(
            id,
            "length",
            Property::hidden(Value::Number(args.len() as f64)),
        );
        self.heap
            .define(id, "callee", Property::hidden(Value::Object(callee)));
        id
    }

    pub(super) fn make_closure(&mut self, f: &Function, env: &Env, binds_self: bool) -> Value {
        let closure = Closure {
            function: Rc::new(f.clone()),
            env: env.clone(),
            binds_self: binds_self && f.id.is_some(),
        };
        let fproto = self.intrinsics.function_prototype;
        let id = self.heap.alloc(Object::new(
            Some(fproto),
            ObjectClass::Function(FunctionKind::Closure(Rc::new(closure))),
        ));
        self.heap.define(
            id,
            "length",
            Property {
                slot: Slot::Data {
                    value: Value::Number(f.params.len() as f64),
                    writable: false,
                },
                enumerable: false,
                configurable: true,
            },
        );
        let proto = self.new_object();
        self.heap
            .define(proto, "constructor", Property::hidden(Value::Object(id)));
        self.heap.define(
            id,
            "prototype",
            Property {
                configurable: false,
                ..Property::hidden(Value::Object(proto))
            },
        );
        Value::Object(id)
    }

    // ----- environments -----

    fn lookup_binding(env: &Env, name: &str) -> Option<Value> {
        let mut cur = Some(env.clone());
        while let Some(scope) = cur {
            let s = scope.borrow();
            if let Some(b) = s.vars.get(name) {
                return Some(b.value.clone());
            }
            cur = s.parent.clone();
        }
        None
    }

    fn lookup(&mut self, env: &Env, name: &str) -> Completion {
        if let Some(v) = Self::lookup_binding(env, name) {
            return Ok(v);
        }
        let global = Value::Object(self.global);
        match self.heap.resolve(self.global, name) {
            Resolved::Absent => Err(self.throw(
                ErrorKind::ReferenceError,
                format!("{name} is not defined"),
            )),
            _ => self.get(&global, name),
        }
    }

    fn assign(&mut self, env: &Env, name: &str, value: Value) -> Completion<()> {
        let mut cur = Some(env.clone());
        while let Some(scope) = cur {
            let mut s = scope.borrow_mut();
            if let Some(b) = s.vars.get_mut(name) {
                if b.mutable {
                    b.value = value;
                }
                return Ok(());
            }
            cur = s.parent.clone();
        }
        let global = Value::Object(self.global);
        self.put(&global, name, value)?;
        Ok(())
    }

    fn this_value(&self, env: &Env) -> Value {
        let mut cur = Some(env.clone());
        while let Some(scope) = cur {
            let s = scope.borrow();
            if let Some(this) = &s.this {
                return this.clone();
            }
            cur = s.parent.clone();
        }
        Value::Object(self.global)
    }

    // ----- statements -----

    fn exec_list(&mut self, stmts: &[Stmt], env: &Env) -> Completion<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env, &[])? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env, labels: &[String]) -> Completion<Flow> {
        match stmt {
            Stmt::VariableDeclaration { declarations, .. } => {
                for d in declarations {
                    if let Some(init) = &d.init {
                        let v = self.eval(init, env)?;
                        self.assign(env, &d.id, v)?;
                    }
                }
                Ok(Flow::Normal)
            }
            // Bound when the enclosing body was entered.
            Stmt::FunctionDeclaration { .. } | Stmt::EmptyStatement { .. } => Ok(Flow::Normal),
            Stmt::ExpressionStatement { expression, .. } => {
                self.eval(expression, env)?;
                Ok(Flow::Normal)
            }
            Stmt::BlockStatement { body, .. } => self.exec_list(body, env),
            Stmt::IfStatement {
                test,
                consequent,
                alternate,
                ..
            } => {
                let t = self.eval(test, env)?;
                if self.to_boolean(&t) {
                    self.exec_stmt(consequent, env, &[])
                } else if let Some(alt) = alternate {
                    self.exec_stmt(alt, env, &[])
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::WhileStatement { test, body, .. } => {
                loop {
                    let t = self.eval(test, env)?;
                    if !self.to_boolean(&t) {
                        break;
                    }
                    match loop_step(self.exec_stmt(body, env, &[])?, labels) {
                        LoopStep::Next => {}
                        LoopStep::Exit => break,
                        LoopStep::Propagate(flow) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhileStatement { body, test, .. } => {
                loop {
                    match loop_step(self.exec_stmt(body, env, &[])?, labels) {
                        LoopStep::Next => {}
                        LoopStep::Exit => break,
                        LoopStep::Propagate(flow) => return Ok(flow),
                    }
                    let t = self.eval(test, env)?;
                    if !self.to_boolean(&t) {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForInStatement {
                left, right, body, ..
            } => {
                let target = self.eval(right, env)?;
                let keys = self.for_in_keys(&target);
                for key in keys {
                    if let Value::Object(id) = target {
                        if !self.has_property(id, &key) {
                            continue;
                        }
                    }
                    self.assign(env, left, Value::str(&key))?;
                    match loop_step(self.exec_stmt(body, env, &[])?, labels) {
                        LoopStep::Next => {}
                        LoopStep::Exit => break,
                        LoopStep::Propagate(flow) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::LabeledStatement { label, body, .. } => {
                let mut inner: Vec<String> = labels.to_vec();
                inner.push(label.clone());
                match self.exec_stmt(body, env, &inner)? {
                    Flow::Break(Some(l)) if &l == label => Ok(Flow::Normal),
                    other => Ok(other),
                }
            }
            Stmt::BreakStatement { label, .. } => Ok(Flow::Break(label.clone())),
            Stmt::ContinueStatement { label, .. } => Ok(Flow::Continue(label.clone())),
            Stmt::ReturnStatement { argument, .. } => {
                let v = match argument {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(v))
            }
            Stmt::ThrowStatement { argument, .. } => {
                let v = self.eval(argument, env)?;
                Err(Abrupt::Throw(v))
            }
            Stmt::TryStatement {
                block,
                handler,
                finalizer,
                ..
            } => {
                let res = match (self.exec_list(block, env), handler) {
                    (Err(Abrupt::Throw(exc)), Some(h)) => {
                        let catch_env = child_env(env, None);
                        bind(&catch_env, &h.param, exc, true);
                        self.exec_list(&h.body, &catch_env)
                    }
                    (other, _) => other,
                };
                let bypass = matches!(res, Err(Abrupt::Policy(_) | Abrupt::Fatal(_)));
                match finalizer {
                    Some(fin) if !bypass => match self.exec_list(fin, env)? {
                        Flow::Normal => res,
                        abrupt => Ok(abrupt),
                    },
                    _ => res,
                }
            }
        }
    }

    /// Enumerable string keys of `target` and its prototypes, shadowed keys
    /// listed once.
    fn for_in_keys(&self, target: &Value) -> Vec<String> {
        match target {
            Value::Object(id) => {
                let mut seen: Vec<String> = Vec::new();
                let mut out = Vec::new();
                let mut cur = Some(*id);
                while let Some(obj) = cur {
                    for key in self.heap.own_keys(obj, false) {
                        if seen.contains(&key) {
                            continue;
                        }
                        seen.push(key.clone());
                        let enumerable = self
                            .heap
                            .get_own(obj, &key)
                            .is_some_and(|p| p.enumerable);
                        if enumerable {
                            out.push(key);
                        }
                    }
                    cur = self.heap.get(obj).proto;
                }
                out
            }
            Value::Str(s) => (0..s.encode_utf16().count()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    // ----- expressions -----

    fn property_key(&mut self, property: &Expr, computed: bool, env: &Env) -> Completion<String> {
        if !computed {
            if let Some(name) = property.static_name() {
                return Ok(name.to_string());
            }
        }
        let k = self.eval(property, env)?;
        self.to_string(&k)
    }

    pub(super) fn eval(&mut self, expr: &Expr, env: &Env) -> Completion {
        match expr {
            Expr::Identifier { name } => self.lookup(env, name),
            Expr::Literal { value } => Ok(lit_value(value)),
            Expr::ThisExpression => Ok(self.this_value(env)),
            Expr::FunctionExpression(f) => Ok(self.make_closure(f, env, true)),
            Expr::ObjectExpression { properties } => {
                let id = self.new_object();
                for p in properties {
                    let v = self.eval(&p.value, env)?;
                    match p.kind {
                        PropKind::Init => self.heap.define(id, &p.key, Property::data(v)),
                        PropKind::Get | PropKind::Set => {
                            let f = v.as_object();
                            let (mut get, mut set) = match self.heap.get_own(id, &p.key) {
                                Some(Property {
                                    slot: Slot::Accessor { get, set },
                                    ..
                                }) => (*get, *set),
                                _ => (None, None),
                            };
                            if p.kind == PropKind::Get {
                                get = f;
                            } else {
                                set = f;
                            }
                            self.heap.define(
                                id,
                                &p.key,
                                Property {
                                    slot: Slot::Accessor { get, set },
                                    enumerable: true,
                                    configurable: true,
                                },
                            );
                        }
                    }
                }
                Ok(Value::Object(id))
            }
            Expr::ArrayExpression { elements } => {
                let id = self.new_array(Vec::new());
                for (i, e) in elements.iter().enumerate() {
                    if let Some(e) = e {
                        let v = self.eval(e, env)?;
                        self.heap.write_own(id, &i.to_string(), v);
                    }
                }
                self.heap.set_array_length(id, elements.len() as u32);
                Ok(Value::Object(id))
            }
            Expr::MemberExpression {
                object,
                property,
                computed,
            } => {
                let base = self.eval(object, env)?;
                let key = self.property_key(property, *computed, env)?;
                self.get(&base, &key)
            }
            Expr::CallExpression { callee, arguments } => {
                let (f, this) = match callee.as_ref() {
                    Expr::MemberExpression {
                        object,
                        property,
                        computed,
                    } => {
                        let base = self.eval(object, env)?;
                        let key = self.property_key(property, *computed, env)?;
                        (self.get(&base, &key)?, base)
                    }
                    other => (self.eval(other, env)?, Value::Undefined),
                };
                let args = self.eval_list(arguments, env)?;
                self.call_function(&f, this, &args)
            }
            Expr::NewExpression { callee, arguments } => {
                let f = self.eval(callee, env)?;
                let args = self.eval_list(arguments, env)?;
                self.construct(&f, &args)
            }
            Expr::UnaryExpression { operator, argument } => match (operator, argument.as_ref()) {
                (UnaryOp::Typeof, Expr::Identifier { name }) => {
                    let v = match Self::lookup_binding(env, name) {
                        Some(v) => v,
                        None if self.has_property(self.global, name) => self.lookup(env, name)?,
                        None => Value::Undefined,
                    };
                    Ok(Value::str(self.type_of(&v)))
                }
                (
                    UnaryOp::Delete,
                    Expr::MemberExpression {
                        object,
                        property,
                        computed,
                    },
                ) => {
                    let base = self.eval(object, env)?;
                    let key = self.property_key(property, *computed, env)?;
                    Ok(Value::Bool(self.delete_property(&base, &key)?))
                }
                (UnaryOp::Delete, Expr::Identifier { .. }) => Ok(Value::Bool(false)),
                (UnaryOp::Delete, other) => {
                    self.eval(other, env)?;
                    Ok(Value::Bool(true))
                }
                (op, arg) => {
                    let v = self.eval(arg, env)?;
                    self.unary_op(*op, &v)
                }
            },
            Expr::BinaryExpression {
                operator,
                left,
                right,
            } => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                self.binary_op(*operator, &l, &r)
            }
            Expr::LogicalExpression {
                operator,
                left,
                right,
            } => {
                let l = self.eval(left, env)?;
                let truthy = self.to_boolean(&l);
                match (operator, truthy) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(l),
                    _ => self.eval(right, env),
                }
            }
            Expr::AssignmentExpression { left, right, .. } => match left.as_ref() {
                Expr::Identifier { name } => {
                    let v = self.eval(right, env)?;
                    self.assign(env, name, v.clone())?;
                    Ok(v)
                }
                Expr::MemberExpression {
                    object,
                    property,
                    computed,
                } => {
                    let base = self.eval(object, env)?;
                    let key = self.property_key(property, *computed, env)?;
                    let v = self.eval(right, env)?;
                    self.put(&base, &key, v.clone())?;
                    Ok(v)
                }
                other => Err(Abrupt::Fatal(anyhow::anyhow!(
                    "invalid assignment target: {}",
                    other.kind()
                ))),
            },
            Expr::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                let t = self.eval(test, env)?;
                if self.to_boolean(&t) {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
        }
    }

    fn eval_list(&mut self, exprs: &[Expr], env: &Env) -> Completion<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }
}
