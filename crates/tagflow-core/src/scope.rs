//! Lexical scope stack used by the instrumentor to classify identifiers.

use std::collections::BTreeMap;

use tagflow_contracts::ARGUMENTS;

use crate::ast::{self, Function};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Parameter, `var`, hoisted function, catch parameter or `arguments`.
    Local,
    /// Own name of the innermost named function expression that binds it.
    SelfName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Local,
    SelfName,
    /// Free identifier: a property of the global object.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Function,
    Catch,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    names: BTreeMap<String, Binding>,
}

/// Scopes of the function and catch clauses enclosing the current node. The
/// program top level has no scope: its `var`s live on the global object.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack::default()
    }

    /// Enters `function`. `is_expression` controls whether its own name is
    /// bound inside the body.
    pub fn enter_function(&mut self, function: &Function, is_expression: bool) {
        let mut names = BTreeMap::new();
        if is_expression {
            if let Some(id) = &function.id {
                names.insert(id.clone(), Binding::SelfName);
            }
        }
        names.insert(ARGUMENTS.to_string(), Binding::Local);
        for p in &function.params {
            names.insert(p.clone(), Binding::Local);
        }
        for v in ast::var_names(&function.body) {
            names.insert(v, Binding::Local);
        }
        self.scopes.push(Scope {
            kind: ScopeKind::Function,
            names,
        });
    }

    pub fn enter_catch(&mut self, param: &str) {
        let mut names = BTreeMap::new();
        names.insert(param.to_string(), Binding::Local);
        self.scopes.push(Scope {
            kind: ScopeKind::Catch,
            names,
        });
    }

    pub fn exit_scope(&mut self) {
        let _ = self.scopes.pop();
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        for scope in self.scopes.iter().rev() {
            match scope.names.get(name) {
                Some(Binding::Local) => return Resolution::Local,
                Some(Binding::SelfName) => return Resolution::SelfName,
                None => {}
            }
        }
        Resolution::Global
    }

    pub fn in_function(&self) -> bool {
        self.scopes.iter().any(|s| s.kind == ScopeKind::Function)
    }
}
