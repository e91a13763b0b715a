//! Source-to-source instrumentation.
//!
//! Takes a program in canonical form (every operand an identifier, literal or
//! `this`) and rewrites it so each value-producing or value-consuming
//! operation is a call into the shadow runtime bound as `__rt`. The result
//! behaves like the input under the host engine, except that values are tagged.

mod build;
mod validate;

use anyhow::{Context, Result};
use log::debug;
use tagflow_contracts::{call_kind, hooks, ARGUMENTS};

use crate::ast::{Expr, Function, PropKind, Program, Span, Stmt, UnaryOp};
use crate::config::InstrumentOptions;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::normalize::normalize_program;
use crate::scope::{Resolution, ScopeStack};

use build::{
    array, assign, boolean, expr_stmt, hook, ident, member, null, object, position,
    return_stmt, single, string, void_zero,
};

pub fn instrument_program(program: &Program, options: &InstrumentOptions) -> Result<Program> {
    validate::validate_program(program)?;
    let mut program = program.clone();
    normalize_program(&mut program, options.unify_returns).context("normalize program")?;

    let mut ctx = Ctx::new(&options.url, options.unify_returns);
    let mut body = Vec::with_capacity(program.body.len());
    for stmt in program.body {
        instrument_stmt(&mut ctx, stmt, &mut body)?;
    }

    let span = program.span;
    let pos = ctx.pos(span);
    let out = Program {
        body: vec![
            expr_stmt(hook(hooks::WRAP_GLOBAL, vec![pos.clone()]), span),
            expr_stmt(hook(hooks::ENTER_SCRIPT, vec![pos.clone()]), span),
            Stmt::TryStatement {
                block: body,
                handler: None,
                finalizer: Some(vec![expr_stmt(hook(hooks::LEAVE_SCRIPT, vec![pos]), span)]),
                span,
            },
        ],
        span,
    };
    debug!(
        "instrumented {}: {} functions",
        options.url, ctx.functions
    );
    Ok(out)
}

#[derive(Debug)]
struct Ctx<'a> {
    url: &'a str,
    unify_returns: bool,
    scopes: ScopeStack,
    functions: usize,
}

impl<'a> Ctx<'a> {
    fn new(url: &'a str, unify_returns: bool) -> Self {
        Ctx {
            url,
            unify_returns,
            scopes: ScopeStack::new(),
            functions: 0,
        }
    }

    fn pos(&self, span: Span) -> Expr {
        position(self.url, span)
    }
}

fn unsupported(code: DiagnosticCode, span: Span, message: impl Into<String>) -> anyhow::Error {
    Diagnostic::unsupported(code, span, message).into()
}

// ----- statements -----

fn instrument_stmts(ctx: &mut Ctx<'_>, stmts: Vec<Stmt>) -> Result<Vec<Stmt>> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        instrument_stmt(ctx, stmt, &mut out)?;
    }
    Ok(out)
}

fn instrument_boxed(ctx: &mut Ctx<'_>, stmt: Stmt) -> Result<Box<Stmt>> {
    let span = stmt.span();
    let mut out = Vec::new();
    instrument_stmt(ctx, stmt, &mut out)?;
    Ok(Box::new(single(out, span)))
}

fn instrument_stmt(ctx: &mut Ctx<'_>, stmt: Stmt, out: &mut Vec<Stmt>) -> Result<()> {
    match stmt {
        Stmt::VariableDeclaration {
            mut declarations,
            span,
        } => {
            let mut deferred = Vec::new();
            for d in &mut declarations {
                let Some(init) = d.init.take() else { continue };
                let value = instrument_rhs(ctx, init, span)?;
                match ctx.scopes.resolve(&d.id) {
                    Resolution::Local => d.init = Some(value),
                    _ => deferred.push(store_variable(ctx, &d.id, value, span)?),
                }
            }
            out.push(Stmt::VariableDeclaration { declarations, span });
            out.extend(deferred);
        }
        Stmt::FunctionDeclaration { span, .. } => {
            return Err(unsupported(
                DiagnosticCode::TFI0901InternalBug,
                span,
                "function declaration survived normalization",
            ));
        }
        Stmt::ExpressionStatement { expression, span } => match expression {
            Expr::AssignmentExpression { left, right, .. } => {
                let value = instrument_rhs(ctx, *right, span)?;
                match *left {
                    Expr::Identifier { name } => {
                        out.push(store_variable(ctx, &name, value, span)?);
                    }
                    Expr::MemberExpression {
                        object,
                        property,
                        computed,
                    } => {
                        let pos = ctx.pos(span);
                        let object = instrument_atom(ctx, *object, span)?;
                        let key = property_key(ctx, *property, computed, span)?;
                        out.push(expr_stmt(
                            hook(
                                hooks::PROPWRITE,
                                vec![pos, object, key, value, boolean(computed)],
                            ),
                            span,
                        ));
                    }
                    other => {
                        return Err(unsupported(
                            DiagnosticCode::TFI0120UnsupportedAssignTarget,
                            span,
                            format!("cannot assign to {}", other.kind()),
                        ))
                    }
                }
            }
            other => out.push(expr_stmt(instrument_rhs(ctx, other, span)?, span)),
        },
        Stmt::BlockStatement { body, span } => out.push(Stmt::BlockStatement {
            body: instrument_stmts(ctx, body)?,
            span,
        }),
        Stmt::IfStatement {
            test,
            consequent,
            alternate,
            span,
        } => {
            let test = unwrapped(ctx, test, span)?;
            let consequent = instrument_boxed(ctx, *consequent)?;
            let alternate = match alternate {
                Some(alt) => Some(instrument_boxed(ctx, *alt)?),
                None => None,
            };
            out.push(Stmt::IfStatement {
                test,
                consequent,
                alternate,
                span,
            });
        }
        Stmt::WhileStatement { test, body, span } => out.push(Stmt::WhileStatement {
            test: unwrapped(ctx, test, span)?,
            body: instrument_boxed(ctx, *body)?,
            span,
        }),
        Stmt::DoWhileStatement { body, test, span } => out.push(Stmt::DoWhileStatement {
            body: instrument_boxed(ctx, *body)?,
            test: unwrapped(ctx, test, span)?,
            span,
        }),
        Stmt::ForInStatement {
            left,
            declare,
            right,
            body,
            span,
        } => {
            let right = unwrapped(ctx, right, span)?;
            let pos = ctx.pos(span);
            let rewrap = hook(hooks::WRAP_FOR_IN_VAR, vec![pos, ident(&left)]);
            let mut inner = Vec::new();
            if ctx.scopes.resolve(&left) != Resolution::SelfName {
                inner.push(store_variable(ctx, &left, rewrap, span)?);
            }
            let body_span = body.span();
            instrument_stmt(ctx, *body, &mut inner)?;
            out.push(Stmt::ForInStatement {
                left,
                declare,
                right,
                body: Box::new(Stmt::BlockStatement {
                    body: inner,
                    span: body_span,
                }),
                span,
            });
        }
        Stmt::LabeledStatement { label, body, span } => out.push(Stmt::LabeledStatement {
            label,
            body: instrument_boxed(ctx, *body)?,
            span,
        }),
        stmt @ (Stmt::BreakStatement { .. }
        | Stmt::ContinueStatement { .. }
        | Stmt::EmptyStatement { .. }) => out.push(stmt),
        Stmt::ReturnStatement { argument, span } => {
            if !ctx.scopes.in_function() {
                return Err(unsupported(
                    DiagnosticCode::TFI0300ReturnOutsideFunction,
                    span,
                    "return at program top level",
                ));
            }
            let value = match argument {
                Some(arg) => instrument_rhs(ctx, arg, span)?,
                None => literal(ctx, void_zero(), span),
            };
            out.push(return_through_runtime(ctx, value, span));
        }
        Stmt::ThrowStatement { argument, span } => out.push(Stmt::ThrowStatement {
            argument: instrument_atom(ctx, argument, span)?,
            span,
        }),
        Stmt::TryStatement {
            block,
            handler,
            finalizer,
            span,
        } => {
            let block = instrument_stmts(ctx, block)?;
            let handler = match handler {
                Some(mut h) => {
                    ctx.scopes.enter_catch(&h.param);
                    let pos = ctx.pos(span);
                    let rewrap = hook(hooks::WRAP_NATIVE_EXCEPTION, vec![pos, ident(&h.param)]);
                    let mut body = vec![expr_stmt(assign(&h.param, rewrap), span)];
                    let res = instrument_stmts(ctx, std::mem::take(&mut h.body));
                    ctx.scopes.exit_scope();
                    body.extend(res?);
                    h.body = body;
                    Some(h)
                }
                None => None,
            };
            let finalizer = match finalizer {
                Some(fin) => Some(instrument_stmts(ctx, fin)?),
                None => None,
            };
            out.push(Stmt::TryStatement {
                block,
                handler,
                finalizer,
                span,
            });
        }
    }
    Ok(())
}

/// `name = value` for a free or local variable.
fn store_variable(ctx: &mut Ctx<'_>, name: &str, value: Expr, span: Span) -> Result<Stmt> {
    if name == ARGUMENTS {
        return Err(unsupported(
            DiagnosticCode::TFI0201ArgumentsAssigned,
            span,
            "assignment to `arguments`",
        ));
    }
    Ok(match ctx.scopes.resolve(name) {
        Resolution::Local => expr_stmt(assign(name, value), span),
        // The name of a function expression is read-only inside it.
        Resolution::SelfName => expr_stmt(value, span),
        Resolution::Global => {
            let pos = ctx.pos(span);
            expr_stmt(
                hook(
                    hooks::PROPWRITE,
                    vec![
                        pos,
                        hook(hooks::GLOBAL, Vec::new()),
                        string(name),
                        value,
                        boolean(false),
                    ],
                ),
                span,
            )
        }
    })
}

fn return_through_runtime(ctx: &Ctx<'_>, value: Expr, span: Span) -> Stmt {
    let pos = ctx.pos(span);
    return_stmt(
        hook(hooks::RETURN_FROM_FUNCTION, vec![pos, ident(ARGUMENTS), value]),
        span,
    )
}

fn unwrapped(ctx: &mut Ctx<'_>, test: Expr, span: Span) -> Result<Expr> {
    let atom = instrument_atom(ctx, test, span)?;
    Ok(hook(hooks::UNWRAP, vec![atom]))
}

// ----- expressions -----

fn literal(ctx: &Ctx<'_>, value: Expr, span: Span) -> Expr {
    hook(hooks::WRAP_LITERAL, vec![ctx.pos(span), value])
}

/// Operand position: the value must come out tagged.
fn instrument_atom(ctx: &mut Ctx<'_>, expr: Expr, span: Span) -> Result<Expr> {
    match expr {
        Expr::Identifier { name } => Ok(match ctx.scopes.resolve(&name) {
            Resolution::Local => ident(&name),
            Resolution::SelfName => literal(ctx, ident(&name), span),
            Resolution::Global => {
                let pos = ctx.pos(span);
                hook(hooks::GLOBALREAD, vec![pos, string(&name), boolean(true)])
            }
        }),
        lit @ Expr::Literal { .. } => Ok(literal(ctx, lit, span)),
        Expr::ThisExpression => Ok(if ctx.scopes.in_function() {
            Expr::ThisExpression
        } else {
            hook(hooks::GLOBAL, Vec::new())
        }),
        other => Err(unsupported(
            DiagnosticCode::TFI0130UnsupportedOperand,
            span,
            format!("{} in operand position", other.kind()),
        )),
    }
}

/// Call arguments: atoms, or function literals passed as callbacks.
fn instrument_args(ctx: &mut Ctx<'_>, exprs: Vec<Expr>, span: Span) -> Result<Vec<Expr>> {
    exprs
        .into_iter()
        .map(|e| match e {
            f @ Expr::FunctionExpression(_) => instrument_rhs(ctx, f, span),
            other => instrument_atom(ctx, other, span),
        })
        .collect()
}

/// Key operand of a member access. Static names and literal keys stay raw.
fn property_key(ctx: &mut Ctx<'_>, property: Expr, computed: bool, span: Span) -> Result<Expr> {
    if !computed {
        if let Some(name) = property.static_name() {
            return Ok(string(name));
        }
    }
    match property {
        lit @ Expr::Literal { .. } => Ok(lit),
        other => instrument_atom(ctx, other, span),
    }
}

/// Right-hand side of an assignment or an expression statement.
fn instrument_rhs(ctx: &mut Ctx<'_>, expr: Expr, span: Span) -> Result<Expr> {
    match expr {
        atom @ (Expr::Identifier { .. } | Expr::Literal { .. } | Expr::ThisExpression) => {
            instrument_atom(ctx, atom, span)
        }
        Expr::FunctionExpression(f) => {
            let f = instrument_function(ctx, f)?;
            Ok(literal(ctx, Expr::FunctionExpression(f), span))
        }
        Expr::ObjectExpression { properties } => {
            let mut accessors: Vec<(String, Vec<(String, Expr)>)> = Vec::new();
            let mut out = Vec::with_capacity(properties.len());
            for mut p in properties {
                p.value = match (p.kind, p.value) {
                    (PropKind::Init, value @ Expr::FunctionExpression(_)) => {
                        instrument_rhs(ctx, value, span)?
                    }
                    (PropKind::Init, value) => instrument_atom(ctx, value, span)?,
                    (kind, Expr::FunctionExpression(f)) => {
                        let which = if kind == PropKind::Get { "get" } else { "set" };
                        let fpos = ctx.pos(f.span);
                        match accessors.iter_mut().find(|(k, _)| *k == p.key) {
                            Some((_, entry)) => entry.push((which.to_string(), fpos)),
                            None => accessors.push((p.key.clone(), vec![(which.to_string(), fpos)])),
                        }
                        Expr::FunctionExpression(instrument_function(ctx, f)?)
                    }
                    (_, other) => {
                        return Err(unsupported(
                            DiagnosticCode::TFI0110UnsupportedExpression,
                            span,
                            format!("accessor `{}` is a {}", p.key, other.kind()),
                        ))
                    }
                };
                out.push(p);
            }
            let mut args = vec![ctx.pos(span), Expr::ObjectExpression { properties: out }];
            if !accessors.is_empty() {
                args.push(object(
                    accessors
                        .into_iter()
                        .map(|(key, entry)| (key, object(entry)))
                        .collect(),
                ));
            }
            Ok(hook(hooks::WRAP_LITERAL, args))
        }
        Expr::ArrayExpression { elements } => {
            let mut out = Vec::with_capacity(elements.len());
            for e in elements {
                out.push(match e {
                    Some(e) => Some(instrument_atom(ctx, e, span)?),
                    None => None,
                });
            }
            Ok(literal(ctx, Expr::ArrayExpression { elements: out }, span))
        }
        Expr::MemberExpression {
            object,
            property,
            computed,
        } => {
            let pos = ctx.pos(span);
            let object = instrument_atom(ctx, *object, span)?;
            let key = property_key(ctx, *property, computed, span)?;
            Ok(hook(
                hooks::PROPREAD,
                vec![pos, object, key, boolean(computed)],
            ))
        }
        Expr::CallExpression { callee, arguments } => {
            let pos = ctx.pos(span);
            match *callee {
                Expr::MemberExpression {
                    object,
                    property,
                    computed,
                } => {
                    let object = instrument_atom(ctx, *object, span)?;
                    let key = property_key(ctx, *property, computed, span)?;
                    let args = instrument_args(ctx, arguments, span)?;
                    Ok(hook(
                        hooks::METHCALL,
                        vec![pos, object, key, boolean(computed), array(args)],
                    ))
                }
                callee @ (Expr::Identifier { .. }
                | Expr::ThisExpression
                | Expr::FunctionExpression(_)) => {
                    let callee = instrument_rhs(ctx, callee, span)?;
                    let args = instrument_args(ctx, arguments, span)?;
                    Ok(hook(
                        hooks::FUNCALL,
                        vec![pos, callee, null(), array(args), string(call_kind::FUNCTION)],
                    ))
                }
                other => Err(unsupported(
                    DiagnosticCode::TFI0140UnsupportedCallee,
                    span,
                    format!("cannot call a {}", other.kind()),
                )),
            }
        }
        Expr::NewExpression { callee, arguments } => {
            let pos = ctx.pos(span);
            let callee = match *callee {
                callee @ Expr::Identifier { .. } => instrument_atom(ctx, callee, span)?,
                other => {
                    return Err(unsupported(
                        DiagnosticCode::TFI0140UnsupportedCallee,
                        span,
                        format!("cannot construct a {}", other.kind()),
                    ))
                }
            };
            let args = instrument_args(ctx, arguments, span)?;
            Ok(hook(hooks::NEWEXPR, vec![pos, callee, array(args)]))
        }
        Expr::UnaryExpression { operator, argument } => {
            let pos = ctx.pos(span);
            match (operator, *argument) {
                (
                    UnaryOp::Delete,
                    Expr::MemberExpression {
                        object,
                        property,
                        computed,
                    },
                ) => {
                    let object = instrument_atom(ctx, *object, span)?;
                    let key = property_key(ctx, *property, computed, span)?;
                    Ok(hook(
                        hooks::PROPDEL,
                        vec![pos, object, key, boolean(computed)],
                    ))
                }
                (UnaryOp::Delete, other) => Err(unsupported(
                    DiagnosticCode::TFI0150UnsupportedDelete,
                    span,
                    format!("delete of a {}", other.kind()),
                )),
                (UnaryOp::Typeof, Expr::Identifier { name })
                    if ctx.scopes.resolve(&name) == Resolution::Global =>
                {
                    let read = hook(
                        hooks::GLOBALREAD,
                        vec![pos.clone(), string(&name), boolean(false)],
                    );
                    Ok(hook(hooks::UNOP, vec![pos, string(operator.as_str()), read]))
                }
                (op, operand) => {
                    let operand = instrument_atom(ctx, operand, span)?;
                    Ok(hook(hooks::UNOP, vec![pos, string(op.as_str()), operand]))
                }
            }
        }
        Expr::BinaryExpression {
            operator,
            left,
            right,
        } => binop(ctx, operator.as_str(), *left, *right, span),
        Expr::LogicalExpression {
            operator,
            left,
            right,
        } => binop(ctx, operator.as_str(), *left, *right, span),
        Expr::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => Ok(Expr::ConditionalExpression {
            test: Box::new(unwrapped(ctx, *test, span)?),
            consequent: Box::new(instrument_atom(ctx, *consequent, span)?),
            alternate: Box::new(instrument_atom(ctx, *alternate, span)?),
        }),
        Expr::AssignmentExpression { .. } => Err(unsupported(
            DiagnosticCode::TFI0110UnsupportedExpression,
            span,
            "assignment used as a value",
        )),
    }
}

fn binop(ctx: &mut Ctx<'_>, op: &str, left: Expr, right: Expr, span: Span) -> Result<Expr> {
    let pos = ctx.pos(span);
    let left = instrument_atom(ctx, left, span)?;
    let right = instrument_atom(ctx, right, span)?;
    Ok(hook(hooks::BINOP, vec![pos, string(op), left, right]))
}

// ----- functions -----

/// Wraps the body of `f` in the activation protocol:
///
/// ```text
/// if (__rt.isNativeCall(this)) return __rt.callWrapped(pos, arguments.callee, this, arguments);
/// arguments = __rt.prepareArguments(pos, arguments);
/// __rt.enterFunction(pos, arguments, this);
/// try { body } finally { __rt.leaveFunction(pos, arguments); }
/// ```
fn instrument_function(ctx: &mut Ctx<'_>, f: Function) -> Result<Function> {
    ctx.functions += 1;
    ctx.scopes.enter_function(&f, true);
    let res = instrument_stmts(ctx, f.body);
    ctx.scopes.exit_scope();
    let mut body = res?;

    let span = f.span;
    let pos = ctx.pos(span);
    if !ctx.unify_returns {
        let undefined = literal(ctx, void_zero(), span);
        body.push(return_through_runtime(ctx, undefined, span));
    }

    let guard = Stmt::IfStatement {
        test: hook(hooks::IS_NATIVE_CALL, vec![Expr::ThisExpression]),
        consequent: Box::new(return_stmt(
            hook(
                hooks::CALL_WRAPPED,
                vec![
                    pos.clone(),
                    member(ident(ARGUMENTS), "callee"),
                    Expr::ThisExpression,
                    ident(ARGUMENTS),
                ],
            ),
            span,
        )),
        alternate: None,
        span,
    };
    let prepare = expr_stmt(
        assign(
            ARGUMENTS,
            hook(hooks::PREPARE_ARGUMENTS, vec![pos.clone(), ident(ARGUMENTS)]),
        ),
        span,
    );
    let enter = expr_stmt(
        hook(
            hooks::ENTER_FUNCTION,
            vec![pos.clone(), ident(ARGUMENTS), Expr::ThisExpression],
        ),
        span,
    );
    let leave = expr_stmt(hook(hooks::LEAVE_FUNCTION, vec![pos, ident(ARGUMENTS)]), span);

    Ok(Function {
        id: f.id,
        params: f.params,
        body: vec![
            guard,
            prepare,
            enter,
            Stmt::TryStatement {
                block: body,
                handler: None,
                finalizer: Some(vec![leave]),
                span,
            },
        ],
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::find_diagnostic;
    use serde_json::json;

    fn program(body: serde_json::Value) -> Program {
        serde_json::from_value(json!({ "body": body })).expect("decode program")
    }

    fn code_of(body: serde_json::Value) -> Option<DiagnosticCode> {
        let err = instrument_program(&program(body), &InstrumentOptions::default())
            .expect_err("instrumentation must fail");
        find_diagnostic(&err).map(|d| d.code)
    }

    fn function_stmt(params: serde_json::Value, body: serde_json::Value) -> serde_json::Value {
        json!({"type": "FunctionDeclaration",
               "function": {"id": "f", "params": params, "body": body}})
    }

    #[test]
    fn program_is_bracketed_by_script_hooks() {
        let p = program(json!([
            {"type": "VariableDeclaration", "declarations": [
                {"id": "x", "init": {"type": "Literal", "value": 1.0}}]}
        ]));
        let out = instrument_program(&p, &InstrumentOptions::with_url("a.js")).expect("instrument");
        assert_eq!(out.body.len(), 3);
        let text = serde_json::to_string(&out).expect("json");
        for name in [hooks::WRAP_GLOBAL, hooks::ENTER_SCRIPT, hooks::LEAVE_SCRIPT, hooks::PROPWRITE] {
            assert!(text.contains(&format!("\"{name}\"")), "missing {name}");
        }
        assert!(text.contains("\"a.js\""));
        let Stmt::TryStatement {
            block, finalizer, ..
        } = &out.body[2]
        else {
            panic!("expected try/finally");
        };
        assert!(finalizer.is_some());
        assert!(matches!(&block[0], Stmt::VariableDeclaration { declarations, .. }
            if declarations[0].init.is_none()));
    }

    #[test]
    fn function_gets_activation_prologue() {
        let p = program(json!([function_stmt(json!(["a"]), json!([
            {"type": "ReturnStatement", "argument": {"type": "Identifier", "name": "a"}}
        ]))]));
        let out = instrument_program(&p, &InstrumentOptions::default()).expect("instrument");
        let text = serde_json::to_string(&out).expect("json");
        for name in [
            hooks::IS_NATIVE_CALL,
            hooks::CALL_WRAPPED,
            hooks::PREPARE_ARGUMENTS,
            hooks::ENTER_FUNCTION,
            hooks::RETURN_FROM_FUNCTION,
            hooks::LEAVE_FUNCTION,
        ] {
            assert_eq!(text.matches(&format!("\"{name}\"")).count(), 1, "{name}");
        }
    }

    #[test]
    fn arguments_redeclaration_is_rejected() {
        assert_eq!(
            code_of(json!([function_stmt(json!(["arguments"]), json!([]))])),
            Some(DiagnosticCode::TFI0200ArgumentsRedeclared)
        );
        assert_eq!(
            code_of(json!([function_stmt(json!([]), json!([
                {"type": "VariableDeclaration", "declarations": [{"id": "arguments"}]}
            ]))])),
            Some(DiagnosticCode::TFI0200ArgumentsRedeclared)
        );
    }

    #[test]
    fn arguments_assignment_is_rejected() {
        assert_eq!(
            code_of(json!([function_stmt(json!([]), json!([
                {"type": "ExpressionStatement", "expression": {
                    "type": "AssignmentExpression", "operator": "=",
                    "left": {"type": "Identifier", "name": "arguments"},
                    "right": {"type": "Literal", "value": 1.0}}}
            ]))])),
            Some(DiagnosticCode::TFI0201ArgumentsAssigned)
        );
    }

    #[test]
    fn reserved_names_are_rejected() {
        assert_eq!(
            code_of(json!([{"type": "ExpressionStatement",
                            "expression": {"type": "Identifier", "name": "__rt"}}])),
            Some(DiagnosticCode::TFI0210ReservedName)
        );
    }

    #[test]
    fn non_canonical_shapes_are_rejected() {
        let nested_call = json!([{"type": "ExpressionStatement", "expression": {
            "type": "BinaryExpression", "operator": "+",
            "left": {"type": "CallExpression",
                     "callee": {"type": "Identifier", "name": "f"}, "arguments": []},
            "right": {"type": "Literal", "value": 1.0}}}]);
        assert_eq!(code_of(nested_call), Some(DiagnosticCode::TFI0130UnsupportedOperand));

        let delete_var = json!([{"type": "ExpressionStatement", "expression": {
            "type": "UnaryExpression", "operator": "delete",
            "argument": {"type": "Identifier", "name": "x"}}}]);
        assert_eq!(code_of(delete_var), Some(DiagnosticCode::TFI0150UnsupportedDelete));

        let chained = json!([{"type": "ExpressionStatement", "expression": {
            "type": "AssignmentExpression", "operator": "=",
            "left": {"type": "Identifier", "name": "a"},
            "right": {"type": "AssignmentExpression", "operator": "=",
                      "left": {"type": "Identifier", "name": "b"},
                      "right": {"type": "Literal", "value": 1.0}}}}]);
        assert_eq!(code_of(chained), Some(DiagnosticCode::TFI0110UnsupportedExpression));

        let call_result = json!([{"type": "ExpressionStatement", "expression": {
            "type": "CallExpression",
            "callee": {"type": "CallExpression",
                       "callee": {"type": "Identifier", "name": "f"}, "arguments": []},
            "arguments": []}}]);
        assert_eq!(code_of(call_result), Some(DiagnosticCode::TFI0140UnsupportedCallee));

        let literal_target = json!([{"type": "ExpressionStatement", "expression": {
            "type": "AssignmentExpression", "operator": "=",
            "left": {"type": "Literal", "value": 1.0},
            "right": {"type": "Literal", "value": 2.0}}}]);
        assert_eq!(code_of(literal_target), Some(DiagnosticCode::TFI0120UnsupportedAssignTarget));
    }

    #[test]
    fn free_identifiers_become_global_reads() {
        let p = program(json!([{"type": "ExpressionStatement", "expression": {
            "type": "UnaryExpression", "operator": "typeof",
            "argument": {"type": "Identifier", "name": "missing"}}}]));
        let out = instrument_program(&p, &InstrumentOptions::default()).expect("instrument");
        let text = serde_json::to_string(&out).expect("json");
        assert!(text.contains("\"globalread\""));
        assert!(text.contains("\"value\":\"missing\""));
        assert!(text.contains("\"value\":false"));
    }

    #[test]
    fn function_literal_arguments_are_instrumented() {
        let p = program(json!([{"type": "ExpressionStatement", "expression": {
            "type": "CallExpression",
            "callee": {"type": "MemberExpression",
                       "object": {"type": "Identifier", "name": "xs"},
                       "property": {"type": "Identifier", "name": "map"}},
            "arguments": [{"type": "FunctionExpression", "params": ["x"],
                "body": [{"type": "ReturnStatement",
                          "argument": {"type": "Identifier", "name": "x"}}]}]}}]));
        let out = instrument_program(&p, &InstrumentOptions::default()).expect("instrument");
        let text = serde_json::to_string(&out).expect("json");
        assert!(text.contains("\"methcall\""));
        assert_eq!(text.matches("\"enterFunction\"").count(), 1);
        assert_eq!(text.matches("\"callWrapped\"").count(), 1);
    }
}
