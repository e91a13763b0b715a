//! In-crate normalization passes run ahead of instrumentation: function
//! declarations are hoisted to assignments and, optionally, every function is
//! rewritten to a single exit point.

use anyhow::Result;
use tagflow_contracts::{RETURN_LABEL, RETURN_VAR};

use crate::ast::{AssignOp, Declarator, Expr, Function, Lit, Program, Span, Stmt, UnaryOp};
use crate::diagnostics::{Diagnostic, DiagnosticCode};

pub fn normalize_program(program: &mut Program, unify_returns: bool) -> Result<()> {
    program.body = hoist_function_declarations(std::mem::take(&mut program.body));
    let cx = Cx {
        in_function: false,
        unify_returns,
    };
    for stmt in &mut program.body {
        normalize_stmt(stmt, cx)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Cx {
    in_function: bool,
    unify_returns: bool,
}

fn normalize_function(f: &mut Function, unify_returns: bool) -> Result<()> {
    f.body = hoist_function_declarations(std::mem::take(&mut f.body));
    let cx = Cx {
        in_function: true,
        unify_returns,
    };
    for stmt in &mut f.body {
        normalize_stmt(stmt, cx)?;
    }
    if unify_returns {
        f.body = unify_body(std::mem::take(&mut f.body), f.span);
    }
    Ok(())
}

/// `var __ret; __ret = void 0; __body: { .. } return __ret;`
fn unify_body(body: Vec<Stmt>, span: Span) -> Vec<Stmt> {
    vec![
        Stmt::VariableDeclaration {
            declarations: vec![Declarator {
                id: RETURN_VAR.to_string(),
                init: None,
            }],
            span,
        },
        assign_ret(void_zero(), span),
        Stmt::LabeledStatement {
            label: RETURN_LABEL.to_string(),
            body: Box::new(Stmt::BlockStatement { body, span }),
            span,
        },
        Stmt::ReturnStatement {
            argument: Some(ident(RETURN_VAR)),
            span,
        },
    ]
}

fn normalize_stmt(stmt: &mut Stmt, cx: Cx) -> Result<()> {
    match stmt {
        Stmt::ReturnStatement { argument, span } => {
            if !cx.in_function {
                return Err(Diagnostic::unsupported(
                    DiagnosticCode::TFI0300ReturnOutsideFunction,
                    *span,
                    "return at program top level",
                )
                .into());
            }
            if let Some(arg) = argument {
                normalize_expr(arg, cx)?;
            }
            if cx.unify_returns {
                let span = *span;
                let value = argument.take().unwrap_or_else(void_zero);
                *stmt = Stmt::BlockStatement {
                    body: vec![
                        assign_ret(value, span),
                        Stmt::BreakStatement {
                            label: Some(RETURN_LABEL.to_string()),
                            span,
                        },
                    ],
                    span,
                };
            }
        }
        Stmt::VariableDeclaration { declarations, .. } => {
            for d in declarations {
                if let Some(init) = &mut d.init {
                    normalize_expr(init, cx)?;
                }
            }
        }
        Stmt::FunctionDeclaration { function, .. } => {
            normalize_function(function, cx.unify_returns)?;
        }
        Stmt::ExpressionStatement { expression, .. } => normalize_expr(expression, cx)?,
        Stmt::BlockStatement { body, .. } => {
            for s in body {
                normalize_stmt(s, cx)?;
            }
        }
        Stmt::IfStatement {
            test,
            consequent,
            alternate,
            ..
        } => {
            normalize_expr(test, cx)?;
            normalize_stmt(consequent, cx)?;
            if let Some(alt) = alternate {
                normalize_stmt(alt, cx)?;
            }
        }
        Stmt::WhileStatement { test, body, .. } | Stmt::DoWhileStatement { body, test, .. } => {
            normalize_expr(test, cx)?;
            normalize_stmt(body, cx)?;
        }
        Stmt::ForInStatement { right, body, .. } => {
            normalize_expr(right, cx)?;
            normalize_stmt(body, cx)?;
        }
        Stmt::LabeledStatement { body, .. } => normalize_stmt(body, cx)?,
        Stmt::ThrowStatement { argument, .. } => normalize_expr(argument, cx)?,
        Stmt::TryStatement {
            block,
            handler,
            finalizer,
            ..
        } => {
            for s in block {
                normalize_stmt(s, cx)?;
            }
            if let Some(h) = handler {
                for s in &mut h.body {
                    normalize_stmt(s, cx)?;
                }
            }
            if let Some(fin) = finalizer {
                for s in fin {
                    normalize_stmt(s, cx)?;
                }
            }
        }
        Stmt::BreakStatement { .. } | Stmt::ContinueStatement { .. } | Stmt::EmptyStatement { .. } => {}
    }
    Ok(())
}

fn normalize_expr(expr: &mut Expr, cx: Cx) -> Result<()> {
    match expr {
        Expr::FunctionExpression(f) => normalize_function(f, cx.unify_returns)?,
        Expr::ObjectExpression { properties } => {
            for p in properties {
                normalize_expr(&mut p.value, cx)?;
            }
        }
        Expr::ArrayExpression { elements } => {
            for e in elements.iter_mut().flatten() {
                normalize_expr(e, cx)?;
            }
        }
        Expr::MemberExpression {
            object, property, ..
        } => {
            normalize_expr(object, cx)?;
            normalize_expr(property, cx)?;
        }
        Expr::CallExpression { callee, arguments } | Expr::NewExpression { callee, arguments } => {
            normalize_expr(callee, cx)?;
            for a in arguments {
                normalize_expr(a, cx)?;
            }
        }
        Expr::UnaryExpression { argument, .. } => normalize_expr(argument, cx)?,
        Expr::BinaryExpression { left, right, .. }
        | Expr::LogicalExpression { left, right, .. }
        | Expr::AssignmentExpression { left, right, .. } => {
            normalize_expr(left, cx)?;
            normalize_expr(right, cx)?;
        }
        Expr::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => {
            normalize_expr(test, cx)?;
            normalize_expr(consequent, cx)?;
            normalize_expr(alternate, cx)?;
        }
        Expr::Identifier { .. } | Expr::Literal { .. } | Expr::ThisExpression => {}
    }
    Ok(())
}

/// Moves every function declaration of `body` (outside nested functions) to
/// the front as `var f; f = function (..) {..};`, in source order.
pub fn hoist_function_declarations(body: Vec<Stmt>) -> Vec<Stmt> {
    let mut decls: Vec<(Span, Function)> = Vec::new();
    let rest = strip_list(body, &mut decls);
    if decls.is_empty() {
        return rest;
    }

    let mut out = Vec::with_capacity(rest.len() + decls.len() + 1);
    let mut declarators: Vec<Declarator> = Vec::new();
    for (_, f) in &decls {
        if let Some(id) = &f.id {
            if !declarators.iter().any(|d| &d.id == id) {
                declarators.push(Declarator {
                    id: id.clone(),
                    init: None,
                });
            }
        }
    }
    out.push(Stmt::VariableDeclaration {
        declarations: declarators,
        span: decls[0].0,
    });
    for (span, mut f) in decls {
        let Some(name) = f.id.take() else {
            continue;
        };
        out.push(Stmt::ExpressionStatement {
            expression: Expr::AssignmentExpression {
                operator: AssignOp::Assign,
                left: Box::new(ident(&name)),
                right: Box::new(Expr::FunctionExpression(f)),
            },
            span,
        });
    }
    out.extend(rest);
    out
}

fn strip_list(body: Vec<Stmt>, decls: &mut Vec<(Span, Function)>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(body.len());
    for stmt in body {
        match stmt {
            Stmt::FunctionDeclaration { function, span } => decls.push((span, function)),
            other => out.push(strip_stmt(other, decls)),
        }
    }
    out
}

fn strip_boxed(stmt: Box<Stmt>, decls: &mut Vec<(Span, Function)>) -> Box<Stmt> {
    match *stmt {
        Stmt::FunctionDeclaration { function, span } => {
            decls.push((span, function));
            Box::new(Stmt::EmptyStatement { span })
        }
        other => Box::new(strip_stmt(other, decls)),
    }
}

fn strip_stmt(stmt: Stmt, decls: &mut Vec<(Span, Function)>) -> Stmt {
    match stmt {
        Stmt::BlockStatement { body, span } => Stmt::BlockStatement {
            body: strip_list(body, decls),
            span,
        },
        Stmt::IfStatement {
            test,
            consequent,
            alternate,
            span,
        } => Stmt::IfStatement {
            test,
            consequent: strip_boxed(consequent, decls),
            alternate: alternate.map(|alt| strip_boxed(alt, decls)),
            span,
        },
        Stmt::WhileStatement { test, body, span } => Stmt::WhileStatement {
            test,
            body: strip_boxed(body, decls),
            span,
        },
        Stmt::DoWhileStatement { body, test, span } => Stmt::DoWhileStatement {
            body: strip_boxed(body, decls),
            test,
            span,
        },
        Stmt::ForInStatement {
            left,
            declare,
            right,
            body,
            span,
        } => Stmt::ForInStatement {
            left,
            declare,
            right,
            body: strip_boxed(body, decls),
            span,
        },
        Stmt::LabeledStatement { label, body, span } => Stmt::LabeledStatement {
            label,
            body: strip_boxed(body, decls),
            span,
        },
        Stmt::TryStatement {
            block,
            handler,
            finalizer,
            span,
        } => Stmt::TryStatement {
            block: strip_list(block, decls),
            handler: handler.map(|mut h| {
                h.body = strip_list(std::mem::take(&mut h.body), decls);
                h
            }),
            finalizer: finalizer.map(|fin| strip_list(fin, decls)),
            span,
        },
        other => other,
    }
}

fn ident(name: &str) -> Expr {
    Expr::Identifier {
        name: name.to_string(),
    }
}

fn void_zero() -> Expr {
    Expr::UnaryExpression {
        operator: UnaryOp::Void,
        argument: Box::new(Expr::Literal {
            value: Lit::Number(0.0),
        }),
    }
}

fn assign_ret(value: Expr, span: Span) -> Stmt {
    Stmt::ExpressionStatement {
        expression: Expr::AssignmentExpression {
            operator: AssignOp::Assign,
            left: Box::new(ident(RETURN_VAR)),
            right: Box::new(value),
        },
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::find_diagnostic;
    use serde_json::json;

    fn program(body: serde_json::Value) -> Program {
        serde_json::from_value(json!({ "body": body })).expect("decode program")
    }

    #[test]
    fn declarations_become_leading_assignments() {
        let mut p = program(json!([
            {"type": "ExpressionStatement", "expression": {
                "type": "CallExpression",
                "callee": {"type": "Identifier", "name": "f"}, "arguments": []}},
            {"type": "IfStatement", "test": {"type": "Literal", "value": true},
             "consequent": {"type": "FunctionDeclaration",
                            "function": {"id": "g", "params": [], "body": []}}},
            {"type": "FunctionDeclaration", "function": {"id": "f", "params": [], "body": []}}
        ]));
        normalize_program(&mut p, false).expect("normalize");
        assert_eq!(p.body.len(), 5);
        match &p.body[0] {
            Stmt::VariableDeclaration { declarations, .. } => {
                let names: Vec<&str> = declarations.iter().map(|d| d.id.as_str()).collect();
                assert_eq!(names, vec!["g", "f"]);
            }
            other => panic!("unexpected {}", other.kind()),
        }
        match &p.body[1] {
            Stmt::ExpressionStatement {
                expression: Expr::AssignmentExpression { left, right, .. },
                ..
            } => {
                assert_eq!(left.as_ident(), Some("g"));
                assert!(matches!(right.as_ref(), Expr::FunctionExpression(f) if f.id.is_none()));
            }
            other => panic!("unexpected {}", other.kind()),
        }
        match &p.body[4] {
            Stmt::IfStatement { consequent, .. } => {
                assert!(matches!(consequent.as_ref(), Stmt::EmptyStatement { .. }))
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn returns_are_unified() {
        let mut p = program(json!([
            {"type": "FunctionDeclaration", "function": {"id": "f", "params": ["x"], "body": [
                {"type": "IfStatement", "test": {"type": "Identifier", "name": "x"},
                 "consequent": {"type": "ReturnStatement",
                                "argument": {"type": "Literal", "value": 1.0}}},
                {"type": "ReturnStatement"}
            ]}}
        ]));
        normalize_program(&mut p, true).expect("normalize");
        let Stmt::ExpressionStatement {
            expression: Expr::AssignmentExpression { right, .. },
            ..
        } = &p.body[1]
        else {
            panic!("expected hoisted assignment");
        };
        let Expr::FunctionExpression(f) = right.as_ref() else {
            panic!("expected function");
        };
        assert_eq!(f.body.len(), 4);
        assert!(matches!(&f.body[2], Stmt::LabeledStatement { label, .. } if label == "__body"));
        match &f.body[3] {
            Stmt::ReturnStatement {
                argument: Some(arg),
                ..
            } => assert_eq!(arg.as_ident(), Some("__ret")),
            other => panic!("unexpected {}", other.kind()),
        }
        let text = serde_json::to_string(&f.body).expect("json");
        assert_eq!(text.matches("\"ReturnStatement\"").count(), 1);
        assert_eq!(text.matches("\"BreakStatement\"").count(), 2);
    }

    #[test]
    fn top_level_return_is_rejected() {
        let mut p = program(json!([{"type": "ReturnStatement"}]));
        let err = normalize_program(&mut p, false).expect_err("must fail");
        assert_eq!(
            find_diagnostic(&err).map(|d| d.code),
            Some(DiagnosticCode::TFI0300ReturnOutsideFunction)
        );
    }
}
