//! Constructors for the nodes instrumented code is made of.

use tagflow_contracts::{POSITION_FIELDS, RUNTIME_BINDING};

use crate::ast::{AssignOp, Expr, Lit, PropKind, Property, Span, Stmt, UnaryOp};

pub(super) fn ident(name: &str) -> Expr {
    Expr::Identifier {
        name: name.to_string(),
    }
}

pub(super) fn string(s: &str) -> Expr {
    Expr::Literal {
        value: Lit::String(s.to_string()),
    }
}

pub(super) fn boolean(b: bool) -> Expr {
    Expr::Literal {
        value: Lit::Bool(b),
    }
}

pub(super) fn null() -> Expr {
    Expr::Literal { value: Lit::Null }
}

pub(super) fn void_zero() -> Expr {
    Expr::UnaryExpression {
        operator: UnaryOp::Void,
        argument: Box::new(Expr::Literal {
            value: Lit::Number(0.0),
        }),
    }
}

pub(super) fn array(elements: Vec<Expr>) -> Expr {
    Expr::ArrayExpression {
        elements: elements.into_iter().map(Some).collect(),
    }
}

pub(super) fn object(entries: Vec<(String, Expr)>) -> Expr {
    Expr::ObjectExpression {
        properties: entries
            .into_iter()
            .map(|(key, value)| Property {
                key,
                value,
                kind: PropKind::Init,
            })
            .collect(),
    }
}

pub(super) fn member(object: Expr, name: &str) -> Expr {
    Expr::MemberExpression {
        object: Box::new(object),
        property: Box::new(ident(name)),
        computed: false,
    }
}

/// `{url, start_line, start_offset, end_line, end_offset}`
pub(super) fn position(url: &str, span: Span) -> Expr {
    let [url_key, start_line, start_offset, end_line, end_offset] = POSITION_FIELDS;
    let num = |n: u32| Expr::Literal {
        value: Lit::Number(n as f64),
    };
    object(vec![
        (url_key.to_string(), string(url)),
        (start_line.to_string(), num(span.start_line)),
        (start_offset.to_string(), num(span.start_offset)),
        (end_line.to_string(), num(span.end_line)),
        (end_offset.to_string(), num(span.end_offset)),
    ])
}

/// `__rt.<hook>(args..)`
pub(super) fn hook(name: &str, arguments: Vec<Expr>) -> Expr {
    Expr::CallExpression {
        callee: Box::new(member(ident(RUNTIME_BINDING), name)),
        arguments,
    }
}

pub(super) fn assign(name: &str, value: Expr) -> Expr {
    Expr::AssignmentExpression {
        operator: AssignOp::Assign,
        left: Box::new(ident(name)),
        right: Box::new(value),
    }
}

pub(super) fn expr_stmt(expression: Expr, span: Span) -> Stmt {
    Stmt::ExpressionStatement { expression, span }
}

pub(super) fn return_stmt(argument: Expr, span: Span) -> Stmt {
    Stmt::ReturnStatement {
        argument: Some(argument),
        span,
    }
}

/// Single statement standing for `stmts`.
pub(super) fn single(mut stmts: Vec<Stmt>, span: Span) -> Stmt {
    if stmts.len() == 1 {
        if let Some(stmt) = stmts.pop() {
            return stmt;
        }
    }
    Stmt::BlockStatement { body: stmts, span }
}
