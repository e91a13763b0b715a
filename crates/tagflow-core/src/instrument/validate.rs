//! Name checks run on the input tree, before normalization introduces its own
//! reserved names.

use anyhow::Result;
use tagflow_contracts::{ARGUMENTS, RESERVED_PREFIX};

use crate::ast::{self, Expr, Function, Program, Span, Stmt};
use crate::diagnostics::{Diagnostic, DiagnosticCode};

pub(super) fn validate_program(program: &Program) -> Result<()> {
    validate_stmts(&program.body)
}

fn reserved(name: &str, span: Span, what: &str) -> Result<()> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(Diagnostic::unsupported(
            DiagnosticCode::TFI0210ReservedName,
            span,
            format!("{what} `{name}` uses the reserved `{RESERVED_PREFIX}` prefix"),
        )
        .into());
    }
    Ok(())
}

fn validate_function(f: &Function) -> Result<()> {
    if let Some(id) = &f.id {
        reserved(id, f.span, "function name")?;
    }
    let locals = ast::var_names(&f.body);
    for name in f.params.iter().chain(locals.iter()) {
        reserved(name, f.span, "binding")?;
        if name == ARGUMENTS {
            return Err(Diagnostic::unsupported(
                DiagnosticCode::TFI0200ArgumentsRedeclared,
                f.span,
                "`arguments` declared as a parameter or local variable",
            )
            .into());
        }
    }
    validate_stmts(&f.body)
}

fn validate_stmts(stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
        validate_stmt(stmt)?;
    }
    Ok(())
}

fn validate_stmt(stmt: &Stmt) -> Result<()> {
    let span = stmt.span();
    match stmt {
        Stmt::VariableDeclaration { declarations, .. } => {
            for d in declarations {
                reserved(&d.id, span, "variable")?;
                if let Some(init) = &d.init {
                    validate_expr(init, span)?;
                }
            }
            Ok(())
        }
        Stmt::FunctionDeclaration { function, .. } => validate_function(function),
        Stmt::ExpressionStatement { expression, .. } => validate_expr(expression, span),
        Stmt::BlockStatement { body, .. } => validate_stmts(body),
        Stmt::IfStatement {
            test,
            consequent,
            alternate,
            ..
        } => {
            validate_expr(test, span)?;
            validate_stmt(consequent)?;
            match alternate {
                Some(alt) => validate_stmt(alt),
                None => Ok(()),
            }
        }
        Stmt::WhileStatement { test, body, .. } | Stmt::DoWhileStatement { body, test, .. } => {
            validate_expr(test, span)?;
            validate_stmt(body)
        }
        Stmt::ForInStatement {
            left, right, body, ..
        } => {
            reserved(left, span, "loop variable")?;
            validate_expr(right, span)?;
            validate_stmt(body)
        }
        Stmt::LabeledStatement { label, body, .. } => {
            reserved(label, span, "label")?;
            validate_stmt(body)
        }
        Stmt::ReturnStatement { argument, .. } => match argument {
            Some(arg) => validate_expr(arg, span),
            None => Ok(()),
        },
        Stmt::ThrowStatement { argument, .. } => validate_expr(argument, span),
        Stmt::TryStatement {
            block,
            handler,
            finalizer,
            ..
        } => {
            validate_stmts(block)?;
            if let Some(h) = handler {
                reserved(&h.param, span, "catch parameter")?;
                validate_stmts(&h.body)?;
            }
            match finalizer {
                Some(fin) => validate_stmts(fin),
                None => Ok(()),
            }
        }
        Stmt::BreakStatement { .. } | Stmt::ContinueStatement { .. } | Stmt::EmptyStatement { .. } => {
            Ok(())
        }
    }
}

fn validate_expr(expr: &Expr, span: Span) -> Result<()> {
    match expr {
        Expr::Identifier { name } => reserved(name, span, "identifier"),
        Expr::Literal { .. } | Expr::ThisExpression => Ok(()),
        Expr::FunctionExpression(f) => validate_function(f),
        Expr::ObjectExpression { properties } => {
            for p in properties {
                validate_expr(&p.value, span)?;
            }
            Ok(())
        }
        Expr::ArrayExpression { elements } => {
            for e in elements.iter().flatten() {
                validate_expr(e, span)?;
            }
            Ok(())
        }
        Expr::MemberExpression {
            object,
            property,
            computed,
        } => {
            validate_expr(object, span)?;
            if *computed {
                validate_expr(property, span)?;
            }
            Ok(())
        }
        Expr::CallExpression { callee, arguments } | Expr::NewExpression { callee, arguments } => {
            validate_expr(callee, span)?;
            for a in arguments {
                validate_expr(a, span)?;
            }
            Ok(())
        }
        Expr::UnaryExpression { argument, .. } => validate_expr(argument, span),
        Expr::BinaryExpression { left, right, .. }
        | Expr::LogicalExpression { left, right, .. }
        | Expr::AssignmentExpression { left, right, .. } => {
            validate_expr(left, span)?;
            validate_expr(right, span)
        }
        Expr::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => {
            validate_expr(test, span)?;
            validate_expr(consequent, span)?;
            validate_expr(alternate, span)
        }
    }
}
