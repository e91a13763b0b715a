//! Program tree exchanged with the external parser/printer.
//!
//! The node set is closed: one variant per grammar production, ESTree-shaped so
//! that a parser front end can hand its output over as JSON. Only statements and
//! functions carry source spans; hook call sites take the position of the
//! enclosing statement.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declarator {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub param: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    VariableDeclaration {
        declarations: Vec<Declarator>,
        #[serde(default)]
        span: Span,
    },
    FunctionDeclaration {
        function: Function,
        #[serde(default)]
        span: Span,
    },
    ExpressionStatement {
        expression: Expr,
        #[serde(default)]
        span: Span,
    },
    BlockStatement {
        body: Vec<Stmt>,
        #[serde(default)]
        span: Span,
    },
    IfStatement {
        test: Expr,
        consequent: Box<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alternate: Option<Box<Stmt>>,
        #[serde(default)]
        span: Span,
    },
    WhileStatement {
        test: Expr,
        body: Box<Stmt>,
        #[serde(default)]
        span: Span,
    },
    DoWhileStatement {
        body: Box<Stmt>,
        test: Expr,
        #[serde(default)]
        span: Span,
    },
    ForInStatement {
        left: String,
        #[serde(default)]
        declare: bool,
        right: Expr,
        body: Box<Stmt>,
        #[serde(default)]
        span: Span,
    },
    LabeledStatement {
        label: String,
        body: Box<Stmt>,
        #[serde(default)]
        span: Span,
    },
    BreakStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        span: Span,
    },
    ContinueStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        span: Span,
    },
    ReturnStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        argument: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    ThrowStatement {
        argument: Expr,
        #[serde(default)]
        span: Span,
    },
    TryStatement {
        block: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handler: Option<CatchClause>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finalizer: Option<Vec<Stmt>>,
        #[serde(default)]
        span: Span,
    },
    EmptyStatement {
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VariableDeclaration { span, .. }
            | Stmt::FunctionDeclaration { span, .. }
            | Stmt::ExpressionStatement { span, .. }
            | Stmt::BlockStatement { span, .. }
            | Stmt::IfStatement { span, .. }
            | Stmt::WhileStatement { span, .. }
            | Stmt::DoWhileStatement { span, .. }
            | Stmt::ForInStatement { span, .. }
            | Stmt::LabeledStatement { span, .. }
            | Stmt::BreakStatement { span, .. }
            | Stmt::ContinueStatement { span, .. }
            | Stmt::ReturnStatement { span, .. }
            | Stmt::ThrowStatement { span, .. }
            | Stmt::TryStatement { span, .. }
            | Stmt::EmptyStatement { span } => *span,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Stmt::VariableDeclaration { .. } => "VariableDeclaration",
            Stmt::FunctionDeclaration { .. } => "FunctionDeclaration",
            Stmt::ExpressionStatement { .. } => "ExpressionStatement",
            Stmt::BlockStatement { .. } => "BlockStatement",
            Stmt::IfStatement { .. } => "IfStatement",
            Stmt::WhileStatement { .. } => "WhileStatement",
            Stmt::DoWhileStatement { .. } => "DoWhileStatement",
            Stmt::ForInStatement { .. } => "ForInStatement",
            Stmt::LabeledStatement { .. } => "LabeledStatement",
            Stmt::BreakStatement { .. } => "BreakStatement",
            Stmt::ContinueStatement { .. } => "ContinueStatement",
            Stmt::ReturnStatement { .. } => "ReturnStatement",
            Stmt::ThrowStatement { .. } => "ThrowStatement",
            Stmt::TryStatement { .. } => "TryStatement",
            Stmt::EmptyStatement { .. } => "EmptyStatement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lit {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropKind {
    #[default]
    Init,
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Expr,
    #[serde(default)]
    pub kind: PropKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    #[serde(rename = "=")]
    Assign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Identifier {
        name: String,
    },
    Literal {
        value: Lit,
    },
    ThisExpression,
    FunctionExpression(Function),
    ObjectExpression {
        properties: Vec<Property>,
    },
    ArrayExpression {
        elements: Vec<Option<Expr>>,
    },
    MemberExpression {
        object: Box<Expr>,
        property: Box<Expr>,
        #[serde(default)]
        computed: bool,
    },
    CallExpression {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    NewExpression {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    UnaryExpression {
        operator: UnaryOp,
        argument: Box<Expr>,
    },
    BinaryExpression {
        operator: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    LogicalExpression {
        operator: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    AssignmentExpression {
        operator: AssignOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    ConditionalExpression {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

impl Expr {
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Identifier { .. } => "Identifier",
            Expr::Literal { .. } => "Literal",
            Expr::ThisExpression => "ThisExpression",
            Expr::FunctionExpression(_) => "FunctionExpression",
            Expr::ObjectExpression { .. } => "ObjectExpression",
            Expr::ArrayExpression { .. } => "ArrayExpression",
            Expr::MemberExpression { .. } => "MemberExpression",
            Expr::CallExpression { .. } => "CallExpression",
            Expr::NewExpression { .. } => "NewExpression",
            Expr::UnaryExpression { .. } => "UnaryExpression",
            Expr::BinaryExpression { .. } => "BinaryExpression",
            Expr::LogicalExpression { .. } => "LogicalExpression",
            Expr::AssignmentExpression { .. } => "AssignmentExpression",
            Expr::ConditionalExpression { .. } => "ConditionalExpression",
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Identifier { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Name of a non-computed member property (`o.p`).
    pub fn static_name(&self) -> Option<&str> {
        match self {
            Expr::Identifier { name } => Some(name.as_str()),
            Expr::Literal {
                value: Lit::String(s),
            } => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Names bound by `var` declarations (including `for (var k in ..)`) and function
/// declarations anywhere in `body`, not descending into nested functions. Order is
/// first appearance, without duplicates.
pub fn var_names(body: &[Stmt]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    visit_hoisted(body, &mut |stmt| {
        let mut push = |name: &str| {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        };
        match stmt {
            Stmt::VariableDeclaration { declarations, .. } => {
                for d in declarations {
                    push(&d.id);
                }
            }
            Stmt::ForInStatement {
                left, declare: true, ..
            } => push(left),
            Stmt::FunctionDeclaration { function, .. } => {
                if let Some(id) = &function.id {
                    push(id);
                }
            }
            _ => {}
        }
    });
    out
}

/// Function declarations hoisted to the start of `body`, in source order.
pub fn function_declarations(body: &[Stmt]) -> Vec<&Function> {
    let mut out = Vec::new();
    collect_function_declarations(body, &mut out);
    out
}

fn collect_function_declarations<'a>(body: &'a [Stmt], out: &mut Vec<&'a Function>) {
    for stmt in body {
        match stmt {
            Stmt::FunctionDeclaration { function, .. } => out.push(function),
            other => {
                for_each_nested_body(other, &mut |inner| collect_function_declarations(inner, out))
            }
        }
    }
}

fn visit_hoisted(body: &[Stmt], f: &mut dyn FnMut(&Stmt)) {
    for stmt in body {
        f(stmt);
        for_each_nested_body(stmt, &mut |inner| visit_hoisted(inner, f));
    }
}

/// Calls `f` on every statement list directly nested in `stmt` that shares its
/// function scope.
fn for_each_nested_body<'a>(stmt: &'a Stmt, f: &mut dyn FnMut(&'a [Stmt])) {
    match stmt {
        Stmt::BlockStatement { body, .. } => f(body),
        Stmt::IfStatement {
            consequent,
            alternate,
            ..
        } => {
            f(std::slice::from_ref(consequent.as_ref()));
            if let Some(alt) = alternate {
                f(std::slice::from_ref(alt.as_ref()));
            }
        }
        Stmt::WhileStatement { body, .. }
        | Stmt::DoWhileStatement { body, .. }
        | Stmt::ForInStatement { body, .. }
        | Stmt::LabeledStatement { body, .. } => f(std::slice::from_ref(body.as_ref())),
        Stmt::TryStatement {
            block,
            handler,
            finalizer,
            ..
        } => {
            f(block);
            if let Some(h) = handler {
                f(&h.body);
            }
            if let Some(fin) = finalizer {
                f(fin);
            }
        }
        _ => {}
    }
}

macro_rules! operator_enum {
    ($name:ident { $($variant:ident => $sym:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $sym)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $sym,)+
                }
            }

            pub fn from_symbol(sym: &str) -> Option<Self> {
                match sym {
                    $($sym => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

operator_enum!(UnaryOp {
    Minus => "-",
    Plus => "+",
    Not => "!",
    BitNot => "~",
    Typeof => "typeof",
    Void => "void",
    Delete => "delete",
});

operator_enum!(BinaryOp {
    Eq => "==",
    NotEq => "!=",
    StrictEq => "===",
    StrictNotEq => "!==",
    Lt => "<",
    LtEq => "<=",
    Gt => ">",
    GtEq => ">=",
    Shl => "<<",
    Shr => ">>",
    UShr => ">>>",
    Add => "+",
    Sub => "-",
    Mul => "*",
    Div => "/",
    Rem => "%",
    BitOr => "|",
    BitXor => "^",
    BitAnd => "&",
    In => "in",
    Instanceof => "instanceof",
});

operator_enum!(LogicalOp {
    And => "&&",
    Or => "||",
});
