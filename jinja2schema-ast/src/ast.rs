//! The template AST consumed by `jinja2schema-core`.
//!
//! This is the "familiar shape" `spec.md` assumes an external parser
//! front-end would hand back: literals, names, attribute/subscript
//! access, filter/test/call/condition nodes, and the usual
//! for/if/set/with/macro/import/include/output statements.

use std::fmt;

/// A source line number, 1-based. Used to populate `linenos` metadata
/// on every structural type the core crate derives.
pub type LineNo = usize;

/// Wraps a node with the source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub line: LineNo,
}

impl<T> Spanned<T> {
    pub fn new(node: T, line: LineNo) -> Self {
        Spanned { node, line }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

/// A literal value fixed at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(String),
    Bool(bool),
    None,
}

/// A single name appearing on the left of `=` in a `for` target, or
/// standing alone as `for x in xs`.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Tuple(Vec<String>),
}

/// A keyword argument `name=value` passed to a filter, test, or call.
#[derive(Debug, Clone, PartialEq)]
pub struct Kwarg {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOperator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat, // `~`
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOperator {
    Not,
    Neg,
    Pos,
}

/// An expression node, as it would appear inside `{{ ... }}`, a
/// condition, a filter argument, or any other expression position.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// `[a, b, c]`
    ListLit(Vec<Expr>),
    /// `(a, b, c)`
    TupleLit(Vec<Expr>),
    /// `{k: v, ...}`
    DictLit(Vec<(Expr, Expr)>),
    /// A bare name reference, e.g. `x`.
    Name(String),
    /// `a.b`
    Attr { value: Box<Expr>, attr: String },
    /// `a[k]`
    Subscript { value: Box<Expr>, index: Box<Expr> },
    /// `a|filtername(args)`
    Filter {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<Kwarg>,
    },
    /// `a is testname(args)` / `a is not testname(args)`
    Test {
        value: Box<Expr>,
        name: String,
        negated: bool,
        args: Vec<Expr>,
    },
    /// `f(args)`
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<Kwarg>,
    },
    /// `a if cond else b`
    Condition {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    BinOp {
        op: BinOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOperator, operand: Box<Expr> },
    /// `(expr)` — kept distinct so diagnostics can point at the
    /// original grouping, but it carries no semantics of its own.
    Group(Box<Expr>),
}

pub type Expr = Spanned<ExprKind>;

/// A `{% set %}` binding form.
#[derive(Debug, Clone, PartialEq)]
pub enum SetForm {
    /// `{% set name = expr %}`
    Value(Expr),
    /// `{% set name %}...{% endset %}`
    Block(Vec<Stmt>),
}

/// A declared macro parameter, with an optional default expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportedNames {
    /// `{% import "tpl" as ns %}`
    Module(String),
    /// `{% from "tpl" import a, b as c %}`
    Names(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `{{ expr }}`
    Output(Expr),
    If {
        /// `(condition, body)` pairs for the `if` and each `elif`.
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    Set {
        name: String,
        form: SetForm,
    },
    With {
        bindings: Vec<(String, Expr)>,
        body: Vec<Stmt>,
    },
    Macro {
        name: String,
        params: Vec<MacroParam>,
        body: Vec<Stmt>,
    },
    /// `{% include "path" %}`; `None` when the path isn't a literal.
    Include { path: Option<String> },
    Import {
        path: Option<String>,
        names: ImportedNames,
    },
    FilterBlock {
        name: String,
        body: Vec<Stmt>,
    },
    Block {
        name: String,
        body: Vec<Stmt>,
    },
    Extends {
        path: Option<String>,
    },
    Raw(String),
    Comment,
}

pub type Stmt = Spanned<StmtKind>;

/// The root of a parsed template: its top-level statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub body: Vec<Stmt>,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::None => write!(f, "none"),
        }
    }
}
