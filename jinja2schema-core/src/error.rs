//! The error taxonomy (`spec.md` §7).

use thiserror::Error;

use crate::merge::MergeError;

/// Everything that can stop `infer` before it produces a result.
#[derive(Debug, Error)]
pub enum InferError {
    /// A single name used in incompatible roles, a tuple/list length
    /// mismatch, or a constant conflict under strict merge.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// An AST node encountered in a position it cannot be typed in
    /// (e.g. an unsupported operator).
    #[error("line {line}: cannot type this expression: {reason}")]
    InvalidExpression { line: usize, reason: String },

    /// A node type the visitor has no case for.
    #[error("line {line}: unsupported syntax: {what}")]
    UnexpectedExpression { line: usize, what: String },

    /// `infer` was handed source text the front-end couldn't parse.
    #[error(transparent)]
    Parse(#[from] jinja2schema_ast::ParseError),

    /// The template nests deeper than `Config::max_recursion_depth`.
    #[error("template nesting exceeds the configured recursion depth ({0})")]
    TooDeep(usize),
}

pub type Result<T> = std::result::Result<T, InferError>;
