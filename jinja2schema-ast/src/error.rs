use thiserror::Error;

use crate::parser::Rule;

/// Failure to turn template source into an AST.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(#[from] Box<pest::error::Error<Rule>>),

    #[error("malformed numeric literal {literal:?} on line {line}")]
    BadNumber { literal: String, line: usize },

    #[error("unsupported expression form on line {line}: {what}")]
    Unsupported { what: String, line: usize },
}

pub type Result<T> = std::result::Result<T, ParseError>;
