//! Parse errors for PromQL expressions.

use thiserror::Error;

/// Result type alias for parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// A query could not be lexed, parsed or type-checked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at char {position}: {message}")]
pub struct ParseError {
    /// Char offset into the query where the problem was detected.
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}
