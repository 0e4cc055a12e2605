//! Error types for value conversion and validation.

use thiserror::Error;

/// Errors raised when interpreting attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The item has no attribute with this name.
    #[error("missing attribute: {name}")]
    MissingAttribute { name: String },

    /// The attribute exists but holds a value of the wrong kind.
    #[error("attribute {name} is not a {expected}")]
    WrongKind { name: String, expected: &'static str },

    /// A string could not be parsed as an allocation token.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Convenience type alias for value operations.
pub type TypeResult<T> = std::result::Result<T, TypeError>;
