/// Faults from store operations.
///
/// None of these represent a lost race; those are reported through
/// [`WriteOutcome`](tally_types::WriteOutcome) and
/// [`TransactOutcome`](tally_types::TransactOutcome).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A table with this name already exists.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// The request is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller's credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The store failed internally.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a validation error from any message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
