//! Error types for allocation.

use std::time::Duration;

use tally_store::StoreError;
use tally_types::{CancellationCode, TypeError};
use thiserror::Error;

use crate::retry::Phase;

/// Errors that end an allocation.
///
/// A lost race is not among them: the retry loop absorbs conflicts and only
/// reports them once its budget is spent.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The store failed. Never retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The counter item does not exist.
    #[error("counter {key} in table {table} is not initialized")]
    CounterNotInitialized { table: String, key: String },

    /// The counter item already exists.
    #[error("counter {key} in table {table} already exists")]
    AlreadyInitialized { table: String, key: String },

    /// The counter item exists but its count attribute is unusable.
    #[error("counter {key} is corrupt: {source}")]
    CorruptCounter {
        key: String,
        #[source]
        source: TypeError,
    },

    /// Advancing the counter would overflow.
    #[error("counter {key} cannot advance past {value}")]
    CounterOverflow { key: String, value: i64 },

    /// A record already exists under the claimed token.
    #[error("record {key} already exists")]
    RecordCollision { key: String },

    /// A transaction was canceled by something other than a lost race on
    /// the counter.
    #[error("transaction canceled by operation {index}: {code}")]
    TransactionCanceled {
        index: usize,
        code: CancellationCode,
    },

    /// Every permitted attempt lost its race.
    #[error("allocation gave up after {attempts} conflicting attempts")]
    RetriesExhausted { attempts: u32 },

    /// The allocation's time budget ran out.
    #[error("allocation deadline exceeded during {phase} of attempt {attempts} after {elapsed:?}")]
    DeadlineExceeded {
        attempts: u32,
        elapsed: Duration,
        phase: Phase,
    },

    /// The allocator was configured or used inconsistently.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AllocError {
    /// Returns `true` if the error came from the store rather than from the
    /// allocation protocol.
    pub fn is_store_fault(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Convenience type alias for allocation operations.
pub type AllocResult<T> = std::result::Result<T, AllocError>;
