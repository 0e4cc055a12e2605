//! Conditional write operations and their typed outcomes.
//!
//! A lost race is an expected result, not a fault, so it is carried in the
//! success channel: [`WriteOutcome::ConditionFailed`] for standalone writes and
//! [`TransactOutcome::Canceled`] for transactions. Store faults travel
//! separately as errors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Precondition;
use crate::value::Item;

/// One write inside a multi-item transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalOp {
    /// Replace the whole item. The item carries its own key attribute.
    Put {
        table: String,
        item: Item,
        condition: Option<Precondition>,
    },
    /// Add `delta` to a numeric attribute of the item at `key`.
    UpdateAdd {
        table: String,
        key: String,
        attribute: String,
        delta: i64,
        condition: Option<Precondition>,
    },
}

impl ConditionalOp {
    /// The table this operation writes to.
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::UpdateAdd { table, .. } => table,
        }
    }

    /// The precondition guarding this operation, if any.
    pub fn condition(&self) -> Option<&Precondition> {
        match self {
            Self::Put { condition, .. } | Self::UpdateAdd { condition, .. } => {
                condition.as_ref()
            }
        }
    }
}

/// Result of a standalone conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// The precondition held (or there was none) and the write took effect.
    Applied(T),
    /// The precondition was false; the store is unchanged.
    ConditionFailed,
}

impl<T> WriteOutcome<T> {
    /// Returns `true` if the write took effect.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The applied value, or `None` on a failed precondition.
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::ConditionFailed => None,
        }
    }
}

/// Why a single operation inside a canceled transaction did not apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancellationCode {
    /// This operation was not the cause of the cancellation.
    None,
    /// This operation's precondition was false.
    ConditionalCheckFailed,
    /// Another in-flight transaction touched the same item.
    TransactionConflict,
    /// The operation was malformed in the context of this item.
    ValidationError,
}

impl fmt::Display for CancellationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::ConditionalCheckFailed => "ConditionalCheckFailed",
            Self::TransactionConflict => "TransactionConflict",
            Self::ValidationError => "ValidationError",
        };
        f.write_str(s)
    }
}

/// Result of a multi-item transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactOutcome {
    /// Every operation was applied atomically.
    Committed,
    /// Nothing was applied. `reasons` holds one code per operation, in
    /// submission order.
    Canceled { reasons: Vec<CancellationCode> },
}

impl TransactOutcome {
    /// Returns `true` if the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Index and code of the first operation that caused the cancellation.
    pub fn failed_index(&self) -> Option<(usize, CancellationCode)> {
        match self {
            Self::Committed => None,
            Self::Canceled { reasons } => reasons
                .iter()
                .enumerate()
                .find(|(_, code)| **code != CancellationCode::None)
                .map(|(i, code)| (i, *code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_index_skips_uninvolved_operations() {
        let outcome = TransactOutcome::Canceled {
            reasons: vec![
                CancellationCode::None,
                CancellationCode::ConditionalCheckFailed,
            ],
        };
        assert_eq!(
            outcome.failed_index(),
            Some((1, CancellationCode::ConditionalCheckFailed))
        );
        assert_eq!(TransactOutcome::Committed.failed_index(), None);
    }

    #[test]
    fn write_outcome_accessors() {
        let applied = WriteOutcome::Applied(3);
        assert!(applied.is_applied());
        assert_eq!(applied.applied(), Some(3));
        assert_eq!(WriteOutcome::<i64>::ConditionFailed.applied(), None);
    }

    #[test]
    fn op_exposes_table_and_condition() {
        let op = ConditionalOp::UpdateAdd {
            table: "t".into(),
            key: "counter".into(),
            attribute: "count_value".into(),
            delta: 1,
            condition: Some(Precondition::equals("count_value", 1)),
        };
        assert_eq!(op.table(), "t");
        assert_eq!(
            op.condition(),
            Some(&Precondition::equals("count_value", 1))
        );
    }
}
