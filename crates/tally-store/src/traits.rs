use async_trait::async_trait;
use tally_types::{ConditionalOp, Item, Precondition, TransactOutcome, WriteOutcome};

use crate::error::StoreResult;

/// Upper bound on operations in a single transaction.
pub const MAX_TRANSACT_OPS: usize = 100;

/// Shape of a table: its name and the string attribute that keys its items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub key_attribute: String,
}

impl TableSpec {
    /// A table keyed by the given attribute.
    pub fn new(name: impl Into<String>, key_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_attribute: key_attribute.into(),
        }
    }
}

/// Read options for [`ConditionalStore::get`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Return only these attributes. `None` returns the whole item.
    pub attributes: Option<Vec<String>>,
    /// Request a read that reflects every write acknowledged before it.
    pub consistent_read: bool,
}

impl GetOptions {
    /// A strongly consistent read of the whole item.
    pub fn consistent() -> Self {
        Self {
            attributes: None,
            consistent_read: true,
        }
    }

    /// Restrict the read to the given attributes.
    pub fn with_attributes<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.attributes = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// A key-value document store with conditional writes.
///
/// All implementations must satisfy these invariants:
/// - Conditional writes against the same item are linearized. Of several
///   writers conditioned on the same observed value, at most one succeeds.
/// - A failed precondition has no partial effect and is returned as an
///   outcome, not an error.
/// - `transact` is all-or-nothing across every item it touches.
/// - Every call is a round trip; callers must await its result before
///   deciding their next step.
#[async_trait]
pub trait ConditionalStore: Send + Sync {
    /// Read the item stored under `key`.
    ///
    /// Returns `Ok(None)` if no such item exists.
    async fn get(&self, table: &str, key: &str, options: &GetOptions) -> StoreResult<Option<Item>>;

    /// Write a whole item, replacing any existing item with the same key.
    async fn put(
        &self,
        table: &str,
        item: Item,
        condition: Option<Precondition>,
    ) -> StoreResult<WriteOutcome<()>>;

    /// Add `delta` to a numeric attribute and return its new value.
    ///
    /// A missing item is created and a missing attribute counts as zero.
    async fn update_add(
        &self,
        table: &str,
        key: &str,
        attribute: &str,
        delta: i64,
        condition: Option<Precondition>,
    ) -> StoreResult<WriteOutcome<i64>>;

    /// Apply an ordered list of writes atomically.
    ///
    /// If any precondition fails nothing is applied, and the outcome names
    /// the cause per operation.
    async fn transact(&self, ops: Vec<ConditionalOp>) -> StoreResult<TransactOutcome>;
}
