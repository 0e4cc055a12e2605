//! Writing records under claimed tokens.

use std::sync::Arc;

use tally_store::{ConditionalStore, GetOptions};
use tally_types::{AllocationToken, ConditionalOp, Item, Precondition, WriteOutcome};
use tracing::debug;

use crate::error::{AllocError, AllocResult};

/// Persists records keyed by allocation tokens.
///
/// Records are created once and never updated. The inserter is stateless
/// apart from where to write.
#[derive(Clone)]
pub struct RecordInserter {
    store: Arc<dyn ConditionalStore>,
    table: String,
    key_attribute: String,
    guard_collisions: bool,
}

impl RecordInserter {
    pub fn new(
        store: Arc<dyn ConditionalStore>,
        table: impl Into<String>,
        key_attribute: impl Into<String>,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            key_attribute: key_attribute.into(),
            guard_collisions: false,
        }
    }

    /// Refuse to overwrite an item already stored under the token.
    ///
    /// A freshly claimed token cannot collide with another allocation, so a
    /// collision means something outside the protocol wrote the key.
    pub fn with_collision_guard(mut self, guard: bool) -> Self {
        self.guard_collisions = guard;
        self
    }

    pub fn guards_collisions(&self) -> bool {
        self.guard_collisions
    }

    /// The item stored for `token`: the payload with its key attribute set to
    /// the token. A payload attribute with the key's name is replaced.
    pub fn record(&self, token: AllocationToken, payload: Item) -> Item {
        let mut item = payload;
        item.insert(self.key_attribute.clone(), token);
        item
    }

    /// The put for `token`, for bundling into a transaction.
    pub fn put_op(&self, token: AllocationToken, payload: Item) -> ConditionalOp {
        ConditionalOp::Put {
            table: self.table.clone(),
            item: self.record(token, payload),
            condition: self.condition(),
        }
    }

    /// Write the record in its own round trip.
    pub async fn insert(&self, token: AllocationToken, payload: Item) -> AllocResult<()> {
        let item = self.record(token, payload);
        match self.store.put(&self.table, item, self.condition()).await? {
            WriteOutcome::Applied(()) => {
                debug!(table = %self.table, %token, "record inserted");
                Ok(())
            }
            WriteOutcome::ConditionFailed => Err(AllocError::RecordCollision {
                key: token.as_key(),
            }),
        }
    }

    /// Read a record back with strong consistency.
    pub async fn fetch(&self, token: AllocationToken) -> AllocResult<Option<Item>> {
        Ok(self
            .store
            .get(&self.table, &token.as_key(), &GetOptions::consistent())
            .await?)
    }

    fn condition(&self) -> Option<Precondition> {
        self.guard_collisions
            .then(|| Precondition::AttributeNotExists(self.key_attribute.clone()))
    }
}

impl std::fmt::Debug for RecordInserter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordInserter")
            .field("table", &self.table)
            .field("key_attribute", &self.key_attribute)
            .field("guard_collisions", &self.guard_collisions)
            .finish()
    }
}
