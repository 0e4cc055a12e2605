//! In-memory conditional store for tests, demos, and embedding.
//!
//! [`InMemoryStore`] keeps every table in a `HashMap` behind a single
//! `RwLock`. Each call takes the lock once and evaluates its preconditions
//! and effects under it, which makes every call linearizable. Reads are
//! always strongly consistent, so `GetOptions::consistent_read` has no
//! observable effect here.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tally_types::{
    AttributeValue, CancellationCode, ConditionalOp, Item, Precondition, TransactOutcome,
    WriteOutcome,
};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::traits::{ConditionalStore, GetOptions, TableSpec, MAX_TRANSACT_OPS};

#[derive(Debug)]
struct Table {
    key_attribute: String,
    items: HashMap<String, Item>,
}

impl Table {
    fn new(key_attribute: String) -> Self {
        Self {
            key_attribute,
            items: HashMap::new(),
        }
    }

    fn key_of(&self, item: &Item) -> StoreResult<String> {
        match item.get(&self.key_attribute) {
            Some(AttributeValue::S(key)) => Ok(key.clone()),
            Some(other) => Err(StoreError::validation(format!(
                "key attribute {} must be a string, got a {}",
                self.key_attribute,
                other.kind()
            ))),
            None => Err(StoreError::validation(format!(
                "item is missing key attribute {}",
                self.key_attribute
            ))),
        }
    }

    fn check_update_target(&self, attribute: &str) -> StoreResult<()> {
        if attribute == self.key_attribute {
            return Err(StoreError::validation(format!(
                "cannot update key attribute {attribute}"
            )));
        }
        Ok(())
    }

    /// The value `attribute` would hold after adding `delta`.
    fn added_value(&self, key: &str, attribute: &str, delta: i64) -> Result<i64, String> {
        let current = match self.items.get(key).and_then(|item| item.get(attribute)) {
            None => 0,
            Some(AttributeValue::N(n)) => *n,
            Some(other) => {
                return Err(format!("cannot add to {attribute}: it is a {}", other.kind()))
            }
        };
        current
            .checked_add(delta)
            .ok_or_else(|| format!("adding {delta} to {attribute} overflows"))
    }

    fn apply_add(&mut self, key: &str, attribute: &str, value: i64) {
        let key_attribute = self.key_attribute.clone();
        let item = self
            .items
            .entry(key.to_string())
            .or_insert_with(|| Item::new().with(key_attribute, key));
        item.insert(attribute, value);
    }
}

/// Snapshot of the calls an [`InMemoryStore`] has served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: u64,
    pub puts: u64,
    pub updates: u64,
    pub transacts: u64,
    /// Preconditions that evaluated false, across writes and transactions.
    pub conditions_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    puts: AtomicU64,
    updates: AtomicU64,
    transacts: AtomicU64,
    conditions_failed: AtomicU64,
}

/// An in-memory implementation of [`ConditionalStore`].
///
/// Data is lost when the store is dropped. An optional simulated latency is
/// awaited at the start of every call, before any shared state is touched,
/// so concurrent callers interleave the way real network round trips do.
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    latency: Option<Duration>,
    counters: Counters,
}

impl InMemoryStore {
    /// Create a store with no tables.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            latency: None,
            counters: Counters::default(),
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency).filter(|d| !d.is_zero());
        self
    }

    /// Create an empty table.
    pub fn create_table(&self, spec: TableSpec) -> StoreResult<()> {
        let mut tables = self.write_tables()?;
        if tables.contains_key(&spec.name) {
            return Err(StoreError::TableExists(spec.name));
        }
        info!(table = %spec.name, key = %spec.key_attribute, "table created");
        tables.insert(spec.name, Table::new(spec.key_attribute));
        Ok(())
    }

    /// Drop a table and all of its items. Returns `true` if it existed.
    pub fn delete_table(&self, name: &str) -> StoreResult<bool> {
        let mut tables = self.write_tables()?;
        Ok(tables.remove(name).is_some())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> StoreResult<Vec<String>> {
        let tables = self.read_tables()?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of items in a table.
    pub fn item_count(&self, table: &str) -> StoreResult<usize> {
        let tables = self.read_tables()?;
        tables
            .get(table)
            .map(|t| t.items.len())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    /// Calls served so far.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            transacts: self.counters.transacts.load(Ordering::Relaxed),
            conditions_failed: self.counters.conditions_failed.load(Ordering::Relaxed),
        }
    }

    fn read_tables(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {e}")))
    }

    fn write_tables(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {e}")))
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn condition_failed(&self, table: &str, key: &str, condition: &Precondition) {
        self.counters.conditions_failed.fetch_add(1, Ordering::Relaxed);
        debug!(table, key, %condition, "conditional check failed");
    }

    fn resolve_targets(
        tables: &HashMap<String, Table>,
        ops: &[ConditionalOp],
    ) -> StoreResult<Vec<String>> {
        let mut seen = HashSet::with_capacity(ops.len());
        let mut keys = Vec::with_capacity(ops.len());
        for op in ops {
            let table = tables
                .get(op.table())
                .ok_or_else(|| StoreError::TableNotFound(op.table().to_string()))?;
            let key = match op {
                ConditionalOp::Put { item, .. } => table.key_of(item)?,
                ConditionalOp::UpdateAdd { key, attribute, .. } => {
                    table.check_update_target(attribute)?;
                    key.clone()
                }
            };
            if !seen.insert((op.table(), key.clone())) {
                return Err(StoreError::validation(format!(
                    "transaction touches {}/{key} more than once",
                    op.table()
                )));
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("latency", &self.latency)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl ConditionalStore for InMemoryStore {
    async fn get(&self, table: &str, key: &str, options: &GetOptions) -> StoreResult<Option<Item>> {
        self.round_trip().await;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let tables = self.read_tables()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(t.items.get(key).map(|item| match &options.attributes {
            Some(names) => item.project(names),
            None => item.clone(),
        }))
    }

    async fn put(
        &self,
        table: &str,
        item: Item,
        condition: Option<Precondition>,
    ) -> StoreResult<WriteOutcome<()>> {
        self.round_trip().await;
        self.counters.puts.fetch_add(1, Ordering::Relaxed);

        let mut tables = self.write_tables()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let key = t.key_of(&item)?;

        if let Some(condition) = &condition {
            if !condition.evaluate(t.items.get(&key)) {
                self.condition_failed(table, &key, condition);
                return Ok(WriteOutcome::ConditionFailed);
            }
        }

        t.items.insert(key, item);
        Ok(WriteOutcome::Applied(()))
    }

    async fn update_add(
        &self,
        table: &str,
        key: &str,
        attribute: &str,
        delta: i64,
        condition: Option<Precondition>,
    ) -> StoreResult<WriteOutcome<i64>> {
        self.round_trip().await;
        self.counters.updates.fetch_add(1, Ordering::Relaxed);

        let mut tables = self.write_tables()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        t.check_update_target(attribute)?;

        if let Some(condition) = &condition {
            if !condition.evaluate(t.items.get(key)) {
                self.condition_failed(table, key, condition);
                return Ok(WriteOutcome::ConditionFailed);
            }
        }

        let value = t
            .added_value(key, attribute, delta)
            .map_err(StoreError::Validation)?;
        t.apply_add(key, attribute, value);
        Ok(WriteOutcome::Applied(value))
    }

    async fn transact(&self, ops: Vec<ConditionalOp>) -> StoreResult<TransactOutcome> {
        self.round_trip().await;
        self.counters.transacts.fetch_add(1, Ordering::Relaxed);

        if ops.is_empty() {
            return Err(StoreError::validation("transaction has no operations"));
        }
        if ops.len() > MAX_TRANSACT_OPS {
            return Err(StoreError::validation(format!(
                "transaction has {} operations, limit is {MAX_TRANSACT_OPS}",
                ops.len()
            )));
        }

        let mut tables = self.write_tables()?;
        let keys = Self::resolve_targets(&tables, &ops)?;

        // Evaluate every operation against the pre-transaction state before
        // applying anything.
        let mut reasons = Vec::with_capacity(ops.len());
        let mut added = Vec::with_capacity(ops.len());
        for (op, key) in ops.iter().zip(&keys) {
            let table = &tables[op.table()];
            let mut code = CancellationCode::None;
            let mut value = None;

            if let Some(condition) = op.condition() {
                if !condition.evaluate(table.items.get(key)) {
                    self.condition_failed(op.table(), key, condition);
                    code = CancellationCode::ConditionalCheckFailed;
                }
            }
            if let (CancellationCode::None, ConditionalOp::UpdateAdd { attribute, delta, .. }) =
                (code, op)
            {
                match table.added_value(key, attribute, *delta) {
                    Ok(v) => value = Some(v),
                    Err(reason) => {
                        debug!(table = op.table(), key = %key, %reason, "transaction operation invalid");
                        code = CancellationCode::ValidationError;
                    }
                }
            }

            reasons.push(code);
            added.push(value);
        }

        if reasons.iter().any(|code| *code != CancellationCode::None) {
            return Ok(TransactOutcome::Canceled { reasons });
        }

        for ((op, key), value) in ops.into_iter().zip(keys).zip(added) {
            let table = tables
                .get_mut(op.table())
                .ok_or_else(|| StoreError::Internal(format!("table {} vanished", op.table())))?;
            match op {
                ConditionalOp::Put { item, .. } => {
                    table.items.insert(key, item);
                }
                ConditionalOp::UpdateAdd { attribute, .. } => {
                    if let Some(value) = value {
                        table.apply_add(&key, &attribute, value);
                    }
                }
            }
        }
        Ok(TransactOutcome::Committed)
    }
}
