//! Scripted concurrency scenarios.
//!
//! Each scenario runs in its own freshly created table, drives one or two
//! allocators through a fixed interleaving and checks the outcome. The
//! concurrent scenarios use [`Interleaved`] to let a rival allocation land
//! between an allocator's read and its conditional write.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Serialize;
use tally_alloc::{AllocatorConfig, CounterAllocator, Strategy};
use tally_store::{
    ConditionalStore, GetOptions, InMemoryStore, StoreError, StoreResult, TableSpec,
};
use tally_types::{
    AllocationToken, CancellationCode, ConditionalOp, Item, Precondition, TransactOutcome,
    WriteOutcome,
};
use tracing::info;
use uuid::Uuid;

const NOTE_ATTRIBUTE: &str = "some_attribute";
const UNIQUE_NOTE: &str = "This item guaranteed to have unique PK! Woohoo!";
const FIRST_NOTE: &str = "This item was inserted by the first operation";
const SECOND_NOTE: &str = "This item was inserted by the second operation";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    AtomicCounter,
    AtomicCounterConcurrent,
    OptimisticLocking,
    OptimisticLockingPut,
    OptimisticLockingConcurrent,
    Transactional,
    TransactionalConcurrent,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Self::AtomicCounter,
        Self::AtomicCounterConcurrent,
        Self::OptimisticLocking,
        Self::OptimisticLockingPut,
        Self::OptimisticLockingConcurrent,
        Self::Transactional,
        Self::TransactionalConcurrent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::AtomicCounter => "atomic-counter",
            Self::AtomicCounterConcurrent => "atomic-counter-concurrent",
            Self::OptimisticLocking => "optimistic-locking",
            Self::OptimisticLockingPut => "optimistic-locking-put",
            Self::OptimisticLockingConcurrent => "optimistic-locking-concurrent",
            Self::Transactional => "transactional",
            Self::TransactionalConcurrent => "transactional-concurrent",
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            Self::AtomicCounter | Self::AtomicCounterConcurrent => Strategy::AtomicAdd,
            Self::OptimisticLocking => Strategy::CasUpdate,
            Self::OptimisticLockingPut | Self::OptimisticLockingConcurrent => Strategy::CasPut,
            Self::Transactional | Self::TransactionalConcurrent => Strategy::Transactional,
        }
    }

    fn initial(self) -> i64 {
        if self.strategy().is_optimistic() {
            1
        } else {
            0
        }
    }

    /// Resolve a command-line selection: one name, or `all`.
    pub fn select(name: &str) -> anyhow::Result<Vec<Scenario>> {
        if name == "all" {
            Ok(Self::ALL.to_vec())
        } else {
            Ok(vec![name.parse()?])
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|s| s.name()).collect();
                anyhow::anyhow!("unknown scenario {s:?}, expected all or one of: {}", known.join(", "))
            })
    }
}

/// A token claimed during a scenario, and by whom.
#[derive(Clone, Debug, Serialize)]
pub struct Claim {
    pub by: &'static str,
    pub token: AllocationToken,
    pub attempts: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct Check {
    pub description: String,
    pub passed: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub table: String,
    pub strategy: Strategy,
    pub claims: Vec<Claim>,
    pub counter: i64,
    pub checks: Vec<Check>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    fn check(&mut self, description: impl Into<String>, passed: bool) {
        self.checks.push(Check {
            description: description.into(),
            passed,
        });
    }

    fn claim(&mut self, by: &'static str, token: AllocationToken, attempts: u32) {
        self.claims.push(Claim {
            by,
            token,
            attempts,
        });
    }
}

/// Run `scenario` in a new table of `store`.
///
/// Everything in `base` except the table and strategy carries over, so a
/// config file can change retry behaviour or attribute names.
pub async fn run(
    scenario: Scenario,
    store: &Arc<InMemoryStore>,
    base: &AllocatorConfig,
) -> anyhow::Result<ScenarioReport> {
    let table = format!("{}-{}", scenario.name(), Uuid::now_v7().simple());
    store.create_table(TableSpec::new(table.as_str(), base.key_attribute.as_str()))?;
    let config = AllocatorConfig {
        table: table.clone(),
        ..base.clone()
    }
    .with_strategy(scenario.strategy());

    let mut report = ScenarioReport {
        scenario,
        table,
        strategy: scenario.strategy(),
        claims: Vec::new(),
        counter: 0,
        checks: Vec::new(),
    };

    match scenario {
        Scenario::AtomicCounter
        | Scenario::OptimisticLocking
        | Scenario::OptimisticLockingPut
        | Scenario::Transactional => single(store, config, scenario.initial(), &mut report).await?,
        Scenario::AtomicCounterConcurrent => atomic_interleaved(store, config, &mut report).await?,
        Scenario::OptimisticLockingConcurrent | Scenario::TransactionalConcurrent => {
            optimistic_race(store, config, scenario.initial(), &mut report).await?
        }
    }

    info!(
        scenario = %scenario,
        counter = report.counter,
        passed = report.passed(),
        "scenario finished"
    );
    Ok(report)
}

/// One allocation with its record.
async fn single(
    store: &Arc<InMemoryStore>,
    config: AllocatorConfig,
    initial: i64,
    report: &mut ScenarioReport,
) -> anyhow::Result<()> {
    let allocator = CounterAllocator::new(store.clone(), config)?;
    allocator.initialize(initial).await?;

    let allocation = allocator.allocate_and_insert(note(UNIQUE_NOTE)).await?;
    report.claim("op", allocation.token, allocation.attempts);
    report.counter = allocator.current().await?;

    let expected = expected_first(&allocator, initial);
    report.check(format!("token is {expected}"), allocation.token == expected);
    report.check(
        format!("counter advanced to {}", initial + 1),
        report.counter == initial + 1,
    );
    report.check(
        format!("record {} holds the payload", allocation.token),
        note_of(&allocator, allocation.token).await?.as_deref() == Some(UNIQUE_NOTE),
    );
    Ok(())
}

/// Operation 1 claims, operation 2 claims and inserts, then operation 1
/// inserts. Atomic adds never conflict, so both claims stand.
async fn atomic_interleaved(
    store: &Arc<InMemoryStore>,
    config: AllocatorConfig,
    report: &mut ScenarioReport,
) -> anyhow::Result<()> {
    let allocator = CounterAllocator::new(store.clone(), config)?;
    allocator.initialize(0).await?;

    let op1 = allocator.allocate().await?;
    let op2 = allocator.allocate().await?;
    allocator.inserter().insert(op2.token, note(SECOND_NOTE)).await?;
    allocator.inserter().insert(op1.token, note(FIRST_NOTE)).await?;
    report.claim("op1", op1.token, op1.attempts);
    report.claim("op2", op2.token, op2.attempts);
    report.counter = allocator.current().await?;

    report.check("tokens are distinct", op1.token != op2.token);
    report.check(
        "tokens are 1 and 2 in claim order",
        (op1.token.value(), op2.token.value()) == (1, 2),
    );
    report.check("counter advanced to 2", report.counter == 2);
    report.check(
        "both records hold their payloads",
        note_of(&allocator, op1.token).await?.as_deref() == Some(FIRST_NOTE)
            && note_of(&allocator, op2.token).await?.as_deref() == Some(SECOND_NOTE),
    );
    Ok(())
}

/// Operation 1 reads the counter; operation 2 reads the same value and
/// finishes first; operation 1's write must fail and its retry must claim the
/// next value.
async fn optimistic_race(
    store: &Arc<InMemoryStore>,
    config: AllocatorConfig,
    initial: i64,
    report: &mut ScenarioReport,
) -> anyhow::Result<()> {
    let rival = CounterAllocator::new(store.clone(), config.clone())?;
    let interleaved = Arc::new(Interleaved::new(store.clone(), rival));
    let allocator = CounterAllocator::new(interleaved.clone(), config)?;
    allocator.initialize(initial).await?;

    let op1 = allocator.allocate_and_insert(note(FIRST_NOTE)).await?;
    let op2 = interleaved
        .rival_token()
        .ok_or_else(|| anyhow::anyhow!("the rival allocation never ran"))?;
    report.claim("op2", op2, 1);
    report.claim("op1", op1.token, op1.attempts);
    report.counter = allocator.current().await?;

    report.check("operation 1 lost its first write and retried once", op1.attempts == 2);
    report.check(
        format!("operation 2 claimed {initial}"),
        op2.value() == initial,
    );
    report.check(
        format!("operation 1 claimed {} from its second read", initial + 1),
        op1.token.value() == initial + 1,
    );
    report.check(
        format!("counter advanced to {}", initial + 2),
        report.counter == initial + 2,
    );
    report.check(
        "both records hold their payloads",
        note_of(&allocator, op1.token).await?.as_deref() == Some(FIRST_NOTE)
            && note_of(&allocator, op2).await?.as_deref() == Some(SECOND_NOTE),
    );
    if allocator.strategy().is_transactional() {
        report.check(
            "the canceled transaction blamed the counter update",
            interleaved.first_cancellation().and_then(TransactOutcome::failed_index)
                == Some((0, CancellationCode::ConditionalCheckFailed)),
        );
    }
    Ok(())
}

fn expected_first(allocator: &CounterAllocator, initial: i64) -> AllocationToken {
    if allocator.strategy().yields_observed_value() {
        AllocationToken::new(initial)
    } else {
        AllocationToken::new(initial + 1)
    }
}

fn note(text: &str) -> Item {
    Item::new().with(NOTE_ATTRIBUTE, text)
}

async fn note_of(
    allocator: &CounterAllocator,
    token: AllocationToken,
) -> anyhow::Result<Option<String>> {
    let record = allocator.inserter().fetch(token).await?;
    Ok(record.and_then(|item| item.string(NOTE_ATTRIBUTE).ok().map(str::to_string)))
}

/// A store that runs one rival allocation to completion immediately before
/// the first guarded counter write it sees.
pub struct Interleaved {
    inner: Arc<InMemoryStore>,
    rival: CounterAllocator,
    pending: AtomicBool,
    rival_token: OnceLock<AllocationToken>,
    first_cancellation: OnceLock<TransactOutcome>,
}

impl Interleaved {
    pub fn new(inner: Arc<InMemoryStore>, rival: CounterAllocator) -> Self {
        Self {
            inner,
            rival,
            pending: AtomicBool::new(true),
            rival_token: OnceLock::new(),
            first_cancellation: OnceLock::new(),
        }
    }

    pub fn rival_token(&self) -> Option<AllocationToken> {
        self.rival_token.get().copied()
    }

    pub fn first_cancellation(&self) -> Option<&TransactOutcome> {
        self.first_cancellation.get()
    }

    async fn interleave(&self) -> StoreResult<()> {
        if !self.pending.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let allocation = self
            .rival
            .allocate_and_insert(note(SECOND_NOTE))
            .await
            .map_err(|e| StoreError::Internal(format!("rival allocation failed: {e}")))?;
        let _ = self.rival_token.set(allocation.token);
        Ok(())
    }
}

fn guards_counter(condition: Option<&Precondition>) -> bool {
    matches!(condition, Some(Precondition::Equals { .. }))
}

#[async_trait]
impl ConditionalStore for Interleaved {
    async fn get(&self, table: &str, key: &str, options: &GetOptions) -> StoreResult<Option<Item>> {
        self.inner.get(table, key, options).await
    }

    async fn put(
        &self,
        table: &str,
        item: Item,
        condition: Option<Precondition>,
    ) -> StoreResult<WriteOutcome<()>> {
        if guards_counter(condition.as_ref()) {
            self.interleave().await?;
        }
        self.inner.put(table, item, condition).await
    }

    async fn update_add(
        &self,
        table: &str,
        key: &str,
        attribute: &str,
        delta: i64,
        condition: Option<Precondition>,
    ) -> StoreResult<WriteOutcome<i64>> {
        if guards_counter(condition.as_ref()) {
            self.interleave().await?;
        }
        self.inner
            .update_add(table, key, attribute, delta, condition)
            .await
    }

    async fn transact(&self, ops: Vec<ConditionalOp>) -> StoreResult<TransactOutcome> {
        if ops.iter().any(|op| guards_counter(op.condition())) {
            self.interleave().await?;
        }
        let outcome = self.inner.transact(ops).await?;
        if !outcome.is_committed() {
            let _ = self.first_cancellation.set(outcome.clone());
        }
        Ok(outcome)
    }
}
