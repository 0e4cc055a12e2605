//! Claiming unique tokens from a shared counter.

use std::sync::Arc;

use tally_store::{ConditionalStore, GetOptions};
use tally_types::{
    AllocationToken, CancellationCode, ConditionalOp, Item, Precondition, TypeError,
    WriteOutcome,
};
use tracing::{debug, info};

use crate::config::AllocatorConfig;
use crate::error::{AllocError, AllocResult};
use crate::inserter::RecordInserter;
use crate::retry::{classify_transaction, Attempt, AttemptContext, Phase, RetryCoordinator};
use crate::strategy::Strategy;

/// Position of the counter update inside an allocation transaction.
const COUNTER_OP_INDEX: usize = 0;

/// A successfully claimed token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub token: AllocationToken,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

/// Claims tokens from one counter item using one [`Strategy`].
///
/// The allocator holds no counter state of its own; the store is the only
/// authority. Any number of allocators, in any number of tasks or
/// processes, may share a counter as long as they use the same strategy
/// family (see [`Strategy`]).
pub struct CounterAllocator {
    store: Arc<dyn ConditionalStore>,
    config: AllocatorConfig,
    retry: RetryCoordinator,
    inserter: RecordInserter,
}

impl CounterAllocator {
    /// Create an allocator over `store`.
    pub fn new(store: Arc<dyn ConditionalStore>, config: AllocatorConfig) -> AllocResult<Self> {
        config.validate()?;
        let inserter = RecordInserter::new(
            Arc::clone(&store),
            config.table.clone(),
            config.key_attribute.clone(),
        )
        .with_collision_guard(config.guard_collisions);
        let retry = RetryCoordinator::new(config.retry.clone());
        Ok(Self {
            store,
            config,
            retry,
            inserter,
        })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    /// The inserter used for records claimed by this allocator.
    pub fn inserter(&self) -> &RecordInserter {
        &self.inserter
    }

    /// Create the counter item with `initial` as its value.
    ///
    /// Fails with [`AllocError::AlreadyInitialized`] rather than resetting a
    /// live counter.
    pub async fn initialize(&self, initial: i64) -> AllocResult<()> {
        let item = self.counter_item(initial);
        let guard = Precondition::AttributeNotExists(self.config.key_attribute.clone());
        match self.store.put(&self.config.table, item, Some(guard)).await? {
            WriteOutcome::Applied(()) => {
                info!(
                    table = %self.config.table,
                    counter = %self.config.counter_key,
                    initial,
                    "counter initialized"
                );
                Ok(())
            }
            WriteOutcome::ConditionFailed => Err(AllocError::AlreadyInitialized {
                table: self.config.table.clone(),
                key: self.config.counter_key.clone(),
            }),
        }
    }

    /// The counter's current value, read with strong consistency.
    pub async fn current(&self) -> AllocResult<i64> {
        let options = GetOptions::consistent().with_attributes([self.config.count_attribute.as_str()]);
        let item = self
            .store
            .get(&self.config.table, &self.config.counter_key, &options)
            .await?;
        self.count_of(item)
    }

    /// Claim a token without writing a record.
    ///
    /// Not available for [`Strategy::Transactional`], whose claim only
    /// exists together with its record.
    pub async fn allocate(&self) -> AllocResult<Allocation> {
        match self.config.strategy {
            Strategy::AtomicAdd => self.allocate_atomic().await,
            Strategy::CasUpdate | Strategy::CasPut => self.allocate_optimistic().await,
            Strategy::Transactional => Err(AllocError::Config(
                "the transactional strategy claims a token together with its record; \
                 use allocate_and_insert"
                    .into(),
            )),
        }
    }

    /// Claim a token and persist `payload` under it.
    ///
    /// With [`Strategy::Transactional`] the counter advance and the record
    /// become visible together. Every other strategy inserts the record in a
    /// second round trip once the claim has succeeded.
    pub async fn allocate_and_insert(&self, payload: Item) -> AllocResult<Allocation> {
        if self.config.strategy.is_transactional() {
            return self.allocate_transactional(&payload).await;
        }
        let allocation = self.allocate().await?;
        self.inserter.insert(allocation.token, payload).await?;
        Ok(allocation)
    }

    async fn allocate_atomic(&self) -> AllocResult<Allocation> {
        let retried = self.retry.run(move |ctx| self.atomic_attempt(ctx)).await?;
        debug!(token = %retried.value, "atomic add claimed token");
        Ok(Allocation {
            token: retried.value,
            attempts: retried.attempts,
        })
    }

    async fn allocate_optimistic(&self) -> AllocResult<Allocation> {
        let retried = self.retry.run(move |ctx| self.cas_attempt(ctx)).await?;
        debug!(
            strategy = %self.config.strategy,
            token = %retried.value,
            attempts = retried.attempts,
            "optimistic claim succeeded"
        );
        Ok(Allocation {
            token: retried.value,
            attempts: retried.attempts,
        })
    }

    async fn allocate_transactional(&self, payload: &Item) -> AllocResult<Allocation> {
        let retried = self
            .retry
            .run(move |ctx| self.transactional_attempt(ctx, payload))
            .await?;
        debug!(
            token = %retried.value,
            attempts = retried.attempts,
            "transactional claim committed"
        );
        Ok(Allocation {
            token: retried.value,
            attempts: retried.attempts,
        })
    }

    async fn atomic_attempt(&self, ctx: AttemptContext) -> AllocResult<Attempt<AllocationToken>> {
        let outcome = ctx
            .call(
                Phase::AttemptWrite,
                self.store.update_add(
                    &self.config.table,
                    &self.config.counter_key,
                    &self.config.count_attribute,
                    1,
                    None,
                ),
            )
            .await?;
        Ok(match outcome {
            WriteOutcome::Applied(value) => Attempt::Success(AllocationToken::new(value)),
            WriteOutcome::ConditionFailed => Attempt::Conflict,
        })
    }

    async fn cas_attempt(&self, ctx: AttemptContext) -> AllocResult<Attempt<AllocationToken>> {
        let observed = self.read_observed(&ctx).await?;
        let next = self.successor(observed)?;
        let guard = Some(self.counter_guard(observed));

        let applied = if self.config.strategy == Strategy::CasPut {
            let write = self
                .store
                .put(&self.config.table, self.counter_item(next), guard);
            ctx.call(Phase::AttemptWrite, write).await?.is_applied()
        } else {
            let write = self.store.update_add(
                &self.config.table,
                &self.config.counter_key,
                &self.config.count_attribute,
                1,
                guard,
            );
            ctx.call(Phase::AttemptWrite, write).await?.is_applied()
        };

        if applied {
            Ok(Attempt::Success(AllocationToken::new(observed)))
        } else {
            debug!(attempt = ctx.number(), observed, "counter moved; claim lost");
            Ok(Attempt::Conflict)
        }
    }

    async fn transactional_attempt(
        &self,
        ctx: AttemptContext,
        payload: &Item,
    ) -> AllocResult<Attempt<AllocationToken>> {
        let observed = self.read_observed(&ctx).await?;
        self.successor(observed)?;
        let token = AllocationToken::new(observed);

        let ops = vec![
            ConditionalOp::UpdateAdd {
                table: self.config.table.clone(),
                key: self.config.counter_key.clone(),
                attribute: self.config.count_attribute.clone(),
                delta: 1,
                condition: Some(self.counter_guard(observed)),
            },
            self.inserter.put_op(token, payload.clone()),
        ];

        let outcome = ctx
            .call(Phase::AttemptWrite, self.store.transact(ops))
            .await?;
        match classify_transaction(&outcome, COUNTER_OP_INDEX) {
            Ok(Attempt::Success(())) => Ok(Attempt::Success(token)),
            Ok(Attempt::Conflict) => {
                debug!(attempt = ctx.number(), observed, "counter moved; transaction lost");
                Ok(Attempt::Conflict)
            }
            Err(AllocError::TransactionCanceled {
                index,
                code: CancellationCode::ConditionalCheckFailed,
            }) if index != COUNTER_OP_INDEX && self.inserter.guards_collisions() => {
                Err(AllocError::RecordCollision {
                    key: token.as_key(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn read_observed(&self, ctx: &AttemptContext) -> AllocResult<i64> {
        let options = GetOptions {
            attributes: Some(vec![self.config.count_attribute.clone()]),
            consistent_read: self.config.consistent_reads,
        };
        let item = ctx
            .call(
                Phase::Read,
                self.store
                    .get(&self.config.table, &self.config.counter_key, &options),
            )
            .await?;
        self.count_of(item)
    }

    fn count_of(&self, item: Option<Item>) -> AllocResult<i64> {
        let item = item.ok_or_else(|| AllocError::CounterNotInitialized {
            table: self.config.table.clone(),
            key: self.config.counter_key.clone(),
        })?;
        item.number(&self.config.count_attribute)
            .map_err(|source: TypeError| AllocError::CorruptCounter {
                key: self.config.counter_key.clone(),
                source,
            })
    }

    fn successor(&self, observed: i64) -> AllocResult<i64> {
        observed
            .checked_add(1)
            .ok_or_else(|| AllocError::CounterOverflow {
                key: self.config.counter_key.clone(),
                value: observed,
            })
    }

    fn counter_guard(&self, observed: i64) -> Precondition {
        Precondition::equals(self.config.count_attribute.as_str(), observed)
    }

    fn counter_item(&self, value: i64) -> Item {
        Item::new()
            .with(self.config.key_attribute.as_str(), self.config.counter_key.as_str())
            .with(self.config.count_attribute.as_str(), value)
    }
}

impl std::fmt::Debug for CounterAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterAllocator")
            .field("config", &self.config)
            .finish()
    }
}
