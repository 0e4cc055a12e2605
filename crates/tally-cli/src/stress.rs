//! Many tasks, one counter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use tally_alloc::{Allocation, AllocatorConfig, CounterAllocator, Strategy};
use tally_store::{InMemoryStore, TableSpec};
use tally_types::Item;
use tokio::task::JoinSet;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct StressPlan {
    pub config: AllocatorConfig,
    pub workers: usize,
    pub allocations: usize,
    pub latency: Duration,
    pub initial: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StressReport {
    pub strategy: Strategy,
    pub workers: usize,
    pub allocations_per_worker: usize,
    pub claimed: usize,
    pub unique: usize,
    pub records_missing: usize,
    pub counter_start: i64,
    pub counter_end: i64,
    pub total_attempts: u64,
    pub max_attempts: u32,
    pub elapsed_ms: u128,
}

impl StressReport {
    fn expected(&self) -> Option<usize> {
        self.workers.checked_mul(self.allocations_per_worker)
    }

    /// Conflicts absorbed by the retry loop.
    pub fn conflicts(&self) -> u64 {
        self.total_attempts.saturating_sub(self.claimed as u64)
    }

    pub fn tokens_unique(&self) -> bool {
        self.unique == self.claimed && Some(self.claimed) == self.expected()
    }

    pub fn counter_consistent(&self) -> bool {
        self.expected()
            .and_then(|n| i64::try_from(n).ok())
            .and_then(|n| self.counter_start.checked_add(n))
            == Some(self.counter_end)
    }

    pub fn passed(&self) -> bool {
        self.tokens_unique() && self.records_missing == 0 && self.counter_consistent()
    }
}

/// Run the plan against a fresh in-memory store.
pub async fn run(plan: StressPlan) -> anyhow::Result<StressReport> {
    let Some(total) = plan.workers.checked_mul(plan.allocations) else {
        anyhow::bail!(
            "{} workers x {} allocations overflows the allocation count",
            plan.workers,
            plan.allocations
        );
    };
    let mut allocations: Vec<Allocation> = Vec::new();
    allocations
        .try_reserve(total)
        .with_context(|| format!("reserving room for {total} allocations"))?;
    let strategy = plan.config.strategy;
    let store = Arc::new(InMemoryStore::new().with_latency(plan.latency));
    store.create_table(TableSpec::new(
        plan.config.table.as_str(),
        plan.config.key_attribute.as_str(),
    ))?;

    let allocator = Arc::new(CounterAllocator::new(store, plan.config)?);
    let initial = plan
        .initial
        .unwrap_or(if strategy.is_optimistic() { 1 } else { 0 });
    allocator.initialize(initial).await?;
    info!(%strategy, workers = plan.workers, allocations = plan.allocations, "stress run starting");

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for worker in 0..plan.workers {
        let allocator = Arc::clone(&allocator);
        let allocations = plan.allocations;
        tasks.spawn(async move {
            let mut claimed = Vec::new();
            for seq in 0..allocations {
                let payload = Item::new()
                    .with("worker", worker as i64)
                    .with("seq", seq as i64);
                let allocation = allocator
                    .allocate_and_insert(payload)
                    .await
                    .with_context(|| format!("worker {worker}, allocation {seq}"))?;
                claimed.push(allocation);
            }
            debug!(worker, "worker finished");
            anyhow::Ok(claimed)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        allocations.extend(joined??);
    }
    let elapsed = started.elapsed();

    let unique: HashSet<_> = allocations.iter().map(|a| a.token).collect();
    let mut records_missing = 0;
    for allocation in &allocations {
        if allocator.inserter().fetch(allocation.token).await?.is_none() {
            records_missing += 1;
        }
    }

    let report = StressReport {
        strategy,
        workers: plan.workers,
        allocations_per_worker: plan.allocations,
        claimed: allocations.len(),
        unique: unique.len(),
        records_missing,
        counter_start: initial,
        counter_end: allocator.current().await?,
        total_attempts: allocations.iter().map(|a| u64::from(a.attempts)).sum(),
        max_attempts: allocations.iter().map(|a| a.attempts).max().unwrap_or(0),
        elapsed_ms: elapsed.as_millis(),
    };
    info!(
        claimed = report.claimed,
        conflicts = report.conflicts(),
        passed = report.passed(),
        "stress run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_alloc::RetryConfig;

    fn plan(strategy: Strategy, workers: usize, allocations: usize) -> StressPlan {
        StressPlan {
            config: AllocatorConfig::new("stress")
                .with_strategy(strategy)
                .with_retry(
                    RetryConfig::unbounded()
                        .with_base_delay_ms(0)
                        .with_max_delay_ms(1)
                        .with_deadline(Duration::from_secs(30)),
                ),
            workers,
            allocations,
            latency: Duration::ZERO,
            initial: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_strategy_survives_contention() {
        for strategy in Strategy::ALL {
            for guard in [false, true] {
                let mut plan = plan(strategy, 6, 15);
                plan.config = plan.config.with_guard_collisions(guard);
                let report = run(plan).await.unwrap();
                assert!(report.passed(), "{strategy} guard={guard}: {report:?}");
                assert_eq!(report.claimed, 90);
                assert!(report.total_attempts >= 90);
            }
        }
    }

    #[tokio::test]
    async fn oversized_plan_is_rejected() {
        let err = run(plan(Strategy::AtomicAdd, usize::MAX, 2)).await.unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[tokio::test]
    async fn atomic_add_never_conflicts() {
        let report = run(plan(Strategy::AtomicAdd, 4, 10)).await.unwrap();
        assert_eq!(report.conflicts(), 0);
        assert_eq!(report.max_attempts, 1);
        assert_eq!((report.counter_start, report.counter_end), (0, 40));
    }

    #[tokio::test]
    async fn custom_initial_value() {
        let mut plan = plan(Strategy::CasUpdate, 2, 5);
        plan.initial = Some(100);
        let report = run(plan).await.unwrap();
        assert!(report.passed());
        assert_eq!(report.counter_end, 110);
    }

    #[test]
    fn verification_flags_drift() {
        let report = StressReport {
            strategy: Strategy::CasPut,
            workers: 2,
            allocations_per_worker: 2,
            claimed: 4,
            unique: 3,
            records_missing: 0,
            counter_start: 1,
            counter_end: 4,
            total_attempts: 6,
            max_attempts: 2,
            elapsed_ms: 1,
        };
        assert!(!report.tokens_unique());
        assert!(!report.counter_consistent());
        assert!(!report.passed());
        assert_eq!(report.conflicts(), 2);
    }

    #[test]
    fn overflowing_expectation_never_passes() {
        let report = StressReport {
            strategy: Strategy::AtomicAdd,
            workers: usize::MAX,
            allocations_per_worker: 2,
            claimed: 0,
            unique: 0,
            records_missing: 0,
            counter_start: 0,
            counter_end: 0,
            total_attempts: 0,
            max_attempts: 0,
            elapsed_ms: 0,
        };
        assert!(!report.tokens_unique());
        assert!(!report.counter_consistent());
    }
}
