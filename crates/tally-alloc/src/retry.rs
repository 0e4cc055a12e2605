//! The optimistic-lock retry loop.
//!
//! Each attempt runs `Read -> AttemptWrite` and ends in success or conflict.
//! A conflict sends the loop back to `Read` after a backoff, with the attempt
//! closure called afresh so that nothing observed by a losing attempt is
//! reused. Any error ends the loop immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tally_store::StoreResult;
use tally_types::{CancellationCode, TransactOutcome};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{AllocError, AllocResult};

/// Where an allocation was when its deadline expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Reading the counter.
    Read,
    /// Issuing the conditional write.
    AttemptWrite,
    /// Waiting before the next attempt.
    Backoff,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::AttemptWrite => "write",
            Self::Backoff => "backoff",
        })
    }
}

/// How one attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    Success(T),
    /// The conditional write lost a race. Start over from a fresh read.
    Conflict,
}

/// A successful result and the number of attempts it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Per-attempt handle passed to the attempt closure.
///
/// Store calls made through [`Self::call`] are bounded by the allocation's
/// deadline.
#[derive(Clone, Copy, Debug)]
pub struct AttemptContext {
    number: u32,
    started: Instant,
    deadline: Option<Instant>,
}

impl AttemptContext {
    /// 1-based attempt number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Time since the allocation began.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Await a store round trip, failing if the deadline passes first.
    pub async fn call<T, F>(&self, phase: Phase, round_trip: F) -> AllocResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let Some(deadline) = self.deadline else {
            return Ok(round_trip.await?);
        };
        match tokio::time::timeout_at(deadline, round_trip).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.deadline_exceeded(phase)),
        }
    }

    fn deadline_exceeded(&self, phase: Phase) -> AllocError {
        let elapsed = self.elapsed();
        warn!(attempt = self.number, %phase, ?elapsed, "allocation deadline exceeded");
        AllocError::DeadlineExceeded {
            attempts: self.number,
            elapsed,
            phase,
        }
    }
}

/// Drives attempts until one succeeds, an error occurs, or the retry budget
/// runs out.
#[derive(Clone, Debug)]
pub struct RetryCoordinator {
    config: RetryConfig,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig) -> Self {
        if config.unbounded && config.deadline_ms.is_none() {
            warn!("unbounded retries without a deadline can starve a caller under contention");
        }
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `attempt` until it returns [`Attempt::Success`].
    ///
    /// The closure is invoked once per attempt and must redo its reads each
    /// time. Errors it returns are propagated as-is, without retry.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> AllocResult<Retried<T>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = AllocResult<Attempt<T>>>,
    {
        let started = Instant::now();
        let deadline = self.config.deadline().map(|d| started + d);
        let mut number = 0u32;

        loop {
            number = number.saturating_add(1);
            let ctx = AttemptContext {
                number,
                started,
                deadline,
            };

            match attempt(ctx).await? {
                Attempt::Success(value) => {
                    if number > 1 {
                        debug!(attempts = number, "allocation won after conflicts");
                    }
                    return Ok(Retried {
                        value,
                        attempts: number,
                    });
                }
                Attempt::Conflict => {
                    let retries = number - 1;
                    if !self.config.allows_retry(retries) {
                        warn!(attempts = number, "optimistic retries exhausted");
                        return Err(AllocError::RetriesExhausted { attempts: number });
                    }

                    let delay = self.config.delay_for(retries);
                    debug!(attempt = number, ?delay, "conflict; retrying from read");
                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            return Err(ctx.deadline_exceeded(Phase::Backoff));
                        }
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Decide what a transaction outcome means for the allocator whose guarded
/// counter update sits at `own_index`.
///
/// A failed precondition on the allocator's own operation is a lost race,
/// whatever the other operations report: a stale counter read also explains
/// a clash on the record it was going to claim. A failure elsewhere is only
/// returned as an error when the allocator's own operation passed.
pub fn classify_transaction(outcome: &TransactOutcome, own_index: usize) -> AllocResult<Attempt<()>> {
    let reasons = match outcome {
        TransactOutcome::Committed => return Ok(Attempt::Success(())),
        TransactOutcome::Canceled { reasons } => reasons,
    };

    match reasons.get(own_index).copied().unwrap_or(CancellationCode::None) {
        CancellationCode::ConditionalCheckFailed => Ok(Attempt::Conflict),
        CancellationCode::None => {
            let (index, code) = reasons
                .iter()
                .enumerate()
                .find(|(i, code)| *i != own_index && **code != CancellationCode::None)
                .map_or((own_index, CancellationCode::None), |(i, code)| (i, *code));
            Err(AllocError::TransactionCanceled { index, code })
        }
        code => Err(AllocError::TransactionCanceled {
            index: own_index,
            code,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tally_store::StoreError;

    fn fast(max_retries: u32) -> RetryCoordinator {
        RetryCoordinator::new(
            RetryConfig::default()
                .with_max_retries(max_retries)
                .with_base_delay_ms(0)
                .with_max_delay_ms(0),
        )
    }

    #[tokio::test]
    async fn first_success_takes_one_attempt() {
        let result = fast(3)
            .run(|_| async { Ok(Attempt::Success(7)) })
            .await
            .unwrap();
        assert_eq!(result, Retried { value: 7, attempts: 1 });
    }

    #[tokio::test]
    async fn conflicts_are_retried_with_fresh_attempts() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run(|ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(ctx.number(), n);
                async move {
                    if n < 3 {
                        Ok(Attempt::Conflict)
                    } else {
                        Ok(Attempt::Success(n))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result.value, 3);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn exhaustion_counts_every_attempt() {
        let err = fast(2)
            .run(|_| async { Ok::<Attempt<()>, AllocError>(Attempt::Conflict) })
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::RetriesExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn no_retry_gives_up_on_first_conflict() {
        let coordinator = RetryCoordinator::new(RetryConfig::no_retry());
        let err = coordinator
            .run(|_| async { Ok::<Attempt<()>, AllocError>(Attempt::Conflict) })
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::RetriesExhausted { attempts: 1 }));
    }

    #[tokio::test]
    async fn errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(10)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<Attempt<()>, _>(AllocError::Store(StoreError::Unavailable(
                        "connection refused".into(),
                    )))
                }
            })
            .await
            .unwrap_err();
        assert!(err.is_store_fault());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_bounds_a_slow_round_trip() {
        let coordinator = RetryCoordinator::new(
            RetryConfig::default().with_deadline(Duration::from_millis(20)),
        );
        let err = coordinator
            .run(|ctx| async move {
                ctx.call(Phase::Read, async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1)
                })
                .await
                .map(Attempt::Success)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocError::DeadlineExceeded {
                attempts: 1,
                phase: Phase::Read,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn deadline_bounds_unbounded_retries() {
        let coordinator = RetryCoordinator::new(
            RetryConfig::unbounded()
                .with_base_delay_ms(5)
                .with_max_delay_ms(5)
                .with_jitter(false)
                .with_deadline(Duration::from_millis(50)),
        );
        let err = coordinator
            .run(|_| async { Ok::<Attempt<()>, AllocError>(Attempt::Conflict) })
            .await
            .unwrap_err();
        match err {
            AllocError::DeadlineExceeded { attempts, phase, .. } => {
                assert!(attempts > 1);
                assert_eq!(phase, Phase::Backoff);
            }
            other => panic!("expected DeadlineExceeded, got {other}"),
        }
    }

    #[test]
    fn own_condition_failure_is_a_conflict() {
        let outcome = TransactOutcome::Canceled {
            reasons: vec![CancellationCode::ConditionalCheckFailed, CancellationCode::None],
        };
        assert_eq!(classify_transaction(&outcome, 0).unwrap(), Attempt::Conflict);
    }

    #[test]
    fn committed_is_success() {
        assert_eq!(
            classify_transaction(&TransactOutcome::Committed, 0).unwrap(),
            Attempt::Success(())
        );
    }

    #[test]
    fn foreign_condition_failure_is_fatal() {
        let outcome = TransactOutcome::Canceled {
            reasons: vec![CancellationCode::None, CancellationCode::ConditionalCheckFailed],
        };
        assert!(matches!(
            classify_transaction(&outcome, 0),
            Err(AllocError::TransactionCanceled {
                index: 1,
                code: CancellationCode::ConditionalCheckFailed
            })
        ));
    }

    #[test]
    fn own_conflict_wins_over_foreign_failures() {
        // The loser of a race also collides on the record the winner wrote.
        for foreign in [
            CancellationCode::ConditionalCheckFailed,
            CancellationCode::ValidationError,
        ] {
            let outcome = TransactOutcome::Canceled {
                reasons: vec![CancellationCode::ConditionalCheckFailed, foreign],
            };
            assert_eq!(classify_transaction(&outcome, 0).unwrap(), Attempt::Conflict);
        }
    }

    #[test]
    fn foreign_failure_is_reported_when_own_op_passed() {
        let outcome = TransactOutcome::Canceled {
            reasons: vec![CancellationCode::None, CancellationCode::ValidationError],
        };
        assert!(matches!(
            classify_transaction(&outcome, 0),
            Err(AllocError::TransactionCanceled {
                index: 1,
                code: CancellationCode::ValidationError
            })
        ));
    }

    #[test]
    fn own_non_condition_failure_is_fatal() {
        let outcome = TransactOutcome::Canceled {
            reasons: vec![CancellationCode::TransactionConflict, CancellationCode::None],
        };
        assert!(matches!(
            classify_transaction(&outcome, 0),
            Err(AllocError::TransactionCanceled {
                index: 0,
                code: CancellationCode::TransactionConflict
            })
        ));
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Read.to_string(), "read");
        assert_eq!(Phase::AttemptWrite.to_string(), "write");
        assert_eq!(Phase::Backoff.to_string(), "backoff");
    }
}
