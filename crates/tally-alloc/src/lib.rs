//! Unique ID allocation from a shared counter.
//!
//! Many uncoordinated clients claim tokens from one counter item and write a
//! record under each token. Uniqueness comes entirely from the store's
//! conditional writes: a client reads the counter, then tries to advance it
//! with a write guarded by the value it read. Losing the race is normal and
//! sends the client back to read again.
//!
//! # Modules
//!
//! - [`strategy`] -- The four claim strategies and their token conventions
//! - [`config`] -- [`AllocatorConfig`] and [`RetryConfig`]
//! - [`retry`] -- The conflict retry loop and transaction outcome classification
//! - [`inserter`] -- Writing records under claimed tokens
//! - [`allocator`] -- [`CounterAllocator`], tying the above together
//! - [`error`] -- Error types for allocation
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tally_alloc::{AllocatorConfig, CounterAllocator, Strategy};
//! use tally_store::{InMemoryStore, TableSpec};
//! use tally_types::{AllocationToken, Item};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::new());
//! store.create_table(TableSpec::new("orders", "pk"))?;
//!
//! let config = AllocatorConfig::new("orders").with_strategy(Strategy::CasUpdate);
//! let allocator = CounterAllocator::new(store, config)?;
//! allocator.initialize(1).await?;
//!
//! let allocation = allocator
//!     .allocate_and_insert(Item::new().with("some_attribute", "hello"))
//!     .await?;
//! assert_eq!(allocation.token, AllocationToken::new(1));
//! assert_eq!(allocator.current().await?, 2);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod inserter;
pub mod retry;
pub mod strategy;

pub use allocator::{Allocation, CounterAllocator};
pub use config::{AllocatorConfig, RetryConfig};
pub use error::{AllocError, AllocResult};
pub use inserter::RecordInserter;
pub use retry::{classify_transaction, Attempt, AttemptContext, Phase, Retried, RetryCoordinator};
pub use strategy::Strategy;
