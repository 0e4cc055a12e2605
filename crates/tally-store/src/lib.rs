//! Conditional-write store boundary for tally.
//!
//! The allocation protocol never coordinates through client-side locks. All
//! coordination is delegated to a store that evaluates preconditions
//! atomically with the write they guard. This crate defines that boundary and
//! ships one implementation of it.
//!
//! # Storage Backends
//!
//! All backends implement the [`ConditionalStore`] trait:
//!
//! - [`InMemoryStore`] -- table-based store for tests, demos, and embedding
//!
//! # Contract
//!
//! 1. Writes to the same item are linearized; a precondition is evaluated
//!    against the state the write would replace.
//! 2. A false precondition is reported as an outcome, never as an error, and
//!    leaves the store unchanged.
//! 3. A transaction applies all of its operations or none of them.
//! 4. Every [`StoreError`] is fatal to the caller's current attempt.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, StoreStats};
pub use traits::{ConditionalStore, GetOptions, TableSpec, MAX_TRANSACT_OPS};
