//! Foundation types for tally.
//!
//! This crate provides the value and operation types shared by the store
//! boundary and the allocation protocol built on top of it. It contains no
//! I/O: every type here is plain data plus the pure logic needed to evaluate
//! it (for example, checking a [`Precondition`] against an item).
//!
//! # Key Types
//!
//! - [`AttributeValue`] / [`Item`] -- the document model of the backing store
//! - [`Precondition`] -- a predicate evaluated atomically with a write
//! - [`ConditionalOp`] -- one write inside a multi-item transaction
//! - [`WriteOutcome`] / [`TransactOutcome`] -- typed results of conditional writes
//! - [`AllocationToken`] -- a value claimed from a shared counter

pub mod condition;
pub mod error;
pub mod op;
pub mod token;
pub mod value;

pub use condition::Precondition;
pub use error::{TypeError, TypeResult};
pub use op::{CancellationCode, ConditionalOp, TransactOutcome, WriteOutcome};
pub use token::AllocationToken;
pub use value::{AttributeValue, Item};
