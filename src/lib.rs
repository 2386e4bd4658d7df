//! # rayforce-core
//!
//! An in-process columnar analytic engine: a tagged-object value model over
//! a buddy-heap allocator, a pinned worker pool, a columnar query executor
//! with a fused hash-aggregate path, type-specialized parallel sort, and an
//! event-driven reactor speaking a length-prefixed IPC protocol.
//!
//! ## Layout
//!
//! - [`value`] - the tagged [`value::Value`] model: atoms, vectors, lists,
//!   dicts, tables, and the deferred-materialization intermediates
//!   (`MAPFILTER`/`MAPGROUP`/`MAPCOMMON`/`PARTEDI64`) the query executor
//!   produces before a caller forces them.
//! - [`heap`] - the buddy-system allocator backing every [`value::Value`]'s
//!   storage: size classes, per-thread slab caches, lock-free foreign-block
//!   return, and file-backed overflow for allocations past a configured
//!   threshold.
//! - [`pool`] - the pinned worker pool: task queue, heap borrow/merge
//!   between the pool and its workers, and the chunking helpers the sort and
//!   query paths use to split work across workers.
//! - [`hash`] - the 64-bit mixing function and the two hash-table shapes the
//!   aggregate path chooses between (dense perfect-hash vs. salted open
//!   addressing).
//! - [`sort`] - type-specialized radix/counting sort with a parallel
//!   k-way-merge path for large inputs.
//! - [`query`] - the columnar query executor: expression evaluation,
//!   filter/group/project, and the fused hash-aggregate.
//! - [`filter`] - row-id materialization and set operations shared by
//!   [`query`] and [`join`].
//! - [`join`] - hash join (inner and left-outer).
//! - [`wire`] - the self-describing value encoding and frame header used at
//!   rest and over the wire.
//! - [`reactor`] - the event-driven connection loop and length-prefixed IPC
//!   protocol built on [`wire`] (feature `reactor`).
//! - [`vm`] - the thread-local execution context: variable bindings and the
//!   `amend` in-place-update path.
//! - [`symbol`] - the process-global string interner backing the `SYMBOL`
//!   type.
//! - [`error`] - the crate's error type and the thread-local "last error"
//!   slot the REPL error-reporting convention relies on.
//! - [`config`] - runtime configuration: listen port, swap directory.

pub mod config;
pub mod error;
pub mod filter;
pub mod hash;
pub mod heap;
pub mod join;
pub mod pool;
pub mod query;
pub mod sort;
pub mod symbol;
pub mod value;
pub mod vm;
pub mod wire;

#[cfg(feature = "reactor")]
pub mod reactor;

pub use config::RuntimeConfig;
pub use error::{RayError, Result};
pub use heap::{Heap, HeapConfig};
pub use pool::Pool;
pub use query::{AggOp, Expr, GroupSpec, Query};
pub use value::Value;
