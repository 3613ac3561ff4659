// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The normalized schema the ingestion pipeline writes into, behind the
//! [`IngestionStore`] trait: row shapes, chunked conflict-tolerant batch
//! writes, monotonic tile assignment, and the shared LRU cache set.
//!
//! Two implementations ship: [`SqlStore`] over a Postgres-compatible
//! backend, and [`MemStore`] with identical semantics for tests and local
//! runs.

pub mod caches;
pub mod mem;
pub mod rows;
pub mod sql;
pub mod store;
pub mod tile;

pub use caches::{CacheSizes, CacheStats, Caches};
pub use mem::MemStore;
pub use rows::{
    ExpectationRow, GroupingRow, Label, NUM_SHARDS, OptionsRow, PrimaryBranchParamRow,
    SecondaryBranchParamRow, SecondaryBranchValueRow, TiledTraceDigestRow, TraceRow, TraceValueRow,
    ValueAtHeadRow,
};
pub use sql::SqlStore;
pub use store::IngestionStore;
pub use tile::decide_tile;
