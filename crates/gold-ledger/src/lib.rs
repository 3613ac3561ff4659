// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-ledger
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The durable record of which result files have been ingested.
//!
//! [`Ledger::was_ingested`] consults an in-process LRU before the durable
//! store; ingestion is monotone, so positive answers never need
//! invalidation. [`Ledger::set_ingested`] is idempotent and safe under
//! concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_core::SourceFileId;
use gold_error::{IngestionError, Result};
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default capacity of the in-process was-ingested cache.
pub const DEFAULT_CACHE_SIZE: usize = 100_000;

/// The already-ingested ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record that a file has been fully processed. Idempotent.
    async fn set_ingested(&self, name: &str, ts: DateTime<Utc>) -> Result<()>;

    /// Whether a file has been fully processed before.
    async fn was_ingested(&self, name: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// SqlLedger
// ---------------------------------------------------------------------------

/// Ledger over the `IngestedFiles` table, keyed by the MD5 of the file name,
/// with an LRU front for positive answers.
pub struct SqlLedger {
    pool: sqlx::PgPool,
    seen: Mutex<LruCache<SourceFileId, ()>>,
}

impl SqlLedger {
    /// Wrap a pool with the default cache size.
    #[must_use]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self::with_cache_size(pool, DEFAULT_CACHE_SIZE)
    }

    /// Wrap a pool with an explicit cache size.
    #[must_use]
    pub fn with_cache_size(pool: sqlx::PgPool, size: usize) -> Self {
        let cap = NonZeroUsize::new(size.max(1)).expect("max(1) is non-zero");
        Self {
            pool,
            seen: Mutex::new(LruCache::new(cap)),
        }
    }

    fn cache_contains(&self, id: &SourceFileId) -> bool {
        self.seen.lock().expect("ledger cache lock").get(id).is_some()
    }

    fn cache_put(&self, id: SourceFileId) {
        self.seen.lock().expect("ledger cache lock").put(id, ());
    }
}

fn sql_err(e: sqlx::Error) -> IngestionError {
    IngestionError::retryable("ledger operation failed").with_source(e)
}

#[async_trait]
impl Ledger for SqlLedger {
    async fn set_ingested(&self, name: &str, ts: DateTime<Utc>) -> Result<()> {
        let id = SourceFileId::from_name(name);
        sqlx::query(
            "INSERT INTO IngestedFiles (source_file_id, source_file, last_ingested) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (source_file_id) DO UPDATE SET last_ingested = excluded.last_ingested",
        )
        .bind(id.as_bytes().to_vec())
        .bind(name)
        .bind(ts)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        self.cache_put(id);
        Ok(())
    }

    async fn was_ingested(&self, name: &str) -> Result<bool> {
        let id = SourceFileId::from_name(name);
        if self.cache_contains(&id) {
            return Ok(true);
        }
        let row = sqlx::query("SELECT 1 FROM IngestedFiles WHERE source_file_id = $1")
            .bind(id.as_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        let present = row.is_some();
        if present {
            self.cache_put(id);
        }
        Ok(present)
    }
}

// ---------------------------------------------------------------------------
// MemLedger
// ---------------------------------------------------------------------------

/// In-memory ledger for tests and local runs.
#[derive(Default)]
pub struct MemLedger {
    entries: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemLedger {
    /// Fresh, empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded (name, last_ingested) pair.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.entries
            .lock()
            .expect("ledger lock")
            .iter()
            .map(|(n, t)| (n.clone(), *t))
            .collect()
    }
}

#[async_trait]
impl Ledger for MemLedger {
    async fn set_ingested(&self, name: &str, ts: DateTime<Utc>) -> Result<()> {
        self.entries
            .lock()
            .expect("ledger lock")
            .insert(name.to_string(), ts);
        Ok(())
    }

    async fn was_ingested(&self, name: &str) -> Result<bool> {
        Ok(self.entries.lock().expect("ledger lock").contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_your_writes() {
        let ledger = MemLedger::new();
        assert!(!ledger.was_ingested("a.json").await.unwrap());
        ledger.set_ingested("a.json", Utc::now()).await.unwrap();
        assert!(ledger.was_ingested("a.json").await.unwrap());
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let ledger = MemLedger::new();
        let t1 = Utc::now();
        ledger.set_ingested("a.json", t1).await.unwrap();
        ledger.set_ingested("a.json", t1).await.unwrap();
        assert_eq!(ledger.entries().len(), 1);
    }
}
