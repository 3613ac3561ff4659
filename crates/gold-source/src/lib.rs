// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-source
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The source adapter the ingester drives. A [`BucketSource`] is a bucket
//! plus a prefix over an [`ObjectStore`]; it answers [`handles_file`],
//! serves file bytes, and enumerates time ranges by expanding hourly
//! directories (`prefix/YYYY/MM/DD/HH`).
//!
//! [`handles_file`]: IngestionSource::handles_file

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use gold_error::{IngestionError, Result};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::io::AsyncRead;
use tracing::warn;

/// A readable byte stream for one stored object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// The out-of-process object-storage client. Only the two operations the
/// source adapter needs; the real client lives elsewhere.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open the named object for reading.
    async fn get(&self, name: &str) -> Result<ObjectReader>;

    /// List the full names of every object under the given directory.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// IngestionSource
// ---------------------------------------------------------------------------

/// A producer of ingestible file names and bytes.
#[async_trait]
pub trait IngestionSource: Send + Sync {
    /// Whether this source is responsible for the named file.
    fn handles_file(&self, name: &str) -> bool;

    /// Open the named file for reading.
    async fn get_reader(&self, name: &str) -> Result<ObjectReader>;

    /// Every file uploaded in `[start, end]`, by expanding the hourly
    /// directories that overlap the range. Failed directory reads are
    /// logged and skipped; they never abort the enumeration.
    async fn search_for_files(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// BucketSource
// ---------------------------------------------------------------------------

/// An [`IngestionSource`] over one bucket/prefix pair.
pub struct BucketSource {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl BucketSource {
    /// Build a source for `bucket`/`prefix` over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn root(&self) -> String {
        format!("{}/{}", self.bucket, self.prefix)
    }

    fn hourly_dir(&self, at: DateTime<Utc>) -> String {
        format!("{}/{}", self.root(), at.format("%Y/%m/%d/%H"))
    }
}

#[async_trait]
impl IngestionSource for BucketSource {
    fn handles_file(&self, name: &str) -> bool {
        name.starts_with(&format!("{}/", self.root()))
    }

    async fn get_reader(&self, name: &str) -> Result<ObjectReader> {
        self.store.get(name).await
    }

    async fn search_for_files(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut at = start
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(start);
        while at <= end {
            let dir = self.hourly_dir(at);
            match self.store.list(&dir).await {
                Ok(mut found) => names.append(&mut found),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "skipping unlistable directory");
                }
            }
            at = at + Duration::hours(1);
        }
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// MemObjectStore
// ---------------------------------------------------------------------------

/// In-memory [`ObjectStore`] for tests and local runs.
#[derive(Default)]
pub struct MemObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    unlistable: Mutex<Vec<String>>,
}

impl MemObjectStore {
    /// Fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object.
    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.objects.lock().expect("store lock").insert(name.into(), bytes);
    }

    /// Make `list` fail for the given directory, to exercise the
    /// skip-and-continue path.
    pub fn poison_dir(&self, dir: impl Into<String>) {
        self.unlistable.lock().expect("store lock").push(dir.into());
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn get(&self, name: &str) -> Result<ObjectReader> {
        let objects = self.objects.lock().expect("store lock");
        match objects.get(name) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(IngestionError::retryable(format!("object not found: {name}"))),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        if self.unlistable.lock().expect("store lock").iter().any(|d| d == dir) {
            return Err(IngestionError::retryable(format!("cannot list {dir}")));
        }
        let want = format!("{dir}/");
        Ok(self
            .objects
            .lock()
            .expect("store lock")
            .keys()
            .filter(|name| name.starts_with(&want))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;

    fn source(store: Arc<MemObjectStore>) -> BucketSource {
        BucketSource::new(store, "gold-results", "dm-json-v1")
    }

    #[test]
    fn handles_only_its_prefix() {
        let src = source(Arc::new(MemObjectStore::new()));
        assert!(src.handles_file("gold-results/dm-json-v1/2024/01/02/03/f.json"));
        assert!(!src.handles_file("gold-results/other-prefix/2024/01/02/03/f.json"));
        assert!(!src.handles_file("another-bucket/dm-json-v1/2024/01/02/03/f.json"));
    }

    #[tokio::test]
    async fn reads_back_stored_bytes() {
        let store = Arc::new(MemObjectStore::new());
        store.insert("gold-results/dm-json-v1/2024/01/02/03/f.json", b"{}".to_vec());
        let src = source(Arc::clone(&store));
        let mut reader = src
            .get_reader("gold-results/dm-json-v1/2024/01/02/03/f.json")
            .await
            .unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"{}");
    }

    #[tokio::test]
    async fn search_expands_hourly_directories() {
        let store = Arc::new(MemObjectStore::new());
        store.insert("gold-results/dm-json-v1/2024/01/02/03/a.json", vec![]);
        store.insert("gold-results/dm-json-v1/2024/01/02/04/b.json", vec![]);
        store.insert("gold-results/dm-json-v1/2024/01/02/07/late.json", vec![]);
        let src = source(Arc::clone(&store));
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 20, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap();
        let names = src.search_for_files(start, end).await.unwrap();
        assert_eq!(
            names,
            vec![
                "gold-results/dm-json-v1/2024/01/02/03/a.json".to_string(),
                "gold-results/dm-json-v1/2024/01/02/04/b.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unlistable_directory_is_skipped() {
        let store = Arc::new(MemObjectStore::new());
        store.insert("gold-results/dm-json-v1/2024/01/02/04/b.json", vec![]);
        store.poison_dir("gold-results/dm-json-v1/2024/01/02/03");
        let src = source(Arc::clone(&store));
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 4, 30, 0).unwrap();
        let names = src.search_for_files(start, end).await.unwrap();
        assert_eq!(names.len(), 1);
    }
}
