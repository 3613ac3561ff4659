// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory fakes for every client seam, with call counters so tests can
//! assert how often the external systems were consulted.

use crate::traits::{
    CodeReviewClient, ContinuousIntegrationClient, TryjobChange, TryjobInfo,
};
use crate::vcs::{VcsAdapter, VcsCommit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_core::{Changelist, Patchset};
use gold_error::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// ---------------------------------------------------------------------------
// MockCodeReview
// ---------------------------------------------------------------------------

/// A fake code-review system backed by maps.
pub struct MockCodeReview {
    system: String,
    changelists: Mutex<HashMap<String, Changelist>>,
    patchsets: Mutex<Vec<Patchset>>,
    changelist_calls: AtomicUsize,
}

impl MockCodeReview {
    /// A fake serving the given system name.
    #[must_use]
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            changelists: Mutex::new(HashMap::new()),
            patchsets: Mutex::new(Vec::new()),
            changelist_calls: AtomicUsize::new(0),
        }
    }

    /// Make a changelist known to the fake.
    pub fn add_changelist(&self, changelist: Changelist) {
        self.changelists
            .lock()
            .expect("mock lock")
            .insert(changelist.id.clone(), changelist);
    }

    /// Make a patchset known to the fake.
    pub fn add_patchset(&self, patchset: Patchset) {
        self.patchsets.lock().expect("mock lock").push(patchset);
    }

    /// How many times `get_changelist` was called.
    #[must_use]
    pub fn changelist_calls(&self) -> usize {
        self.changelist_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CodeReviewClient for MockCodeReview {
    fn system(&self) -> &str {
        &self.system
    }

    async fn get_changelist(&self, id: &str) -> Result<Option<Changelist>> {
        self.changelist_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.changelists.lock().expect("mock lock").get(id).cloned())
    }

    async fn get_patchset_by_id(
        &self,
        changelist_id: &str,
        patchset_id: &str,
    ) -> Result<Option<Patchset>> {
        Ok(self
            .patchsets
            .lock()
            .expect("mock lock")
            .iter()
            .find(|ps| ps.changelist_id == changelist_id && ps.id == patchset_id)
            .cloned())
    }

    async fn get_patchset_by_order(
        &self,
        changelist_id: &str,
        order: u32,
    ) -> Result<Option<Patchset>> {
        Ok(self
            .patchsets
            .lock()
            .expect("mock lock")
            .iter()
            .find(|ps| ps.changelist_id == changelist_id && ps.order == order)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// MockCi
// ---------------------------------------------------------------------------

/// A fake continuous-integration system backed by maps.
pub struct MockCi {
    system: String,
    tryjobs: Mutex<HashMap<String, TryjobInfo>>,
    changes: Mutex<HashMap<String, Vec<TryjobChange>>>,
    tryjob_calls: AtomicUsize,
}

impl MockCi {
    /// A fake serving the given system name.
    #[must_use]
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            tryjobs: Mutex::new(HashMap::new()),
            changes: Mutex::new(HashMap::new()),
            tryjob_calls: AtomicUsize::new(0),
        }
    }

    /// Make a tryjob known to the fake.
    pub fn add_tryjob(&self, info: TryjobInfo) {
        self.tryjobs
            .lock()
            .expect("mock lock")
            .insert(info.id.clone(), info);
    }

    /// Associate a change with a tryjob id.
    pub fn add_tryjob_change(&self, tryjob_id: &str, change: TryjobChange) {
        self.changes
            .lock()
            .expect("mock lock")
            .entry(tryjob_id.to_string())
            .or_default()
            .push(change);
    }

    /// How many times `get_tryjob` was called.
    #[must_use]
    pub fn tryjob_calls(&self) -> usize {
        self.tryjob_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ContinuousIntegrationClient for MockCi {
    fn system(&self) -> &str {
        &self.system
    }

    async fn get_tryjob(&self, id: &str) -> Result<Option<TryjobInfo>> {
        self.tryjob_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.tryjobs.lock().expect("mock lock").get(id).cloned())
    }

    async fn get_tryjob_changes(&self, id: &str) -> Result<Vec<TryjobChange>> {
        Ok(self
            .changes
            .lock()
            .expect("mock lock")
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockVcs
// ---------------------------------------------------------------------------

/// A fake version-control adapter serving a fixed commit history.
#[derive(Default)]
pub struct MockVcs {
    commits: Mutex<BTreeMap<DateTime<Utc>, VcsCommit>>,
    updates: AtomicUsize,
}

impl MockVcs {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit to the fake history.
    pub fn add_commit(&self, git_hash: impl Into<String>, timestamp: DateTime<Utc>) {
        self.commits.lock().expect("mock lock").insert(
            timestamp,
            VcsCommit {
                git_hash: git_hash.into(),
                timestamp,
            },
        );
    }

    /// How many times `update` was called.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VcsAdapter for MockVcs {
    async fn update(&self) -> Result<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn commits_after(&self, start: DateTime<Utc>) -> Result<Vec<VcsCommit>> {
        Ok(self
            .commits
            .lock()
            .expect("mock lock")
            .range(start..)
            .map(|(_, c)| c.clone())
            .collect())
    }
}
