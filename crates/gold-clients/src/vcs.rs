// SPDX-License-Identifier: MIT OR Apache-2.0
//! The version-control adapter the poll loop asks for commit windows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_error::Result;

/// One commit on the primary branch, as the adapter reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsCommit {
    /// The commit's hash.
    pub git_hash: String,
    /// When the commit landed.
    pub timestamp: DateTime<Utc>,
}

/// Answers "what landed recently" for commit-oriented ingesters.
#[async_trait]
pub trait VcsAdapter: Send + Sync {
    /// Refresh the adapter's view of the repository.
    async fn update(&self) -> Result<()>;

    /// Commits with `timestamp >= start`, oldest first.
    async fn commits_after(&self, start: DateTime<Utc>) -> Result<Vec<VcsCommit>>;
}
