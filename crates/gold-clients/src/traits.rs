// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability sets a review or CI system must provide.

use async_trait::async_trait;
use gold_core::{Changelist, Patchset};
use gold_error::Result;

/// What a code-review system (Gerrit, GitHub, ...) must answer.
///
/// `None` means the entity does not exist *yet*: result files regularly
/// reach storage before their changelist does, so callers treat absence as
/// retryable rather than permanent.
#[async_trait]
pub trait CodeReviewClient: Send + Sync {
    /// The system name this client serves (e.g. "gerrit").
    fn system(&self) -> &str;

    /// Fetch a changelist by id.
    async fn get_changelist(&self, id: &str) -> Result<Option<Changelist>>;

    /// Fetch a patchset by its own id.
    async fn get_patchset_by_id(&self, changelist_id: &str, patchset_id: &str)
    -> Result<Option<Patchset>>;

    /// Fetch a patchset by its 1-based order within the changelist.
    async fn get_patchset_by_order(
        &self,
        changelist_id: &str,
        order: u32,
    ) -> Result<Option<Patchset>>;
}

/// What a tryjob looks like to its CI system. The changelist/patchset
/// attribution comes from the result file, not from here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryjobInfo {
    /// Id within the CI system.
    pub id: String,
    /// Human-readable name shown in UIs.
    pub display_name: String,
}

/// One change associated with a tryjob, as reported by the CI system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryjobChange {
    /// Code-review system the change lives in.
    pub crs: String,
    /// Changelist id.
    pub changelist_id: String,
    /// 1-based patchset order the job ran against.
    pub patchset_order: u32,
}

/// What a continuous-integration system (Buildbucket, ...) must answer.
#[async_trait]
pub trait ContinuousIntegrationClient: Send + Sync {
    /// The system name this client serves (e.g. "buildbucket").
    fn system(&self) -> &str;

    /// Fetch a tryjob by id. `None` means not (yet) known.
    async fn get_tryjob(&self, id: &str) -> Result<Option<TryjobInfo>>;

    /// The changes associated with a tryjob, for attribution fallback.
    async fn get_tryjob_changes(&self, id: &str) -> Result<Vec<TryjobChange>>;
}
