// SPDX-License-Identifier: MIT OR Apache-2.0
//! Attribution fallback: recover (crs, changelist, patchset order) from a
//! bare tryjob id by asking the CI system.

use crate::ratelimit::RateLimiter;
use crate::traits::{ContinuousIntegrationClient, TryjobChange};
use async_trait::async_trait;
use gold_error::Result;
use std::sync::Arc;

/// Where a tryjob's results belong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryjobAttribution {
    /// Code-review system of the associated change.
    pub crs: String,
    /// Changelist id.
    pub changelist_id: String,
    /// 1-based patchset order the job ran against.
    pub patchset_order: u32,
}

/// Resolves a bare tryjob id to its attribution.
#[async_trait]
pub trait TryjobLookup: Send + Sync {
    /// Attribute the tryjob, or `None` when the CI system does not know it.
    async fn lookup(&self, tryjob_id: &str) -> Result<Option<TryjobAttribution>>;
}

/// [`TryjobLookup`] over a CI client, rate-limited to a configured QPS and
/// burst.
pub struct CisTryjobLookup {
    cis: Arc<dyn ContinuousIntegrationClient>,
    limiter: RateLimiter,
}

impl CisTryjobLookup {
    /// Build a lookup over `cis` limited to `qps`/`burst`.
    #[must_use]
    pub fn new(cis: Arc<dyn ContinuousIntegrationClient>, qps: f64, burst: u32) -> Self {
        Self {
            cis,
            limiter: RateLimiter::new(qps, burst),
        }
    }

    /// Build a lookup with the default limits.
    #[must_use]
    pub fn with_default_limits(cis: Arc<dyn ContinuousIntegrationClient>) -> Self {
        Self::new(cis, crate::ratelimit::DEFAULT_QPS, crate::ratelimit::DEFAULT_BURST)
    }
}

/// Changelist ids are usually decimal; compare numerically when possible so
/// "1234" beats "999".
fn change_ordering_key(change: &TryjobChange) -> (u64, String) {
    let numeric = change.changelist_id.parse::<u64>().unwrap_or(0);
    (numeric, change.changelist_id.clone())
}

#[async_trait]
impl TryjobLookup for CisTryjobLookup {
    async fn lookup(&self, tryjob_id: &str) -> Result<Option<TryjobAttribution>> {
        self.limiter.acquire().await;
        let changes = self.cis.get_tryjob_changes(tryjob_id).await?;
        Ok(changes
            .into_iter()
            .max_by_key(change_ordering_key)
            .map(|change| TryjobAttribution {
                crs: change.crs,
                changelist_id: change.changelist_id,
                patchset_order: change.patchset_order,
            }))
    }
}
