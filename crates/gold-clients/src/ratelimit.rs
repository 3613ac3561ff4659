// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token-bucket rate limiting for review/CI lookups.

use crate::traits::{
    CodeReviewClient, ContinuousIntegrationClient, TryjobChange, TryjobInfo,
};
use async_trait::async_trait;
use gold_core::{Changelist, Patchset};
use gold_error::Result;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default sustained rate for review/CI lookups.
pub const DEFAULT_QPS: f64 = 10.0;

/// Default burst for review/CI lookups.
pub const DEFAULT_BURST: u32 = 40;

/// A token bucket: `qps` tokens accrue per second up to `burst`; each
/// acquisition spends one.
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled: Instant,
}

impl RateLimiter {
    /// Build a limiter allowing `qps` sustained calls per second with the
    /// given burst. The bucket starts full.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then spend it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("limiter lock");
                let now = Instant::now();
                let elapsed = now.duration_since(state.refilled).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.qps).min(self.burst);
                state.refilled = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.qps)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// A [`CodeReviewClient`] that acquires a token before every call.
pub struct RateLimitedCodeReview<C> {
    inner: C,
    limiter: RateLimiter,
}

impl<C: CodeReviewClient> RateLimitedCodeReview<C> {
    /// Wrap a client with the given limits.
    #[must_use]
    pub fn new(inner: C, qps: f64, burst: u32) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(qps, burst),
        }
    }
}

#[async_trait]
impl<C: CodeReviewClient> CodeReviewClient for RateLimitedCodeReview<C> {
    fn system(&self) -> &str {
        self.inner.system()
    }

    async fn get_changelist(&self, id: &str) -> Result<Option<Changelist>> {
        self.limiter.acquire().await;
        self.inner.get_changelist(id).await
    }

    async fn get_patchset_by_id(
        &self,
        changelist_id: &str,
        patchset_id: &str,
    ) -> Result<Option<Patchset>> {
        self.limiter.acquire().await;
        self.inner.get_patchset_by_id(changelist_id, patchset_id).await
    }

    async fn get_patchset_by_order(
        &self,
        changelist_id: &str,
        order: u32,
    ) -> Result<Option<Patchset>> {
        self.limiter.acquire().await;
        self.inner.get_patchset_by_order(changelist_id, order).await
    }
}

/// A [`ContinuousIntegrationClient`] that acquires a token before every
/// call.
pub struct RateLimitedCi<C> {
    inner: C,
    limiter: RateLimiter,
}

impl<C: ContinuousIntegrationClient> RateLimitedCi<C> {
    /// Wrap a client with the given limits.
    #[must_use]
    pub fn new(inner: C, qps: f64, burst: u32) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(qps, burst),
        }
    }
}

#[async_trait]
impl<C: ContinuousIntegrationClient> ContinuousIntegrationClient for RateLimitedCi<C> {
    fn system(&self) -> &str {
        self.inner.system()
    }

    async fn get_tryjob(&self, id: &str) -> Result<Option<TryjobInfo>> {
        self.limiter.acquire().await;
        self.inner.get_tryjob(id).await
    }

    async fn get_tryjob_changes(&self, id: &str) -> Result<Vec<TryjobChange>> {
        self.limiter.acquire().await;
        self.inner.get_tryjob_changes(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::new(10.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_at_qps() {
        let limiter = RateLimiter::new(10.0, 1);
        limiter.acquire().await;
        let start = Instant::now();
        // Bucket is empty; the next token arrives after ~100ms of virtual
        // time.
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
