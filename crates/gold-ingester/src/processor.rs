// SPDX-License-Identifier: MIT OR Apache-2.0
//! The seam between the ingester and the branch-specific processors.

use async_trait::async_trait;
use gold_error::Result;

/// What a successful [`Processor::process`] call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    /// Results written from the file. Zero when the file had nothing
    /// ingestible, which still counts as success.
    pub results_ingested: usize,
}

/// One branch-specific ingestion pipeline: read, parse, resolve, write.
///
/// Implementations must be safe for concurrent invocation on distinct
/// files; every schema write they issue is conflict-tolerant.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Ingest one file end to end.
    ///
    /// # Errors
    ///
    /// A permanent error means the file can never be processed and must not
    /// be retried; a retryable error leaves the ledger untouched so the
    /// next poll re-surfaces the file.
    async fn process(&self, file_name: &str) -> Result<ProcessOutcome>;
}
