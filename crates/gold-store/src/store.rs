// SPDX-License-Identifier: MIT OR Apache-2.0
//! The seam between processors and the backing schema.

use crate::rows::{
    ExpectationRow, GroupingRow, OptionsRow, PrimaryBranchParamRow, SecondaryBranchParamRow,
    SecondaryBranchValueRow, TiledTraceDigestRow, TraceRow, TraceValueRow, ValueAtHeadRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_core::{Changelist, CommitId, Patchset, SourceFileId, TileId, Tryjob};
use gold_error::Result;

/// Everything a processor needs from the backing schema.
///
/// All batch writes are conflict-tolerant: re-issuing a write for rows that
/// already exist is a no-op (or a guarded update where the row documents
/// one), so callers may retry freely. Implementations must be safe for
/// concurrent calls on distinct files.
#[async_trait]
pub trait IngestionStore: Send + Sync {
    // -- Commit resolution ---------------------------------------------------

    /// Look up the commit id assigned to a git hash, if the commit is known.
    async fn get_commit_by_git_hash(&self, git_hash: &str) -> Result<Option<CommitId>>;

    /// Record an uploaded commit id with its metadata. Idempotent.
    async fn upsert_metadata_commit(&self, commit_id: &CommitId, metadata: &str) -> Result<()>;

    /// Assign the target commit to a tile, inserting it into the
    /// commits-with-data ledger. The lookup, decision, and insert happen in
    /// one transactional unit; a concurrent insert for the same commit wins
    /// silently.
    async fn resolve_tile(&self, commit_id: &CommitId, tile_width: i64) -> Result<TileId>;

    // -- Primary-branch batch writes -----------------------------------------

    /// Insert options rows; existing ids are untouched.
    async fn put_options(&self, rows: Vec<OptionsRow>) -> Result<()>;

    /// Insert grouping rows; existing ids are untouched.
    async fn put_groupings(&self, rows: Vec<GroupingRow>) -> Result<()>;

    /// Insert trace rows; existing ids are untouched.
    async fn put_traces(&self, rows: Vec<TraceRow>) -> Result<()>;

    /// Insert expectation rows. An existing (grouping, digest) row keeps its
    /// label no matter what.
    async fn put_expectations(&self, rows: Vec<ExpectationRow>) -> Result<()>;

    /// Upsert trace values.
    async fn put_trace_values(&self, rows: Vec<TraceValueRow>) -> Result<()>;

    /// Upsert values-at-head; a stored row only moves forward in commit
    /// order.
    async fn put_values_at_head(&self, rows: Vec<ValueAtHeadRow>) -> Result<()>;

    /// Insert primary-branch params; existing tuples are untouched.
    async fn put_primary_branch_params(&self, rows: Vec<PrimaryBranchParamRow>) -> Result<()>;

    /// Upsert tiled trace digests, updating the grouping only when it
    /// changed.
    async fn put_tiled_trace_digests(&self, rows: Vec<TiledTraceDigestRow>) -> Result<()>;

    /// Record that a file was ingested. Always the last write for a file so
    /// a crash mid-ingest causes reprocessing.
    async fn upsert_source_file(
        &self,
        id: &SourceFileId,
        name: &str,
        last_ingested: DateTime<Utc>,
    ) -> Result<()>;

    // -- Secondary branch ----------------------------------------------------

    /// Fetch a changelist previously materialized from a code-review system.
    async fn get_changelist(&self, system: &str, id: &str) -> Result<Option<Changelist>>;

    /// Upsert a changelist (status and timestamps may change).
    async fn put_changelist(&self, changelist: &Changelist) -> Result<()>;

    /// Fetch a patchset by its id.
    async fn get_patchset(&self, system: &str, patchset_id: &str) -> Result<Option<Patchset>>;

    /// Fetch a patchset by its changelist and 1-based order.
    async fn get_patchset_by_order(
        &self,
        system: &str,
        changelist_id: &str,
        order: u32,
    ) -> Result<Option<Patchset>>;

    /// Upsert a patchset.
    async fn put_patchset(&self, patchset: &Patchset) -> Result<()>;

    /// Fetch a tryjob.
    async fn get_tryjob(&self, system: &str, id: &str) -> Result<Option<Tryjob>>;

    /// Upsert a tryjob.
    async fn put_tryjob(&self, tryjob: &Tryjob) -> Result<()>;

    /// Insert secondary-branch params; existing tuples are untouched.
    async fn put_secondary_branch_params(
        &self,
        rows: Vec<SecondaryBranchParamRow>,
    ) -> Result<()>;

    /// Upsert secondary-branch values.
    async fn put_secondary_branch_values(
        &self,
        rows: Vec<SecondaryBranchValueRow>,
    ) -> Result<()>;
}
