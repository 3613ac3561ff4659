// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`IngestionStore`] with the same conflict semantics as the SQL
//! store. Used by tests and local runs; also the reference for what the
//! guarded upserts mean.

use crate::rows::{
    ExpectationRow, GroupingRow, Label, OptionsRow, PrimaryBranchParamRow,
    SecondaryBranchParamRow, SecondaryBranchValueRow, TiledTraceDigestRow, TraceRow,
    TraceValueRow, ValueAtHeadRow,
};
use crate::store::IngestionStore;
use crate::tile::decide_tile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_core::{
    Changelist, CommitId, Digest, GroupingId, Patchset, SourceFileId, TileId, TraceId, Tryjob,
};
use gold_error::{IngestionError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Tables {
    source_files: BTreeMap<Vec<u8>, (String, DateTime<Utc>)>,
    git_commits: BTreeMap<String, CommitId>,
    metadata_commits: BTreeMap<String, String>,
    commits_with_data: BTreeMap<CommitId, TileId>,
    options: BTreeMap<Vec<u8>, OptionsRow>,
    groupings: BTreeMap<Vec<u8>, GroupingRow>,
    traces: BTreeMap<TraceId, TraceRow>,
    expectations: BTreeMap<(GroupingId, Digest), Label>,
    trace_values: BTreeMap<(TraceId, CommitId), TraceValueRow>,
    values_at_head: BTreeMap<TraceId, ValueAtHeadRow>,
    primary_branch_params: BTreeSet<PrimaryBranchParamRow>,
    tiled_trace_digests: BTreeMap<(TraceId, TileId, Digest), GroupingId>,
    changelists: BTreeMap<(String, String), Changelist>,
    patchsets: BTreeMap<(String, String), Patchset>,
    tryjobs: BTreeMap<(String, String), Tryjob>,
    secondary_branch_params: BTreeSet<SecondaryBranchParamRow>,
    secondary_branch_values: BTreeMap<(String, String, TraceId), SecondaryBranchValueRow>,
}

/// In-memory store. Cheap to clone table snapshots out of; every write takes
/// one internal lock, so concurrent callers serialize per operation exactly
/// like short per-statement transactions would.
#[derive(Default)]
pub struct MemStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemStore {
    /// Fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("mem store lock")
    }

    fn check_fail(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(IngestionError::retryable("injected storage failure"))
        } else {
            Ok(())
        }
    }

    /// Make every subsequent operation fail with a retryable error, until
    /// called again with `false`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    // -- Seeding helpers -----------------------------------------------------

    /// Seed the git commit table the way the repo follower would.
    pub fn seed_git_commit(&self, git_hash: &str, commit_id: CommitId) {
        self.lock().git_commits.insert(git_hash.to_string(), commit_id);
    }

    /// Seed a commits-with-data row directly.
    pub fn seed_commit_with_data(&self, commit_id: CommitId, tile: TileId) {
        self.lock().commits_with_data.insert(commit_id, tile);
    }

    /// Seed a triaged expectation, as the triage service would.
    pub fn seed_expectation(&self, grouping_id: GroupingId, digest: Digest, label: Label) {
        self.lock().expectations.insert((grouping_id, digest), label);
    }

    // -- Snapshot accessors --------------------------------------------------

    /// All source-file rows as (name, last_ingested).
    #[must_use]
    pub fn source_files(&self) -> Vec<(String, DateTime<Utc>)> {
        self.lock().source_files.values().cloned().collect()
    }

    /// All commits-with-data rows in commit order.
    #[must_use]
    pub fn commits_with_data(&self) -> Vec<(CommitId, TileId)> {
        self.lock()
            .commits_with_data
            .iter()
            .map(|(c, t)| (c.clone(), *t))
            .collect()
    }

    /// The tile a commit was assigned, if any.
    #[must_use]
    pub fn commit_tile(&self, commit_id: &CommitId) -> Option<TileId> {
        self.lock().commits_with_data.get(commit_id).copied()
    }

    /// Number of grouping rows.
    #[must_use]
    pub fn groupings_len(&self) -> usize {
        self.lock().groupings.len()
    }

    /// Number of options rows.
    #[must_use]
    pub fn options_len(&self) -> usize {
        self.lock().options.len()
    }

    /// All trace rows.
    #[must_use]
    pub fn traces(&self) -> Vec<TraceRow> {
        self.lock().traces.values().cloned().collect()
    }

    /// All trace-value rows.
    #[must_use]
    pub fn trace_values(&self) -> Vec<TraceValueRow> {
        self.lock().trace_values.values().cloned().collect()
    }

    /// All values-at-head rows.
    #[must_use]
    pub fn values_at_head(&self) -> Vec<ValueAtHeadRow> {
        self.lock().values_at_head.values().cloned().collect()
    }

    /// The value-at-head for one trace.
    #[must_use]
    pub fn value_at_head(&self, trace_id: &TraceId) -> Option<ValueAtHeadRow> {
        self.lock().values_at_head.get(trace_id).cloned()
    }

    /// All expectation rows.
    #[must_use]
    pub fn expectations(&self) -> Vec<ExpectationRow> {
        self.lock()
            .expectations
            .iter()
            .map(|((g, d), l)| ExpectationRow {
                grouping_id: *g,
                digest: *d,
                label: *l,
            })
            .collect()
    }

    /// The label stored for a (grouping, digest), if any.
    #[must_use]
    pub fn expectation_label(&self, grouping_id: &GroupingId, digest: &Digest) -> Option<Label> {
        self.lock().expectations.get(&(*grouping_id, *digest)).copied()
    }

    /// All primary-branch param rows.
    #[must_use]
    pub fn primary_branch_params(&self) -> Vec<PrimaryBranchParamRow> {
        self.lock().primary_branch_params.iter().cloned().collect()
    }

    /// All tiled-trace-digest rows.
    #[must_use]
    pub fn tiled_trace_digests(&self) -> Vec<TiledTraceDigestRow> {
        self.lock()
            .tiled_trace_digests
            .iter()
            .map(|((t, tile, d), g)| TiledTraceDigestRow {
                trace_id: *t,
                tile_id: *tile,
                digest: *d,
                grouping_id: *g,
            })
            .collect()
    }

    /// All changelist rows.
    #[must_use]
    pub fn changelists(&self) -> Vec<Changelist> {
        self.lock().changelists.values().cloned().collect()
    }

    /// All patchset rows.
    #[must_use]
    pub fn patchsets(&self) -> Vec<Patchset> {
        self.lock().patchsets.values().cloned().collect()
    }

    /// All tryjob rows.
    #[must_use]
    pub fn tryjobs(&self) -> Vec<Tryjob> {
        self.lock().tryjobs.values().cloned().collect()
    }

    /// All secondary-branch param rows.
    #[must_use]
    pub fn secondary_branch_params(&self) -> Vec<SecondaryBranchParamRow> {
        self.lock().secondary_branch_params.iter().cloned().collect()
    }

    /// All secondary-branch value rows.
    #[must_use]
    pub fn secondary_branch_values(&self) -> Vec<SecondaryBranchValueRow> {
        self.lock().secondary_branch_values.values().cloned().collect()
    }
}

#[async_trait]
impl IngestionStore for MemStore {
    async fn get_commit_by_git_hash(&self, git_hash: &str) -> Result<Option<CommitId>> {
        self.check_fail()?;
        Ok(self.lock().git_commits.get(git_hash).cloned())
    }

    async fn upsert_metadata_commit(&self, commit_id: &CommitId, metadata: &str) -> Result<()> {
        self.check_fail()?;
        self.lock()
            .metadata_commits
            .insert(commit_id.as_str().to_string(), metadata.to_string());
        Ok(())
    }

    async fn resolve_tile(&self, commit_id: &CommitId, tile_width: i64) -> Result<TileId> {
        self.check_fail()?;
        let mut tables = self.lock();
        let before = tables
            .commits_with_data
            .range(..=commit_id.clone())
            .next_back()
            .map(|(c, t)| (c.clone(), *t));
        let after = tables
            .commits_with_data
            .range(commit_id.clone()..)
            .next()
            .map(|(_, t)| *t);
        let commits_in_before_tile = match &before {
            Some((_, tile)) => tables
                .commits_with_data
                .values()
                .filter(|t| *t == tile)
                .count() as u64,
            None => 0,
        };
        let tile = decide_tile(
            before.as_ref().map(|(c, t)| (c, *t)),
            after,
            commits_in_before_tile,
            tile_width,
        );
        tables
            .commits_with_data
            .entry(commit_id.clone())
            .or_insert(tile);
        Ok(tile)
    }

    async fn put_options(&self, rows: Vec<OptionsRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables
                .options
                .entry(row.options_id.as_bytes().to_vec())
                .or_insert(row);
        }
        Ok(())
    }

    async fn put_groupings(&self, rows: Vec<GroupingRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables
                .groupings
                .entry(row.grouping_id.as_bytes().to_vec())
                .or_insert(row);
        }
        Ok(())
    }

    async fn put_traces(&self, rows: Vec<TraceRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables.traces.entry(row.trace_id).or_insert(row);
        }
        Ok(())
    }

    async fn put_expectations(&self, rows: Vec<ExpectationRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables
                .expectations
                .entry((row.grouping_id, row.digest))
                .or_insert(row.label);
        }
        Ok(())
    }

    async fn put_trace_values(&self, rows: Vec<TraceValueRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables
                .trace_values
                .insert((row.trace_id, row.commit_id.clone()), row);
        }
        Ok(())
    }

    async fn put_values_at_head(&self, rows: Vec<ValueAtHeadRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            match tables.values_at_head.get(&row.trace_id) {
                Some(existing) if existing.most_recent_commit_id >= row.most_recent_commit_id => {}
                _ => {
                    tables.values_at_head.insert(row.trace_id, row);
                }
            }
        }
        Ok(())
    }

    async fn put_primary_branch_params(&self, rows: Vec<PrimaryBranchParamRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables.primary_branch_params.insert(row);
        }
        Ok(())
    }

    async fn put_tiled_trace_digests(&self, rows: Vec<TiledTraceDigestRow>) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables
                .tiled_trace_digests
                .insert((row.trace_id, row.tile_id, row.digest), row.grouping_id);
        }
        Ok(())
    }

    async fn upsert_source_file(
        &self,
        id: &SourceFileId,
        name: &str,
        last_ingested: DateTime<Utc>,
    ) -> Result<()> {
        self.check_fail()?;
        self.lock()
            .source_files
            .insert(id.as_bytes().to_vec(), (name.to_string(), last_ingested));
        Ok(())
    }

    async fn get_changelist(&self, system: &str, id: &str) -> Result<Option<Changelist>> {
        self.check_fail()?;
        Ok(self
            .lock()
            .changelists
            .get(&(system.to_string(), id.to_string()))
            .cloned())
    }

    async fn put_changelist(&self, changelist: &Changelist) -> Result<()> {
        self.check_fail()?;
        self.lock().changelists.insert(
            (changelist.system.clone(), changelist.id.clone()),
            changelist.clone(),
        );
        Ok(())
    }

    async fn get_patchset(&self, system: &str, patchset_id: &str) -> Result<Option<Patchset>> {
        self.check_fail()?;
        Ok(self
            .lock()
            .patchsets
            .get(&(system.to_string(), patchset_id.to_string()))
            .cloned())
    }

    async fn get_patchset_by_order(
        &self,
        system: &str,
        changelist_id: &str,
        order: u32,
    ) -> Result<Option<Patchset>> {
        self.check_fail()?;
        Ok(self
            .lock()
            .patchsets
            .values()
            .find(|ps| {
                ps.system == system && ps.changelist_id == changelist_id && ps.order == order
            })
            .cloned())
    }

    async fn put_patchset(&self, patchset: &Patchset) -> Result<()> {
        self.check_fail()?;
        self.lock().patchsets.insert(
            (patchset.system.clone(), patchset.id.clone()),
            patchset.clone(),
        );
        Ok(())
    }

    async fn get_tryjob(&self, system: &str, id: &str) -> Result<Option<Tryjob>> {
        self.check_fail()?;
        Ok(self
            .lock()
            .tryjobs
            .get(&(system.to_string(), id.to_string()))
            .cloned())
    }

    async fn put_tryjob(&self, tryjob: &Tryjob) -> Result<()> {
        self.check_fail()?;
        self.lock()
            .tryjobs
            .insert((tryjob.system.clone(), tryjob.id.clone()), tryjob.clone());
        Ok(())
    }

    async fn put_secondary_branch_params(
        &self,
        rows: Vec<SecondaryBranchParamRow>,
    ) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables.secondary_branch_params.insert(row);
        }
        Ok(())
    }

    async fn put_secondary_branch_values(
        &self,
        rows: Vec<SecondaryBranchValueRow>,
    ) -> Result<()> {
        self.check_fail()?;
        let mut tables = self.lock();
        for row in rows {
            tables.secondary_branch_values.insert(
                (
                    row.changelist_id.clone(),
                    row.patchset_id.clone(),
                    row.trace_id,
                ),
                row,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(n: u64) -> CommitId {
        CommitId::from_position(n)
    }

    // -- 1. Tile boundary at the head ----------------------------------------

    #[tokio::test]
    async fn head_commit_opens_new_tile_when_full() {
        let store = MemStore::new();
        for n in [98, 99, 100, 101] {
            store.seed_commit_with_data(commit(n), TileId(0));
        }
        for n in [103, 106, 107, 108] {
            store.seed_commit_with_data(commit(n), TileId(1));
        }
        let tile = store.resolve_tile(&commit(109), 4).await.unwrap();
        assert_eq!(tile, TileId(2));
        assert_eq!(store.commit_tile(&commit(109)), Some(TileId(2)));
    }

    // -- 2. Back-fill between tiles prefers the higher neighbor ---------------

    #[tokio::test]
    async fn backfill_between_tiles_takes_higher() {
        let store = MemStore::new();
        for n in [98, 99, 100, 101] {
            store.seed_commit_with_data(commit(n), TileId(0));
        }
        for n in [103, 106, 107, 108] {
            store.seed_commit_with_data(commit(n), TileId(1));
        }
        let tile = store.resolve_tile(&commit(102), 4).await.unwrap();
        assert_eq!(tile, TileId(1));
    }

    // -- 3. Values-at-head only moves forward --------------------------------

    #[tokio::test]
    async fn value_at_head_is_monotone() {
        let store = MemStore::new();
        let trace = TraceId::from_bytes([9; 16]);
        let digest_old: Digest = "00000000000000000000000000000001".parse().unwrap();
        let digest_new: Digest = "00000000000000000000000000000002".parse().unwrap();
        let row = |c: u64, d: Digest| ValueAtHeadRow {
            trace_id: trace,
            most_recent_commit_id: commit(c),
            digest: d,
            options_id: gold_core::OptionsId::from_options(&BTreeMap::new()),
            grouping_id: GroupingId::from_grouping(&BTreeMap::new()),
            corpus: "corners".into(),
            keys: BTreeMap::new(),
        };
        store.put_values_at_head(vec![row(5, digest_new)]).await.unwrap();
        // An older observation arriving late must not win.
        store.put_values_at_head(vec![row(3, digest_old)]).await.unwrap();
        let head = store.value_at_head(&trace).unwrap();
        assert_eq!(head.most_recent_commit_id, commit(5));
        assert_eq!(head.digest, digest_new);
    }

    // -- 4. Expectations never overwrite -------------------------------------

    #[tokio::test]
    async fn expectations_keep_existing_label() {
        let store = MemStore::new();
        let gid = GroupingId::from_grouping(&BTreeMap::new());
        let digest: Digest = "000000000000000000000000000000aa".parse().unwrap();
        store.seed_expectation(gid, digest, Label::Positive);
        store
            .put_expectations(vec![ExpectationRow {
                grouping_id: gid,
                digest,
                label: Label::Untriaged,
            }])
            .await
            .unwrap();
        assert_eq!(store.expectation_label(&gid, &digest), Some(Label::Positive));
    }

    // -- 5. Injected failures are retryable ----------------------------------

    #[tokio::test]
    async fn injected_failures_are_retryable() {
        let store = MemStore::new();
        store.set_fail_writes(true);
        let err = store.put_options(vec![]).await.unwrap_err();
        assert!(err.is_retryable());
        store.set_fail_writes(false);
        store.put_options(vec![]).await.unwrap();
    }
}
