// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-primary
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The primary-branch processor: parse, resolve the commit, assign the
//! tile, and write every supporting row. All table writes go out
//! concurrently and are conflict-tolerant; the source-file upsert happens
//! last so a crash mid-file causes reprocessing rather than a gap.

use async_trait::async_trait;
use gold_core::parse::{ParseError, SystemDefaults, parse_result_file};
use gold_core::validate::{CommitSpec, validate};
use gold_core::{CommitId, Digest, GroupingId, OptionsId, SourceFileId, TileId, TraceId};
use gold_error::{IngestionError, Result};
use gold_ingester::clock::Clock;
use gold_ingester::processor::{ProcessOutcome, Processor};
use gold_source::IngestionSource;
use gold_store::{
    Caches, ExpectationRow, GroupingRow, IngestionStore, Label, OptionsRow,
    PrimaryBranchParamRow, TiledTraceDigestRow, TraceRow, TraceValueRow, ValueAtHeadRow,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::debug;

/// Ingests result files attributed to primary-branch commits.
pub struct PrimaryBranchProcessor {
    store: Arc<dyn IngestionStore>,
    source: Arc<dyn IngestionSource>,
    caches: Arc<Caches>,
    clock: Arc<dyn Clock>,
    defaults: SystemDefaults,
    tile_width: i64,
}

impl PrimaryBranchProcessor {
    /// Build a processor.
    ///
    /// # Errors
    ///
    /// Returns a fatal error for a non-positive tile width.
    pub fn new(
        store: Arc<dyn IngestionStore>,
        source: Arc<dyn IngestionSource>,
        caches: Arc<Caches>,
        clock: Arc<dyn Clock>,
        tile_width: i64,
        defaults: SystemDefaults,
    ) -> Result<Self> {
        if tile_width < 1 {
            return Err(IngestionError::fatal(format!(
                "tile_width must be >= 1, got {tile_width}"
            )));
        }
        Ok(Self {
            store,
            source,
            caches,
            clock,
            defaults,
            tile_width,
        })
    }

    async fn read_file(&self, file_name: &str) -> Result<Vec<u8>> {
        let mut reader = self.source.get_reader(file_name).await?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| IngestionError::retryable("reading result file").with_source(e))?;
        Ok(bytes)
    }

    /// Resolve the commit spec to its globally-ordered id and tile, through
    /// the commits cache.
    async fn resolve_commit(&self, spec: &CommitSpec) -> Result<(CommitId, TileId)> {
        let cache_key = match spec {
            CommitSpec::GitHash(hash) => hash.clone(),
            CommitSpec::Metadata { id, .. } => id.clone(),
        };
        if let Some(resolved) = self.caches.get_commit(&cache_key) {
            return Ok(resolved);
        }

        let commit_id = match spec {
            CommitSpec::GitHash(hash) => self
                .store
                .get_commit_by_git_hash(hash)
                .await?
                .ok_or_else(|| {
                    IngestionError::permanent(format!("git hash {hash} is not a known commit"))
                })?,
            CommitSpec::Metadata { id, metadata } => {
                let commit_id = CommitId::new(id.clone());
                self.store
                    .upsert_metadata_commit(&commit_id, metadata)
                    .await?;
                commit_id
            }
        };
        let tile = self.store.resolve_tile(&commit_id, self.tile_width).await?;
        self.caches
            .put_commit(cache_key, (commit_id.clone(), tile));
        Ok((commit_id, tile))
    }
}

/// The rows one file expands into, minus anything the caches say is already
/// written.
#[derive(Default)]
struct RowBatch {
    options: Vec<OptionsRow>,
    groupings: Vec<GroupingRow>,
    traces: Vec<TraceRow>,
    expectations: Vec<ExpectationRow>,
    trace_values: Vec<TraceValueRow>,
    values_at_head: Vec<ValueAtHeadRow>,
    params: Vec<PrimaryBranchParamRow>,
    tiled_digests: Vec<TiledTraceDigestRow>,
}

#[async_trait]
impl Processor for PrimaryBranchProcessor {
    fn name(&self) -> &str {
        "primary-branch"
    }

    async fn process(&self, file_name: &str) -> Result<ProcessOutcome> {
        let bytes = self.read_file(file_name).await?;
        let parsed = parse_result_file(&bytes, &self.defaults)
            .map_err(|e| IngestionError::permanent("parsing result file").with_source(e))?;
        let validated = match validate(&parsed, file_name) {
            Ok(v) => v,
            Err(ParseError::NoResults) => {
                debug!(file = file_name, "file has no ingestible results");
                return Ok(ProcessOutcome::default());
            }
            Err(e) => {
                return Err(IngestionError::permanent("validating result file").with_source(e));
            }
        };

        let (commit_id, tile) = self.resolve_commit(&validated.commit).await?;
        let source_file_id = SourceFileId::from_name(file_name);

        let mut batch = RowBatch::default();
        let mut seen_options: HashSet<OptionsId> = HashSet::new();
        let mut seen_groupings: HashSet<GroupingId> = HashSet::new();
        let mut seen_traces: HashSet<TraceId> = HashSet::new();
        let mut seen_expectations: HashSet<(GroupingId, Digest)> = HashSet::new();
        let mut seen_params: HashSet<(String, String)> = HashSet::new();
        let mut seen_tiled: HashSet<(TraceId, Digest)> = HashSet::new();

        for result in &validated.results {
            let trace_id = result.trace_id();
            let grouping_id = result.grouping_id();
            let options_id = result.options_id();

            if !self.caches.has_options(&options_id) && seen_options.insert(options_id) {
                batch.options.push(OptionsRow {
                    options_id,
                    keys: result.options.clone(),
                });
            }
            if !self.caches.has_grouping(&grouping_id) && seen_groupings.insert(grouping_id) {
                batch.groupings.push(GroupingRow {
                    grouping_id,
                    keys: result.grouping(),
                });
            }
            if !self.caches.has_trace(&trace_id) && seen_traces.insert(trace_id) {
                batch.traces.push(TraceRow {
                    trace_id,
                    corpus: result.corpus().to_string(),
                    grouping_id,
                    keys: result.keys.clone(),
                });
            }
            if !self.caches.has_expectation(&grouping_id, result.digest.as_bytes())
                && seen_expectations.insert((grouping_id, result.digest))
            {
                batch.expectations.push(ExpectationRow {
                    grouping_id,
                    digest: result.digest,
                    label: Label::Untriaged,
                });
            }

            batch.trace_values.push(TraceValueRow {
                shard: TraceValueRow::shard_for(&trace_id),
                trace_id,
                commit_id: commit_id.clone(),
                digest: result.digest,
                grouping_id,
                options_id,
                source_file_id,
            });
            batch.values_at_head.push(ValueAtHeadRow {
                trace_id,
                most_recent_commit_id: commit_id.clone(),
                digest: result.digest,
                options_id,
                grouping_id,
                corpus: result.corpus().to_string(),
                keys: result.keys.clone(),
            });

            for (key, value) in result.params() {
                if !self.caches.has_param(tile, &key, &value)
                    && seen_params.insert((key.clone(), value.clone()))
                {
                    batch.params.push(PrimaryBranchParamRow {
                        tile_id: tile,
                        key,
                        value,
                    });
                }
            }
            if seen_tiled.insert((trace_id, result.digest)) {
                batch.tiled_digests.push(TiledTraceDigestRow {
                    trace_id,
                    tile_id: tile,
                    digest: result.digest,
                    grouping_id,
                });
            }
        }

        // Remember what to mark once the writes land; a cache entry for a
        // row that never reached the DB would shed data on retry.
        let mark_options: Vec<OptionsId> = batch.options.iter().map(|r| r.options_id).collect();
        let mark_groupings: Vec<GroupingId> =
            batch.groupings.iter().map(|r| r.grouping_id).collect();
        let mark_traces: Vec<TraceId> = batch.traces.iter().map(|r| r.trace_id).collect();
        let mark_expectations: Vec<(GroupingId, Digest)> = batch
            .expectations
            .iter()
            .map(|r| (r.grouping_id, r.digest))
            .collect();
        let mark_params: Vec<(String, String)> = batch
            .params
            .iter()
            .map(|r| (r.key.clone(), r.value.clone()))
            .collect();

        let mut writes: JoinSet<Result<()>> = JoinSet::new();
        let RowBatch {
            options,
            groupings,
            traces,
            expectations,
            trace_values,
            values_at_head,
            params,
            tiled_digests,
        } = batch;
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_options(options).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_groupings(groupings).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_traces(traces).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_expectations(expectations).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_trace_values(trace_values).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_values_at_head(values_at_head).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_primary_branch_params(params).await });
        }
        {
            let store = Arc::clone(&self.store);
            writes.spawn(async move { store.put_tiled_trace_digests(tiled_digests).await });
        }

        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    writes.abort_all();
                    return Err(e);
                }
                Err(join_error) => {
                    writes.abort_all();
                    return Err(IngestionError::retryable("schema write task failed")
                        .with_source(join_error));
                }
            }
        }

        for id in &mark_options {
            self.caches.mark_options(id);
        }
        for id in &mark_groupings {
            self.caches.mark_grouping(id);
        }
        for id in &mark_traces {
            self.caches.mark_trace(id);
        }
        for (grouping_id, digest) in &mark_expectations {
            self.caches.mark_expectation(grouping_id, digest.as_bytes());
        }
        for (key, value) in &mark_params {
            self.caches.mark_param(tile, key, value);
        }

        // Always last: the source-file row is what says "this file is in".
        self.store
            .upsert_source_file(&source_file_id, file_name, self.clock.now())
            .await?;

        Ok(ProcessOutcome {
            results_ingested: validated.results.len(),
        })
    }
}
