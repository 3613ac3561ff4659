// SPDX-License-Identifier: MIT OR Apache-2.0
//! Row shapes for every table the pipeline writes.
//!
//! Content-addressed tables (Groupings, Options, Traces, SourceFiles) are
//! immutable once written; their writes are insert-do-nothing. The guarded
//! tables (ValuesAtHead, TiledTraceDigests, Expectations) carry their
//! conflict rule in the store implementations.

use gold_core::{CommitId, Digest, GroupingId, OptionsId, SourceFileId, TileId, TraceId};
use std::collections::BTreeMap;

/// Number of shards TraceValues writes are spread over.
pub const NUM_SHARDS: u8 = 8;

/// Triage state of a (grouping, digest) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Label {
    /// Never triaged by a human. The only label ingestion writes.
    #[default]
    Untriaged,
    /// Triaged as a correct rendering.
    Positive,
    /// Triaged as an incorrect rendering.
    Negative,
}

impl Label {
    /// The DB rendering.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Untriaged => "untriaged",
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

/// A row in the Options table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsRow {
    /// Content-addressed id of `keys`.
    pub options_id: OptionsId,
    /// The options map.
    pub keys: BTreeMap<String, String>,
}

/// A row in the Groupings table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingRow {
    /// Content-addressed id of `keys`.
    pub grouping_id: GroupingId,
    /// The grouping map (corpus plus primary key).
    pub keys: BTreeMap<String, String>,
}

/// A row in the Traces table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRow {
    /// Content-addressed id of `keys`.
    pub trace_id: TraceId,
    /// Denormalized corpus for indexing.
    pub corpus: String,
    /// The grouping this trace belongs to.
    pub grouping_id: GroupingId,
    /// The full key map.
    pub keys: BTreeMap<String, String>,
    // matches_any_ignore_rule is left null; a separate rule engine owns it.
}

/// A row in the Expectations table. Ingestion only ever inserts the default
/// label and never overwrites an existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationRow {
    /// The test case.
    pub grouping_id: GroupingId,
    /// The digest observed.
    pub digest: Digest,
    /// The triage label.
    pub label: Label,
}

/// A row in the sharded TraceValues table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceValueRow {
    /// Shard the row lands in; always [`TraceValueRow::shard_for`] of the
    /// trace id.
    pub shard: u8,
    /// The measurement stream.
    pub trace_id: TraceId,
    /// The commit the value was observed at.
    pub commit_id: CommitId,
    /// The digest observed.
    pub digest: Digest,
    /// Supporting identifiers for query-side joins.
    pub grouping_id: GroupingId,
    /// Options in effect for this value.
    pub options_id: OptionsId,
    /// File the value came from.
    pub source_file_id: SourceFileId,
}

impl TraceValueRow {
    /// Shard assignment: first byte of the trace id, modulo [`NUM_SHARDS`].
    #[must_use]
    pub fn shard_for(trace_id: &TraceId) -> u8 {
        trace_id.as_bytes()[0] % NUM_SHARDS
    }
}

/// A row in the ValuesAtHead table. `most_recent_commit_id` never moves
/// backwards for a given trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueAtHeadRow {
    /// The measurement stream.
    pub trace_id: TraceId,
    /// The newest commit the trace was observed at.
    pub most_recent_commit_id: CommitId,
    /// The digest observed there.
    pub digest: Digest,
    /// Options in effect.
    pub options_id: OptionsId,
    /// The grouping the trace belongs to.
    pub grouping_id: GroupingId,
    /// Denormalized corpus.
    pub corpus: String,
    /// The full key map, denormalized for head queries.
    pub keys: BTreeMap<String, String>,
}

/// A row in the PrimaryBranchParams table. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrimaryBranchParamRow {
    /// Tile the observation belongs to.
    pub tile_id: TileId,
    /// Observed key.
    pub key: String,
    /// Observed value.
    pub value: String,
}

/// A row in the TiledTraceDigests table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledTraceDigestRow {
    /// The measurement stream.
    pub trace_id: TraceId,
    /// Tile the digest was observed in.
    pub tile_id: TileId,
    /// The digest observed.
    pub digest: Digest,
    /// The grouping the trace belonged to at observation time.
    pub grouping_id: GroupingId,
}

/// A row in the SecondaryBranchParams table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecondaryBranchParamRow {
    /// Changelist the observation is attributed to.
    pub changelist_id: String,
    /// Patchset the observation is attributed to.
    pub patchset_id: String,
    /// Observed key.
    pub key: String,
    /// Observed value.
    pub value: String,
}

/// A row in the SecondaryBranchValues table: the tryjob analog of
/// [`TraceValueRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryBranchValueRow {
    /// Changelist the value is attributed to.
    pub changelist_id: String,
    /// Patchset the value is attributed to.
    pub patchset_id: String,
    /// The measurement stream.
    pub trace_id: TraceId,
    /// The digest observed.
    pub digest: Digest,
    /// The grouping the trace belongs to.
    pub grouping_id: GroupingId,
    /// Options in effect.
    pub options_id: OptionsId,
    /// File the value came from.
    pub source_file_id: SourceFileId,
    /// Tryjob that produced the value.
    pub tryjob_id: String,
}
