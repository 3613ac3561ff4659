// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical in-memory form of one uploaded result file.
//!
//! [`ResultFile`] serializes to the canonical JSON field spellings; the
//! legacy spellings (`issue`, `patchset`, `buildbucket_build_id`) are
//! accepted on the way in by [`crate::parse::parse_result_file`] and never
//! written back out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One uploaded result file, normalized to the canonical field spellings.
///
/// A file reports the digests produced by many test cases during one run,
/// attributed either to a primary-branch commit (`git_hash`, or `commit_id`
/// plus `commit_metadata`) or to a changelist/patchset/tryjob triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    /// Version-control hash of the commit the run was at, when the run was
    /// on the primary branch of a git repository.
    #[serde(rename = "gitHash", default, skip_serializing_if = "String::is_empty")]
    pub git_hash: String,

    /// Opaque commit id for repositories that report positions directly.
    /// Requires `commit_metadata`.
    #[serde(
        rename = "commit_id",
        alias = "commitID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub commit_id: String,

    /// Free-form metadata describing `commit_id`.
    #[serde(
        rename = "commit_metadata",
        alias = "commitMetadata",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub commit_metadata: String,

    /// Key/value pairs describing the whole run (os, model, arch, ...).
    #[serde(default)]
    pub key: BTreeMap<String, String>,

    /// The per-test results.
    #[serde(default)]
    pub results: Vec<TestResult>,

    /// Changelist the run was testing, for pre-submit runs. Part of the
    /// all-or-none changelist group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub change_list_id: String,

    /// 1-based patchset order within the changelist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_set_order: Option<u32>,

    /// Patchset id, preferred over `patch_set_order` when both are present.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub patch_set_id: String,

    /// Code-review system the changelist lives in (e.g. "gerrit").
    #[serde(rename = "crs", default, skip_serializing_if = "String::is_empty")]
    pub code_review_system: String,

    /// Tryjob that produced this file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub try_job_id: String,

    /// Continuous-integration system the tryjob ran on (e.g. "buildbucket").
    #[serde(rename = "cis", default, skip_serializing_if = "String::is_empty")]
    pub continuous_integration_system: String,
}

impl ResultFile {
    /// Whether any member of the changelist field group is set.
    #[must_use]
    pub fn has_changelist_fields(&self) -> bool {
        !self.change_list_id.is_empty()
            || self.patch_set_order.is_some()
            || !self.patch_set_id.is_empty()
            || !self.try_job_id.is_empty()
    }
}

/// One test case's output within a [`ResultFile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Key/value pairs specific to this result. Merged over the file-level
    /// `key` map, with the per-result value winning on conflict.
    #[serde(default)]
    pub key: BTreeMap<String, String>,

    /// Optional parameters that do not contribute to trace identity.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,

    /// Hex rendering of the digest the test produced.
    #[serde(rename = "md5")]
    pub digest: String,
}
