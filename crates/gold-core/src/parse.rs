// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decoding of uploaded JSON payloads into [`ResultFile`], including the
//! legacy field spellings still produced by older uploaders.

use crate::format::{ResultFile, TestResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Code-review system assumed when a file uses the legacy field spellings.
pub const LEGACY_CRS: &str = "gerrit";

/// Continuous-integration system assumed when a file uses the legacy field
/// spellings.
pub const LEGACY_CIS: &str = "buildbucket";

/// Errors distinguishing unrecoverable input from content that simply has
/// nothing to ingest.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload was not valid JSON for the result-file shape. The file
    /// will never parse; callers should skip it permanently.
    #[error("malformed result file: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload parsed but failed one or more validation rules.
    #[error("invalid result file: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// The file contained no ingestible results. Treated as success with no
    /// writes.
    #[error("result file contains no ingestible results")]
    NoResults,
}

/// Fallback systems applied when a file carries changelist fields but does
/// not name its CRS or CIS. Taken from the first configured system.
#[derive(Debug, Clone)]
pub struct SystemDefaults {
    /// Default code-review system name.
    pub crs: String,
    /// Default continuous-integration system name.
    pub cis: String,
}

impl Default for SystemDefaults {
    fn default() -> Self {
        Self {
            crs: LEGACY_CRS.to_string(),
            cis: LEGACY_CIS.to_string(),
        }
    }
}

/// The raw wire shape: canonical spellings plus every legacy alternative.
#[derive(Debug, Default, Deserialize)]
struct RawResultFile {
    #[serde(rename = "gitHash", default)]
    git_hash: String,
    #[serde(rename = "commit_id", alias = "commitID", default)]
    commit_id: String,
    #[serde(rename = "commit_metadata", alias = "commitMetadata", default)]
    commit_metadata: String,
    #[serde(default)]
    key: BTreeMap<String, String>,
    #[serde(default)]
    results: Vec<RawTestResult>,
    #[serde(default)]
    change_list_id: String,
    #[serde(default)]
    issue: String,
    #[serde(default)]
    patch_set_order: Option<u32>,
    #[serde(default)]
    patchset: Option<u32>,
    #[serde(default)]
    patch_set_id: String,
    #[serde(rename = "crs", default)]
    code_review_system: String,
    #[serde(default)]
    try_job_id: String,
    #[serde(default)]
    buildbucket_build_id: String,
    #[serde(rename = "cis", default)]
    continuous_integration_system: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawTestResult {
    #[serde(default)]
    key: BTreeMap<String, String>,
    #[serde(default)]
    options: BTreeMap<String, String>,
    #[serde(rename = "md5", default)]
    digest: String,
}

/// Parse a result-file payload, mapping legacy field spellings to the
/// canonical form and filling in default CRS/CIS names.
///
/// Validation is a separate step; see [`crate::validate::validate`].
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] when the payload is not valid JSON for
/// the result-file shape.
pub fn parse_result_file(bytes: &[u8], defaults: &SystemDefaults) -> Result<ResultFile, ParseError> {
    let raw: RawResultFile = serde_json::from_slice(bytes)?;

    let mut legacy = false;
    let mut file = ResultFile {
        git_hash: raw.git_hash,
        commit_id: raw.commit_id,
        commit_metadata: raw.commit_metadata,
        key: raw.key,
        results: raw
            .results
            .into_iter()
            .map(|r| TestResult {
                key: r.key,
                options: r.options,
                digest: r.digest,
            })
            .collect(),
        change_list_id: raw.change_list_id,
        patch_set_order: raw.patch_set_order,
        patch_set_id: raw.patch_set_id,
        code_review_system: raw.code_review_system,
        try_job_id: raw.try_job_id,
        continuous_integration_system: raw.continuous_integration_system,
    };

    if file.change_list_id.is_empty() && !raw.issue.is_empty() {
        file.change_list_id = raw.issue;
        legacy = true;
    }
    if file.patch_set_order.is_none() && raw.patchset.is_some() {
        file.patch_set_order = raw.patchset;
        legacy = true;
    }
    if file.try_job_id.is_empty() && !raw.buildbucket_build_id.is_empty() {
        file.try_job_id = raw.buildbucket_build_id;
        legacy = true;
    }

    // Legacy uploaders only ever talked to Gerrit and Buildbucket.
    if legacy {
        if file.code_review_system.is_empty() {
            file.code_review_system = LEGACY_CRS.to_string();
        }
        if file.continuous_integration_system.is_empty() {
            file.continuous_integration_system = LEGACY_CIS.to_string();
        }
    }
    if file.has_changelist_fields() {
        if file.code_review_system.is_empty() {
            file.code_review_system = defaults.crs.clone();
        }
        if file.continuous_integration_system.is_empty() {
            file.continuous_integration_system = defaults.cis.clone();
        }
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SystemDefaults {
        SystemDefaults::default()
    }

    // -- 1. Canonical fields parse as-is -------------------------------------

    #[test]
    fn parses_canonical_fields() {
        let payload = br#"{
            "gitHash": "aabbcc",
            "key": {"os": "linux"},
            "results": [
                {"key": {"name": "square", "source_type": "corners"},
                 "options": {"ext": "png"},
                 "md5": "0123456789abcdef0123456789abcdef"}
            ]
        }"#;
        let file = parse_result_file(payload, &defaults()).unwrap();
        assert_eq!(file.git_hash, "aabbcc");
        assert_eq!(file.results.len(), 1);
        assert_eq!(file.results[0].options["ext"], "png");
    }

    // -- 2. Legacy spellings map to canonical names ---------------------------

    #[test]
    fn maps_legacy_fields_and_defaults_systems() {
        let payload = br#"{
            "gitHash": "aabbcc",
            "key": {"os": "linux"},
            "issue": "12345",
            "patchset": 3,
            "buildbucket_build_id": "bb-99",
            "results": []
        }"#;
        let file = parse_result_file(payload, &defaults()).unwrap();
        assert_eq!(file.change_list_id, "12345");
        assert_eq!(file.patch_set_order, Some(3));
        assert_eq!(file.try_job_id, "bb-99");
        assert_eq!(file.code_review_system, "gerrit");
        assert_eq!(file.continuous_integration_system, "buildbucket");
    }

    // -- 3. Canonical spellings win over legacy ------------------------------

    #[test]
    fn canonical_fields_win_over_legacy() {
        let payload = br#"{
            "change_list_id": "canonical",
            "issue": "legacy",
            "try_job_id": "tj-1",
            "crs": "gerrit-internal",
            "cis": "cirrus",
            "results": []
        }"#;
        let file = parse_result_file(payload, &defaults()).unwrap();
        assert_eq!(file.change_list_id, "canonical");
        assert_eq!(file.code_review_system, "gerrit-internal");
        assert_eq!(file.continuous_integration_system, "cirrus");
    }

    // -- 4. Configured default CRS fills the gap -----------------------------

    #[test]
    fn configured_default_crs_applies_without_legacy_fields() {
        let payload = br#"{
            "change_list_id": "67890",
            "patch_set_order": 1,
            "try_job_id": "tj-2",
            "results": []
        }"#;
        let d = SystemDefaults {
            crs: "gerrit-internal".to_string(),
            cis: "buildbucket".to_string(),
        };
        let file = parse_result_file(payload, &d).unwrap();
        assert_eq!(file.code_review_system, "gerrit-internal");
    }

    // -- 5. Garbage is malformed ---------------------------------------------

    #[test]
    fn garbage_is_malformed() {
        let err = parse_result_file(b"not json at all", &defaults()).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    // -- 6. commitID alias accepted ------------------------------------------

    #[test]
    fn accepts_commit_id_alias() {
        let payload = br#"{"commitID": "0000000100", "commitMetadata": "meta", "results": []}"#;
        let file = parse_result_file(payload, &defaults()).unwrap();
        assert_eq!(file.commit_id, "0000000100");
        assert_eq!(file.commit_metadata, "meta");
    }
}
