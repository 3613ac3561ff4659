// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field-level validation of parsed result files.
//!
//! Every rule violation is collected into one aggregated error so uploaders
//! see the full list at once. Two per-result conditions are skips rather
//! than failures: a non-`png` output extension (silent) and an over-long
//! test name (warned).

use crate::digest::Digest;
use crate::format::{ResultFile, TestResult};
use crate::ids::{GroupingId, OptionsId, TraceId};
use crate::parse::ParseError;
use crate::{CORPUS_KEY, EXT_KEY, MAX_TEST_NAME_LEN, PNG_EXT, PRIMARY_KEY};
use std::collections::BTreeMap;
use tracing::warn;

/// How a validated file attributes its results to a point in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitSpec {
    /// The run was at this version-control hash on the primary branch.
    GitHash(String),
    /// The run reported an explicit commit id with metadata.
    Metadata {
        /// The commit id as uploaded.
        id: String,
        /// Free-form metadata describing the id.
        metadata: String,
    },
}

/// The changelist/patchset/tryjob triple a pre-submit file is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryjobRef {
    /// Changelist id within `crs`.
    pub changelist_id: String,
    /// 1-based patchset order, when given.
    pub patchset_order: Option<u32>,
    /// Patchset id, preferred over the order when both are given.
    pub patchset_id: Option<String>,
    /// Code-review system name.
    pub crs: String,
    /// Tryjob id within `cis`.
    pub try_job_id: String,
    /// Continuous-integration system name.
    pub cis: String,
}

/// One result that passed validation, with its keys already merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestableResult {
    /// The file-level keys merged with the per-result keys; the per-result
    /// value wins on conflict. This is the trace identity.
    pub keys: BTreeMap<String, String>,
    /// The result's options map.
    pub options: BTreeMap<String, String>,
    /// The digest the test produced.
    pub digest: Digest,
}

impl IngestableResult {
    /// The corpus this result belongs to.
    #[must_use]
    pub fn corpus(&self) -> &str {
        self.keys.get(CORPUS_KEY).map(String::as_str).unwrap_or_default()
    }

    /// The test name.
    #[must_use]
    pub fn test_name(&self) -> &str {
        self.keys.get(PRIMARY_KEY).map(String::as_str).unwrap_or_default()
    }

    /// The canonical subset of keys that names this test case.
    #[must_use]
    pub fn grouping(&self) -> BTreeMap<String, String> {
        let mut g = BTreeMap::new();
        for k in [CORPUS_KEY, PRIMARY_KEY] {
            if let Some(v) = self.keys.get(k) {
                g.insert(k.to_string(), v.clone());
            }
        }
        g
    }

    /// Identity of the test case.
    #[must_use]
    pub fn grouping_id(&self) -> GroupingId {
        GroupingId::from_grouping(&self.grouping())
    }

    /// Identity of the measurement stream.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        TraceId::from_keys(&self.keys)
    }

    /// Identity of the options map.
    #[must_use]
    pub fn options_id(&self) -> OptionsId {
        OptionsId::from_options(&self.options)
    }

    /// Union of options and keys, with key values winning on conflict. This
    /// is what gets recorded as branch params.
    #[must_use]
    pub fn params(&self) -> BTreeMap<String, String> {
        let mut p = self.options.clone();
        for (k, v) in &self.keys {
            p.insert(k.clone(), v.clone());
        }
        p
    }
}

/// A result file that passed all validation rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    /// Where in history the results belong.
    pub commit: CommitSpec,
    /// The changelist triple, for pre-submit files.
    pub tryjob: Option<TryjobRef>,
    /// The surviving results, in file order.
    pub results: Vec<IngestableResult>,
}

fn check_map(messages: &mut Vec<String>, what: &str, map: &BTreeMap<String, String>) {
    for (k, v) in map {
        if k.trim().is_empty() {
            messages.push(format!("{what} has a whitespace-only key"));
        }
        if v.trim().is_empty() {
            messages.push(format!("{what} key {k:?} has a whitespace-only value"));
        }
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Apply all validation rules to a parsed file.
///
/// `file_name` is only used for log context on skipped results.
///
/// # Errors
///
/// Returns [`ParseError::Invalid`] with every rule violation, or
/// [`ParseError::NoResults`] when nothing survives filtering.
pub fn validate(file: &ResultFile, file_name: &str) -> Result<ValidatedFile, ParseError> {
    let mut messages = Vec::new();

    let commit = match (&file.git_hash, &file.commit_id, &file.commit_metadata) {
        (h, _, _) if !h.is_empty() => {
            if !is_hex(h) {
                messages.push(format!("gitHash {h:?} is not hexadecimal"));
            }
            CommitSpec::GitHash(h.clone())
        }
        (_, id, meta) if !id.is_empty() && !meta.is_empty() => CommitSpec::Metadata {
            id: id.clone(),
            metadata: meta.clone(),
        },
        _ => {
            messages.push(
                "either gitHash or both commit_id and commit_metadata must be set".to_string(),
            );
            CommitSpec::GitHash(String::new())
        }
    };

    if file.key.is_empty() {
        messages.push("top-level key map must not be empty".to_string());
    }
    check_map(&mut messages, "top-level key map", &file.key);

    let tryjob = validate_changelist_group(file, &mut messages);

    let mut results = Vec::with_capacity(file.results.len());
    for (i, r) in file.results.iter().enumerate() {
        if let Some(res) = validate_result(i, r, &file.key, file_name, &mut messages) {
            results.push(res);
        }
    }

    if !messages.is_empty() {
        return Err(ParseError::Invalid(messages));
    }
    if results.is_empty() {
        return Err(ParseError::NoResults);
    }
    Ok(ValidatedFile {
        commit,
        tryjob,
        results,
    })
}

fn validate_changelist_group(file: &ResultFile, messages: &mut Vec<String>) -> Option<TryjobRef> {
    if !file.has_changelist_fields() {
        return None;
    }
    if file.change_list_id.is_empty() {
        messages.push("change_list_id must be set when any changelist field is".to_string());
    }
    if file.patch_set_order.is_none() && file.patch_set_id.is_empty() {
        messages.push("one of patch_set_order or patch_set_id must be set".to_string());
    }
    if let Some(order) = file.patch_set_order {
        if order < 1 {
            messages.push(format!("patch_set_order must be >= 1, got {order}"));
        }
    }
    if file.try_job_id.is_empty() {
        messages.push("try_job_id must be set when any changelist field is".to_string());
    }
    if file.code_review_system.is_empty() {
        messages.push("crs must be set when any changelist field is".to_string());
    }
    if file.continuous_integration_system.is_empty() {
        messages.push("cis must be set when any changelist field is".to_string());
    }
    Some(TryjobRef {
        changelist_id: file.change_list_id.clone(),
        patchset_order: file.patch_set_order,
        patchset_id: (!file.patch_set_id.is_empty()).then(|| file.patch_set_id.clone()),
        crs: file.code_review_system.clone(),
        try_job_id: file.try_job_id.clone(),
        cis: file.continuous_integration_system.clone(),
    })
}

fn validate_result(
    index: usize,
    result: &TestResult,
    file_key: &BTreeMap<String, String>,
    file_name: &str,
    messages: &mut Vec<String>,
) -> Option<IngestableResult> {
    // Non-png outputs never enter the pipeline.
    if let Some(ext) = result.options.get(EXT_KEY) {
        if ext != PNG_EXT {
            return None;
        }
    }

    if result.key.is_empty() {
        messages.push(format!("result {index}: key map must not be empty"));
    }
    check_map(messages, &format!("result {index} key map"), &result.key);
    check_map(messages, &format!("result {index} options map"), &result.options);

    let digest = match result.digest.parse::<Digest>() {
        Ok(d) => Some(d),
        Err(e) => {
            messages.push(format!("result {index}: {e}"));
            None
        }
    };

    let mut keys = file_key.clone();
    for (k, v) in &result.key {
        keys.insert(k.clone(), v.clone());
    }
    if !keys.contains_key(CORPUS_KEY) {
        messages.push(format!("result {index}: missing {CORPUS_KEY:?} key"));
    }
    match keys.get(PRIMARY_KEY) {
        None => {
            messages.push(format!("result {index}: missing {PRIMARY_KEY:?} key"));
        }
        Some(name) if name.len() > MAX_TEST_NAME_LEN => {
            warn!(
                file = file_name,
                test = %name,
                len = name.len(),
                "skipping result with over-long test name"
            );
            return None;
        }
        Some(_) => {}
    }

    Some(IngestableResult {
        keys,
        options: result.options.clone(),
        digest: digest?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{SystemDefaults, parse_result_file};

    const DIGEST: &str = "0123456789abcdef0123456789abcdef";

    fn parse(payload: &str) -> ResultFile {
        parse_result_file(payload.as_bytes(), &SystemDefaults::default()).unwrap()
    }

    fn minimal() -> String {
        format!(
            r#"{{
                "gitHash": "aabbcc",
                "key": {{"os": "linux", "source_type": "corners"}},
                "results": [
                    {{"key": {{"name": "square"}}, "md5": "{DIGEST}"}}
                ]
            }}"#
        )
    }

    // -- 1. Minimal valid file passes ----------------------------------------

    #[test]
    fn minimal_file_validates() {
        let v = validate(&parse(&minimal()), "f.json").unwrap();
        assert!(matches!(v.commit, CommitSpec::GitHash(ref h) if h == "aabbcc"));
        assert_eq!(v.results.len(), 1);
        assert_eq!(v.results[0].corpus(), "corners");
        assert_eq!(v.results[0].test_name(), "square");
    }

    // -- 2. Merged keys prefer the per-result value --------------------------

    #[test]
    fn per_result_value_overrides_top_level() {
        let file = parse(&format!(
            r#"{{
                "gitHash": "aa",
                "key": {{"source_type": "corners", "name": "outer"}},
                "results": [
                    {{"key": {{"name": "inner"}}, "md5": "{DIGEST}"}}
                ]
            }}"#
        ));
        let v = validate(&file, "f.json").unwrap();
        assert_eq!(v.results[0].test_name(), "inner");
    }

    // -- 3. Non-hex gitHash fails --------------------------------------------

    #[test]
    fn non_hex_git_hash_fails() {
        let mut file = parse(&minimal());
        file.git_hash = "not-hex!".into();
        let err = validate(&file, "f.json").unwrap_err();
        assert!(matches!(err, ParseError::Invalid(_)));
    }

    // -- 4. Missing commit identity fails ------------------------------------

    #[test]
    fn missing_commit_identity_fails() {
        let mut file = parse(&minimal());
        file.git_hash.clear();
        let err = validate(&file, "f.json").unwrap_err();
        let ParseError::Invalid(msgs) = err else {
            panic!("expected Invalid")
        };
        assert!(msgs.iter().any(|m| m.contains("commit_metadata")));
    }

    // -- 5. Commit metadata pair is accepted ---------------------------------

    #[test]
    fn commit_metadata_pair_is_accepted() {
        let mut file = parse(&minimal());
        file.git_hash.clear();
        file.commit_id = "0000000050".into();
        file.commit_metadata = "https://example.com/manifest".into();
        let v = validate(&file, "f.json").unwrap();
        assert!(matches!(v.commit, CommitSpec::Metadata { .. }));
    }

    // -- 6. Whitespace-only values are rejected ------------------------------

    #[test]
    fn whitespace_values_rejected() {
        let mut file = parse(&minimal());
        file.key.insert("model".into(), "   ".into());
        let err = validate(&file, "f.json").unwrap_err();
        let ParseError::Invalid(msgs) = err else {
            panic!("expected Invalid")
        };
        assert!(msgs.iter().any(|m| m.contains("whitespace-only value")));
    }

    // -- 7. Empty top-level key map rejected ---------------------------------

    #[test]
    fn empty_top_level_key_rejected() {
        let mut file = parse(&minimal());
        file.key.clear();
        // The corpus moves to the result so only the empty-map rule fires.
        file.results[0]
            .key
            .insert("source_type".into(), "corners".into());
        let err = validate(&file, "f.json").unwrap_err();
        let ParseError::Invalid(msgs) = err else {
            panic!("expected Invalid")
        };
        assert_eq!(msgs, vec!["top-level key map must not be empty".to_string()]);
    }

    // -- 8. Non-png results are silently skipped -----------------------------

    #[test]
    fn non_png_results_skipped() {
        let file = parse(&format!(
            r#"{{
                "gitHash": "aa",
                "key": {{"source_type": "corners"}},
                "results": [
                    {{"key": {{"name": "a"}}, "options": {{"ext": "pdf"}}, "md5": "{DIGEST}"}},
                    {{"key": {{"name": "b"}}, "options": {{"ext": "png"}}, "md5": "{DIGEST}"}}
                ]
            }}"#
        ));
        let v = validate(&file, "f.json").unwrap();
        assert_eq!(v.results.len(), 1);
        assert_eq!(v.results[0].test_name(), "b");
    }

    // -- 9. All results skipped means NoResults ------------------------------

    #[test]
    fn all_skipped_is_no_results() {
        let file = parse(&format!(
            r#"{{
                "gitHash": "aa",
                "key": {{"source_type": "corners"}},
                "results": [
                    {{"key": {{"name": "a"}}, "options": {{"ext": "pdf"}}, "md5": "{DIGEST}"}}
                ]
            }}"#
        ));
        assert!(matches!(
            validate(&file, "f.json").unwrap_err(),
            ParseError::NoResults
        ));
    }

    // -- 10. Over-long test names skip the result, not the file ---------------

    #[test]
    fn long_test_name_skips_result_only() {
        let long = "x".repeat(MAX_TEST_NAME_LEN + 1);
        let file = parse(&format!(
            r#"{{
                "gitHash": "aa",
                "key": {{"source_type": "corners"}},
                "results": [
                    {{"key": {{"name": "{long}"}}, "md5": "{DIGEST}"}},
                    {{"key": {{"name": "ok"}}, "md5": "{DIGEST}"}}
                ]
            }}"#
        ));
        let v = validate(&file, "f.json").unwrap();
        assert_eq!(v.results.len(), 1);
        assert_eq!(v.results[0].test_name(), "ok");
    }

    // -- 11. Changelist group must be complete -------------------------------

    #[test]
    fn partial_changelist_group_fails() {
        let mut file = parse(&minimal());
        file.change_list_id = "123".into();
        let err = validate(&file, "f.json").unwrap_err();
        let ParseError::Invalid(msgs) = err else {
            panic!("expected Invalid")
        };
        assert!(msgs.iter().any(|m| m.contains("patch_set_order")));
        assert!(msgs.iter().any(|m| m.contains("try_job_id")));
    }

    // -- 12. Zero patchset order fails ---------------------------------------

    #[test]
    fn zero_patchset_order_fails() {
        let mut file = parse(&minimal());
        file.change_list_id = "123".into();
        file.patch_set_order = Some(0);
        file.try_job_id = "tj".into();
        file.code_review_system = "gerrit".into();
        file.continuous_integration_system = "buildbucket".into();
        let err = validate(&file, "f.json").unwrap_err();
        let ParseError::Invalid(msgs) = err else {
            panic!("expected Invalid")
        };
        assert!(msgs.iter().any(|m| m.contains(">= 1")));
    }

    // -- 13. Bad digest aggregates with other failures ------------------------

    #[test]
    fn bad_digest_is_aggregated() {
        let file = parse(
            r#"{
                "gitHash": "aa",
                "key": {"source_type": "corners"},
                "results": [
                    {"key": {"name": "a"}, "md5": "tooshort"},
                    {"key": {}, "md5": "alsobad"}
                ]
            }"#,
        );
        let err = validate(&file, "f.json").unwrap_err();
        let ParseError::Invalid(msgs) = err else {
            panic!("expected Invalid")
        };
        assert!(msgs.len() >= 3, "got {msgs:?}");
    }

    // -- 14. Params merge options under keys ----------------------------------

    #[test]
    fn params_prefer_key_values() {
        let file = parse(&format!(
            r#"{{
                "gitHash": "aa",
                "key": {{"source_type": "corners"}},
                "results": [
                    {{"key": {{"name": "a"}},
                      "options": {{"ext": "png", "name": "shadowed"}},
                      "md5": "{DIGEST}"}}
                ]
            }}"#
        ));
        let v = validate(&file, "f.json").unwrap();
        let params = v.results[0].params();
        assert_eq!(params["name"], "a");
        assert_eq!(params["ext"], "png");
    }

    // -- 15. Round trip: serialize then reparse equals original ----------------

    #[test]
    fn round_trip_preserves_validated_files() {
        let file = parse(&minimal());
        validate(&file, "f.json").unwrap();
        let json = serde_json::to_vec(&file).unwrap();
        let back = parse_result_file(&json, &SystemDefaults::default()).unwrap();
        assert_eq!(back, file);
    }
}
