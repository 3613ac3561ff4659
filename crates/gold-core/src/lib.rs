// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable data contract for Gold ingestion: the JSON result-file format,
//! field-level validation, and the content-addressed identifiers derived
//! from canonical key serialization.

pub mod digest;
pub mod format;
pub mod ids;
pub mod parse;
pub mod review;
pub mod validate;

pub use digest::{Digest, DigestError};
pub use format::{ResultFile, TestResult};
pub use ids::{CommitId, GroupingId, OptionsId, SourceFileId, TileId, TraceId};
pub use review::{Changelist, ChangelistStatus, Patchset, Tryjob};
pub use parse::{ParseError, SystemDefaults, parse_result_file};
pub use validate::{CommitSpec, IngestableResult, TryjobRef, ValidatedFile, validate};

/// Key whose value names the corpus a result belongs to.
pub const CORPUS_KEY: &str = "source_type";

/// Key whose value names the test within its corpus.
pub const PRIMARY_KEY: &str = "name";

/// Option key carrying the output file extension. Results whose extension is
/// set and is not [`PNG_EXT`] are skipped.
pub const EXT_KEY: &str = "ext";

/// The only output extension the pipeline ingests.
pub const PNG_EXT: &str = "png";

/// Longest accepted test name, in bytes. Results with longer names are
/// skipped with a warning rather than failing the whole file.
pub const MAX_TEST_NAME_LEN: usize = 128;
