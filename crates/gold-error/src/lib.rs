// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-error
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The error taxonomy every ingestion component speaks. An
//! [`IngestionError`] carries exactly one [`ErrorKind`], which tells the
//! ingester what to do with the file that produced it: drop it, retry it,
//! or refuse to have started at all.

use std::error::Error as StdError;
use std::fmt;

/// Convenience alias used throughout the ingestion crates.
pub type Result<T> = std::result::Result<T, IngestionError>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// What the ingester should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input can never be processed: malformed JSON, failed validation,
    /// an unknown git hash, the wrong CRS/CIS for this ingester. Log and
    /// move on; never retry.
    Permanent,

    /// The failure may heal on its own: a transient storage error, a
    /// changelist or tryjob that has not reached the backend yet, a network
    /// hiccup. The ledger is left untouched so the next poll retries.
    Retryable,

    /// A misconfiguration that must surface at construction time. Never
    /// returned from a running processor.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Permanent => "permanent",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// IngestionError
// ---------------------------------------------------------------------------

/// An error with a processing disposition attached.
#[derive(Debug)]
pub struct IngestionError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl IngestionError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build a [`ErrorKind::Permanent`] error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// Build a [`ErrorKind::Retryable`] error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    /// Build a [`ErrorKind::Fatal`] error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The disposition of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether the ingester should leave the ledger untouched and let the
    /// next poll retry the file.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}

impl fmt::Display for IngestionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(src) = &self.source {
            write!(f, ": {src}")?;
        }
        Ok(())
    }
}

impl StdError for IngestionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn StdError + 'static))
    }
}
