// SPDX-License-Identifier: MIT OR Apache-2.0
//! The changelist/patchset/tryjob model shared by the secondary-branch
//! store and the code-review/CI clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a changelist on its code-review system.
///
/// `Abandoned` is not terminal: a changelist is re-opened when new results
/// for it are observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelistStatus {
    /// Under review.
    Open,
    /// Merged into the primary branch.
    Landed,
    /// Closed without landing.
    Abandoned,
}

impl ChangelistStatus {
    /// The lowercase wire/DB rendering.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Landed => "landed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for ChangelistStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "landed" => Ok(Self::Landed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown changelist status {other:?}")),
        }
    }
}

/// A pending code change on a code-review system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelist {
    /// Code-review system the change lives in.
    pub system: String,
    /// Id within that system.
    pub id: String,
    /// Current lifecycle state.
    pub status: ChangelistStatus,
    /// Owner of the change.
    pub owner: String,
    /// One-line subject.
    pub subject: String,
    /// When data for this changelist was last ingested. The unix epoch is
    /// the sentinel for "staged but not yet persisted".
    pub last_updated: DateTime<Utc>,
}

/// A specific version of a changelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patchset {
    /// Code-review system the patchset lives in.
    pub system: String,
    /// Id within that system.
    pub id: String,
    /// The changelist this patchset belongs to.
    pub changelist_id: String,
    /// 1-based order within the changelist.
    pub order: u32,
    /// The git hash the patchset resolves to.
    pub git_hash: String,
}

/// A continuous-integration build triggered by a changelist/patchset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tryjob {
    /// Continuous-integration system the job ran on.
    pub system: String,
    /// Id within that system.
    pub id: String,
    /// The changelist the job tested.
    pub changelist_id: String,
    /// The patchset the job tested.
    pub patchset_id: String,
    /// Human-readable name shown in UIs.
    pub display_name: String,
    /// When data from this tryjob was last ingested.
    pub last_ingested: DateTime<Utc>,
}
