// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed identifiers derived from canonical key serialization,
//! plus the string-ordered commit and tile identifiers.
//!
//! Two maps with identical key/value sets always produce identical ids; the
//! canonical rendering sorts keys and joins pairs as `,k=v,k=v,`, so the
//! serialization is a bijection for maps whose keys and values avoid the
//! separator characters.

use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Width of the zero-padded decimal rendering of a [`CommitId`].
pub const COMMIT_ID_WIDTH: usize = 10;

/// Render a key/value map in canonical form: keys sorted ascending, each
/// pair written as `,key=value`, with a trailing `,`.
#[must_use]
pub fn canonical_serialization(map: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(map.len() * 16 + 1);
    out.push(',');
    for (k, v) in map {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push(',');
    }
    out
}

fn md5_of_map(map: &BTreeMap<String, String>) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(canonical_serialization(map).as_bytes());
    hasher.finalize().into()
}

macro_rules! content_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; 16]);

        impl $name {
            /// Wrap raw id bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw id bytes.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Render the id as lowercase hex.
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

content_id! {
    /// Identity of a single measurement stream across commits: the MD5 of
    /// the canonical serialization of all of a result's keys.
    TraceId
}

content_id! {
    /// Identity of a test case: the MD5 of the canonical serialization of
    /// the grouping map (corpus plus primary key).
    GroupingId
}

content_id! {
    /// Identity of a result's options map.
    OptionsId
}

content_id! {
    /// Identity of an ingested file: the MD5 of its name.
    SourceFileId
}

impl TraceId {
    /// Compute the trace id for a full key map.
    #[must_use]
    pub fn from_keys(keys: &BTreeMap<String, String>) -> Self {
        Self(md5_of_map(keys))
    }
}

impl GroupingId {
    /// Compute the grouping id for a grouping map.
    #[must_use]
    pub fn from_grouping(grouping: &BTreeMap<String, String>) -> Self {
        Self(md5_of_map(grouping))
    }
}

impl OptionsId {
    /// Compute the options id for an options map.
    #[must_use]
    pub fn from_options(options: &BTreeMap<String, String>) -> Self {
        Self(md5_of_map(options))
    }
}

impl SourceFileId {
    /// Compute the source-file id for a file name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        Self(hasher.finalize().into())
    }
}

/// A commit's position in the primary branch, stored as a fixed-width
/// zero-padded decimal string so ids sort lexicographically in the DB.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    /// Wrap an already-rendered commit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a commit id from a numeric position in the commit order.
    #[must_use]
    pub fn from_position(position: u64) -> Self {
        Self(format!("{position:0width$}", width = COMMIT_ID_WIDTH))
    }

    /// Borrow the string rendering.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bucket of contiguous commits used to shard time-series queries.
///
/// Tiles are assigned monotonically: a later commit never lands in an
/// earlier tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId(pub i64);

impl TileId {
    /// The tile that holds the first commits-with-data.
    pub const ZERO: TileId = TileId(0);

    /// The tile after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_serialization_sorts_keys() {
        let m = map(&[("b", "2"), ("a", "1"), ("c", "3")]);
        assert_eq!(canonical_serialization(&m), ",a=1,b=2,c=3,");
    }

    #[test]
    fn canonical_serialization_of_empty_map() {
        assert_eq!(canonical_serialization(&BTreeMap::new()), ",");
    }

    #[test]
    fn equal_maps_hash_equal() {
        let a = map(&[("name", "square"), ("source_type", "corners")]);
        let b = map(&[("source_type", "corners"), ("name", "square")]);
        assert_eq!(TraceId::from_keys(&a), TraceId::from_keys(&b));
    }

    #[test]
    fn different_maps_hash_differently() {
        let a = map(&[("name", "square")]);
        let b = map(&[("name", "circle")]);
        assert_ne!(GroupingId::from_grouping(&a), GroupingId::from_grouping(&b));
    }

    #[test]
    fn source_file_id_is_md5_of_name() {
        let id = SourceFileId::from_name("gold/2024/01/01/00/file.json");
        // Stable across calls and renders as 32 hex chars.
        assert_eq!(id, SourceFileId::from_name("gold/2024/01/01/00/file.json"));
        assert_eq!(id.to_hex().len(), 32);
    }

    #[test]
    fn commit_ids_sort_as_strings() {
        let a = CommitId::from_position(99);
        let b = CommitId::from_position(100);
        assert_eq!(a.as_str(), "0000000099");
        assert_eq!(b.as_str(), "0000000100");
        assert!(a < b);
    }

    #[test]
    fn tile_next_increments() {
        assert_eq!(TileId::ZERO.next(), TileId(1));
    }
}
