// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tile assignment decision, shared by every store implementation.

use gold_core::{CommitId, TileId};

/// Decide which tile a target commit belongs to.
///
/// `before` is the nearest commit-with-data at or below the target (with its
/// tile), `after` is the tile of the nearest commit-with-data at or above
/// the target, and `commits_in_before_tile` counts the commits currently in
/// `before`'s tile.
///
/// When the target straddles two tiles the higher one wins; when the target
/// is past the head, a full tile rolls over to the next.
#[must_use]
pub fn decide_tile(
    before: Option<(&CommitId, TileId)>,
    after: Option<TileId>,
    commits_in_before_tile: u64,
    tile_width: i64,
) -> TileId {
    if let Some(tile) = after {
        // Covers both "target already has data" (before == after == target)
        // and the straddle case.
        return tile;
    }
    match before {
        None => TileId::ZERO,
        Some((_, tile)) => {
            if commits_in_before_tile >= tile_width.unsigned_abs() {
                tile.next()
            } else {
                tile
            }
        }
    }
}
