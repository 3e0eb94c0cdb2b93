//! Tile-level change detection between capture cycles.
//!
//! Divides the frame into a fixed grid of `tile_width × tile_height`
//! cells (clipped at the right and bottom edges) and compares each
//! cell's additive checksum against the value recorded for that origin
//! in a [`ChecksumTable`]. Cells whose checksum moved are reported in
//! row-major scan order, which is also the order they go on the wire.
//!
//! The checksum is the wrapping sum of the cell's 32-bit pixel words. It
//! is cheap and order-insensitive: two different tiles can collide, and
//! a real change that preserves the sum goes unnoticed until some later
//! change breaks the tie.

use std::cmp;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::types::{Frame, TileRect};

/// Default edge length of a tile, in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// ── ChecksumCommit ───────────────────────────────────────────────

/// When a changed tile's new checksum is written into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumCommit {
    /// Record the new checksum only once the tile's payload encoded.
    /// A tile whose encoding failed is detected again next cycle.
    #[default]
    OnEncode,
    /// Record the new checksum as soon as the difference is seen,
    /// whether or not the tile makes it into the change set.
    OnDetect,
}

// ── ChecksumTable ────────────────────────────────────────────────

/// Last recorded checksum per tile origin.
///
/// Owned by one capture loop for the lifetime of the session. Entries
/// are added as the grid is first scanned and never removed. An origin
/// with no entry reads as checksum `0`, which matches a viewer canvas
/// that starts out black.
#[derive(Debug, Default, Clone)]
pub struct ChecksumTable {
    entries: HashMap<(u32, u32), u32>,
}

impl ChecksumTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored checksum for the tile at `origin`, `0` if never recorded.
    pub fn get(&self, origin: (u32, u32)) -> u32 {
        self.entries.get(&origin).copied().unwrap_or(0)
    }

    /// Record `checksum` as the last known state of the tile at `origin`.
    pub fn commit(&mut self, origin: (u32, u32), checksum: u32) {
        self.entries.insert(origin, checksum);
    }

    /// Number of origins with a recorded checksum.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── DirtyTile ────────────────────────────────────────────────────

/// A cell whose checksum differs from the table, pending encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyTile {
    pub rect: TileRect,
    /// Freshly computed checksum for the cell.
    pub checksum: u32,
}

/// Wrapping sum of the little-endian 32-bit pixel words inside `rect`.
pub fn tile_checksum(frame: &Frame, rect: TileRect) -> u32 {
    let mut sum = 0u32;
    for row in 0..rect.height {
        for px in frame.row_span(rect.x, rect.y + row, rect.width).chunks_exact(4) {
            sum = sum.wrapping_add(u32::from_le_bytes([px[0], px[1], px[2], px[3]]));
        }
    }
    sum
}

// ── TileDiffer ───────────────────────────────────────────────────

/// Partitions frames into a fixed grid and reports changed cells.
///
/// The differ itself is stateless; all history lives in the
/// [`ChecksumTable`] handed to it, so the same differ can serve any
/// number of independent capture sessions.
#[derive(Debug, Clone, Copy)]
pub struct TileDiffer {
    tile_width: u32,
    tile_height: u32,
}

impl TileDiffer {
    /// Create a differ for the given tile size (in pixels).
    pub fn new(tile_width: u32, tile_height: u32) -> Self {
        assert!(tile_width > 0 && tile_height > 0, "tile size must be > 0");
        Self {
            tile_width,
            tile_height,
        }
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// The grid for a `width × height` frame, in row-major scan order.
    ///
    /// Cells exactly partition the frame: no gaps, no overlaps.
    pub fn grid(&self, width: u32, height: u32) -> Vec<TileRect> {
        let cols = width.div_ceil(self.tile_width);
        let rows = height.div_ceil(self.tile_height);
        let mut cells = Vec::with_capacity(cols as usize * rows as usize);

        for ty in (0..height).step_by(self.tile_height as usize) {
            for tx in (0..width).step_by(self.tile_width as usize) {
                let w = cmp::min(self.tile_width, width - tx);
                let h = cmp::min(self.tile_height, height - ty);
                cells.push(TileRect::new(tx, ty, w, h));
            }
        }
        cells
    }

    /// Report every cell whose checksum differs from `table`, leaving the
    /// table untouched. The caller commits the checksums it accepts.
    pub fn diff(&self, frame: &Frame, table: &ChecksumTable) -> Vec<DirtyTile> {
        self.grid(frame.width, frame.height)
            .into_iter()
            .filter_map(|rect| {
                let checksum = tile_checksum(frame, rect);
                (checksum != table.get(rect.origin())).then_some(DirtyTile { rect, checksum })
            })
            .collect()
    }

    /// Like [`diff`](Self::diff), but records each new checksum in
    /// `table` at the moment the difference is detected.
    pub fn diff_and_commit(&self, frame: &Frame, table: &mut ChecksumTable) -> Vec<DirtyTile> {
        let dirty = self.diff(frame, table);
        for tile in &dirty {
            table.commit(tile.rect.origin(), tile.checksum);
        }
        dirty
    }
}

impl Default for TileDiffer {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE, DEFAULT_TILE_SIZE)
    }
}

// ── Tests ────────────────────────────────────────────────────────
