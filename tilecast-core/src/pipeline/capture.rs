//! Frame acquisition seam and the per-cycle diff → encode stages.
//!
//! [`FrameSource`] is the only platform-facing piece; everything after it
//! is pure and runs the same on every OS. [`CapturePipeline`] owns the
//! checksum table for one session and turns each captured frame into a
//! [`ChangeSet`] ready for the video channel.

use bytes::Bytes;

use crate::error::TilecastError;
use crate::pipeline::diff::{ChecksumCommit, ChecksumTable, DirtyTile, TileDiffer};
use crate::pipeline::encoder::{TileCodec, encode_with_fallback};
use crate::pipeline::types::Frame;
use crate::protocol::video::{ChangeSet, EncodedTile};

// ── FrameSource ──────────────────────────────────────────────────

/// Produces the current full screen image on demand.
pub trait FrameSource: Send {
    /// Grab one frame. An error ends the capture loop.
    fn capture_full_frame(&mut self) -> Result<Frame, TilecastError>;
}

// ── CapturePipelineConfig ────────────────────────────────────────

/// Tunables for [`CapturePipeline`].
#[derive(Debug, Clone, Copy)]
pub struct CapturePipelineConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    /// Preferred encode quality.
    pub tile_quality: u8,
    /// Quality for the single retry after a failed encode.
    pub fallback_quality: u8,
    pub commit: ChecksumCommit,
}

impl Default for CapturePipelineConfig {
    fn default() -> Self {
        Self {
            tile_width: 256,
            tile_height: 256,
            tile_quality: 90,
            fallback_quality: 80,
            commit: ChecksumCommit::OnEncode,
        }
    }
}

// ── CycleStats ───────────────────────────────────────────────────

/// What happened during one pass through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Tiles whose checksum changed.
    pub dirty: usize,
    /// Tiles that made it into the change set.
    pub encoded: usize,
    /// Tiles dropped because both encode attempts failed.
    pub failed: usize,
    /// Total payload bytes across encoded tiles.
    pub payload_bytes: usize,
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Diff and encode stages for one capture session.
pub struct CapturePipeline {
    differ: TileDiffer,
    table: ChecksumTable,
    codec: Box<dyn TileCodec>,
    config: CapturePipelineConfig,
}

impl CapturePipeline {
    pub fn new(codec: Box<dyn TileCodec>, config: CapturePipelineConfig) -> Self {
        Self {
            differ: TileDiffer::new(config.tile_width, config.tile_height),
            table: ChecksumTable::new(),
            codec,
            config,
        }
    }

    pub fn config(&self) -> &CapturePipelineConfig {
        &self.config
    }

    /// Checksums recorded so far.
    pub fn table(&self) -> &ChecksumTable {
        &self.table
    }

    /// Diff `frame` against the table, encode every changed tile and
    /// return them in scan order.
    ///
    /// Tiles that fail to encode are left out of the change set. Under
    /// [`ChecksumCommit::OnEncode`] their checksum stays stale so the
    /// next cycle picks them up again.
    pub fn process(&mut self, frame: &Frame) -> (ChangeSet, CycleStats) {
        let dirty = match self.config.commit {
            ChecksumCommit::OnDetect => self.differ.diff_and_commit(frame, &mut self.table),
            ChecksumCommit::OnEncode => self.differ.diff(frame, &self.table),
        };

        let mut stats = CycleStats {
            dirty: dirty.len(),
            ..Default::default()
        };
        let mut change_set = ChangeSet::new(
            frame.width,
            frame.height,
            self.differ.tile_width(),
            self.differ.tile_height(),
        );

        for tile in dirty {
            match self.encode_tile(frame, &tile) {
                Ok(payload) => {
                    if self.config.commit == ChecksumCommit::OnEncode {
                        self.table.commit(tile.rect.origin(), tile.checksum);
                    }
                    stats.encoded += 1;
                    stats.payload_bytes += payload.len();
                    change_set.tiles.push(EncodedTile {
                        x: tile.rect.x,
                        y: tile.rect.y,
                        width: tile.rect.width,
                        height: tile.rect.height,
                        payload: Bytes::from(payload),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "dropping tile at ({}, {}) from this cycle: {e}",
                        tile.rect.x,
                        tile.rect.y
                    );
                    stats.failed += 1;
                }
            }
        }

        (change_set, stats)
    }

    fn encode_tile(&self, frame: &Frame, tile: &DirtyTile) -> Result<Vec<u8>, TilecastError> {
        let region = frame.crop(tile.rect);
        encode_with_fallback(
            self.codec.as_ref(),
            &region,
            self.config.tile_quality,
            self.config.fallback_quality,
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
