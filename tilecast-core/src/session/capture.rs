//! The server's capture loop.
//!
//! Each cycle grabs a frame, runs it through the [`CapturePipeline`],
//! writes the resulting change set to the video channel, and on every
//! Nth cycle refreshes the MJPEG snapshot. Cycles are paced to the
//! configured frame rate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::error::TilecastError;
use crate::pipeline::capture::{CapturePipeline, FrameSource};
use crate::pipeline::encoder::{JpegCodec, TileCodec};
use crate::pipeline::types::Frame;
use crate::protocol::video::VideoWriter;
use crate::session::frame_cell::SharedFrameCell;

// ── CaptureLoopConfig ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct CaptureLoopConfig {
    /// Target cycles per second.
    pub fps: u32,
    /// Refresh the snapshot cell every this many cycles.
    pub snapshot_every: u32,
    /// JPEG quality for full-frame snapshots.
    pub snapshot_quality: u8,
}

impl Default for CaptureLoopConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            snapshot_every: 5,
            snapshot_quality: 85,
        }
    }
}

impl CaptureLoopConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.clamp(1, 60) as f64)
    }
}

/// Totals over the life of one capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub cycles: u64,
    pub change_sets: u64,
    pub tiles_sent: u64,
    pub tiles_failed: u64,
    pub snapshots: u64,
}

// ── CaptureLoop ──────────────────────────────────────────────────

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    pipeline: CapturePipeline,
    snapshots: Option<SharedFrameCell>,
    config: CaptureLoopConfig,
}

impl CaptureLoop {
    /// `snapshots` is `None` when no MJPEG bridge is running.
    pub fn new(
        source: Box<dyn FrameSource>,
        pipeline: CapturePipeline,
        snapshots: Option<SharedFrameCell>,
        config: CaptureLoopConfig,
    ) -> Self {
        Self {
            source,
            pipeline,
            snapshots,
            config,
        }
    }

    /// Run until `running` clears, the frame source fails, or a video
    /// write fails. The latter two are returned as errors.
    pub async fn run<W>(
        &mut self,
        video: &mut VideoWriter<W>,
        running: &Arc<AtomicBool>,
    ) -> Result<CaptureSummary, TilecastError>
    where
        W: AsyncWrite + Unpin,
    {
        let interval = self.config.frame_interval();
        let snapshot_every = self.config.snapshot_every.max(1) as u64;
        let mut summary = CaptureSummary::default();

        while running.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();

            // 1. Capture.
            let frame = self.source.capture_full_frame()?;
            summary.cycles += 1;

            // 2. Diff + encode.
            let (change_set, stats) = self.pipeline.process(&frame);
            summary.tiles_failed += stats.failed as u64;

            // 3. Send.
            if !change_set.is_empty() && running.load(Ordering::SeqCst) {
                let sent = video.send(&change_set).await?;
                summary.change_sets += 1;
                summary.tiles_sent += change_set.tiles.len() as u64;
                debug!(
                    "cycle {}: {} of {} dirty tiles sent ({sent} bytes)",
                    summary.cycles, stats.encoded, stats.dirty
                );
            }

            // 4. Snapshot for the bridge.
            if summary.cycles % snapshot_every == 0 && self.refresh_snapshot(&frame) {
                summary.snapshots += 1;
            }

            // 5. Pace.
            let elapsed = cycle_start.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }

        Ok(summary)
    }

    fn refresh_snapshot(&self, frame: &Frame) -> bool {
        let Some(cell) = &self.snapshots else {
            return false;
        };
        match JpegCodec.encode(frame, self.config.snapshot_quality) {
            Ok(jpeg) => {
                cell.store(jpeg);
                true
            }
            Err(e) => {
                warn!("snapshot encode failed: {e}");
                false
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
