//! Periodic JPEG dumps of the viewer canvas.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use tilecast_core::error::TilecastError;
use tilecast_core::pipeline::Canvas;
use tilecast_core::session::wait_for_stop;

/// Writes the canvas to `path` whenever it changed since the last write.
pub struct SnapshotWriter {
    path: PathBuf,
    quality: u8,
    last_written: u64,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            path: path.into(),
            quality: quality.clamp(1, 100),
            last_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one snapshot if new tiles arrived. Returns whether a file
    /// was written.
    pub async fn write_if_changed(&mut self, canvas: &Mutex<Canvas>) -> Result<bool, TilecastError> {
        let Some(copy) = self.copy_if_changed(canvas) else {
            return Ok(false);
        };
        let jpeg = copy.to_jpeg(self.quality)?;

        // Replace atomically so readers never see a half-written file.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &jpeg).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("snapshot written to {} ({} bytes)", self.path.display(), jpeg.len());
        Ok(true)
    }

    /// Copy the canvas out if new tiles arrived since the last write. The
    /// lock is released before any encoding happens.
    fn copy_if_changed(&mut self, canvas: &Mutex<Canvas>) -> Option<Canvas> {
        let canvas = canvas.lock().unwrap_or_else(|p| p.into_inner());
        if canvas.tiles_applied() == self.last_written || canvas.width() == 0 {
            return None;
        }
        self.last_written = canvas.tiles_applied();
        Some(canvas.clone())
    }

    /// Write snapshots every `interval` until `running` goes false.
    pub async fn run(
        mut self,
        canvas: Arc<Mutex<Canvas>>,
        interval: Duration,
        running: Arc<AtomicBool>,
    ) {
        info!("writing snapshots to {}", self.path.display());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_stop(&running) => break,
            }
            if let Err(e) = self.write_if_changed(&canvas).await {
                warn!("snapshot to {} failed: {e}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tilecast_core::pipeline::{Frame, PixelFormat};

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tilecast-{}-{name}.jpg", std::process::id()))
    }

    #[tokio::test]
    async fn writes_only_after_new_tiles() {
        let path = temp_path("snapshot");
        let canvas = Mutex::new(Canvas::new());
        let mut writer = SnapshotWriter::new(&path, 80);

        // Nothing received yet.
        assert!(!writer.write_if_changed(&canvas).await.unwrap());
        assert!(!path.exists());

        {
            let mut c = canvas.lock().unwrap();
            c.ensure_size(32, 16);
            c.blit(0, 0, &Frame::filled(16, 16, PixelFormat::Rgba8, 255));
        }
        assert!(writer.write_if_changed(&canvas).await.unwrap());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        // Unchanged canvas is not rewritten.
        assert!(!writer.write_if_changed(&canvas).await.unwrap());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn copy_is_detached_from_live_canvas() {
        let canvas = Mutex::new(Canvas::new());
        let mut writer = SnapshotWriter::new(temp_path("detached"), 80);
        {
            let mut c = canvas.lock().unwrap();
            c.ensure_size(16, 16);
            c.blit(0, 0, &Frame::filled(16, 16, PixelFormat::Rgba8, 10));
        }

        let copy = writer.copy_if_changed(&canvas).unwrap();
        // The receiver can keep patching while the copy is encoded.
        {
            let mut c = canvas.try_lock().expect("canvas still locked");
            c.blit(0, 0, &Frame::filled(16, 16, PixelFormat::Rgba8, 200));
        }
        assert_eq!(copy.frame().data[0], 10);
        assert_eq!(copy.tiles_applied(), 1);

        // The second blit counts as a change.
        assert_eq!(writer.copy_if_changed(&canvas).unwrap().frame().data[0], 200);
        assert!(writer.copy_if_changed(&canvas).is_none());
    }
}
