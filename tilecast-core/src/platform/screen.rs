//! Screen capture backends.

use crate::error::TilecastError;
use crate::pipeline::capture::FrameSource;
#[cfg(target_os = "windows")]
use crate::pipeline::types::{Frame, PixelFormat};

/// Captures one monitor of the local desktop.
///
/// Monitor `0` is the primary monitor; other indices follow the order
/// the OS enumerates them in.
#[derive(Debug, Clone)]
pub struct ScreenCapturer {
    monitor_index: usize,
}

impl ScreenCapturer {
    /// Check that the monitor exists before the session starts.
    pub fn open(monitor_index: usize) -> Result<Self, TilecastError> {
        let capturer = Self { monitor_index };
        capturer.probe()?;
        Ok(capturer)
    }

    pub fn monitor_index(&self) -> usize {
        self.monitor_index
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
impl ScreenCapturer {
    // Monitors are re-enumerated per capture so the capturer stays
    // `Send` and survives display changes.
    fn monitor(&self) -> Result<xcap::Monitor, TilecastError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| TilecastError::Capture(format!("monitor enumeration failed: {e}")))?;
        if self.monitor_index == 0 {
            if let Some(primary) = monitors
                .iter()
                .find(|m| m.is_primary().unwrap_or(false))
                .cloned()
            {
                return Ok(primary);
            }
        }
        let count = monitors.len();
        monitors.into_iter().nth(self.monitor_index).ok_or_else(|| {
            TilecastError::Capture(format!(
                "monitor {} not found ({count} available)",
                self.monitor_index
            ))
        })
    }

    fn probe(&self) -> Result<(), TilecastError> {
        let monitor = self.monitor()?;
        tracing::info!(
            "capturing monitor {} ({}x{}, {})",
            self.monitor_index,
            monitor.width().unwrap_or(0),
            monitor.height().unwrap_or(0),
            monitor.name().unwrap_or_default()
        );
        Ok(())
    }
}

#[cfg(target_os = "windows")]
impl FrameSource for ScreenCapturer {
    fn capture_full_frame(&mut self) -> Result<Frame, TilecastError> {
        let image = self
            .monitor()?
            .capture_image()
            .map_err(|e| TilecastError::Capture(format!("screen grab failed: {e}")))?;
        let (width, height) = (image.width(), image.height());
        Frame::new(width, height, PixelFormat::Rgba8, image.into_raw())
            .ok_or_else(|| TilecastError::Capture(format!("bad {width}x{height} screen buffer")))
    }
}

// ── Unsupported platforms ────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl ScreenCapturer {
    fn probe(&self) -> Result<(), TilecastError> {
        Err(unsupported())
    }
}

#[cfg(not(target_os = "windows"))]
impl FrameSource for ScreenCapturer {
    fn capture_full_frame(&mut self) -> Result<crate::pipeline::types::Frame, TilecastError> {
        Err(unsupported())
    }
}

#[cfg(not(target_os = "windows"))]
fn unsupported() -> TilecastError {
    TilecastError::Capture("screen capture is only available on Windows".into())
}
