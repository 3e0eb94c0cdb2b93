//! Viewer-side framebuffer.
//!
//! Holds the most recent full-screen image assembled from decoded tiles.
//! Starts out black, which is what the sender's checksum table assumes
//! about origins it has never recorded.

use crate::error::TilecastError;
use crate::pipeline::encoder::{JpegCodec, TileCodec};
use crate::pipeline::types::{Frame, PixelFormat};

/// Persistent RGBA framebuffer, patched tile by tile.
#[derive(Debug, Clone)]
pub struct Canvas {
    frame: Frame,
    tiles_applied: u64,
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            frame: Frame::filled(0, 0, PixelFormat::Rgba8, 0),
            tiles_applied: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn tiles_applied(&self) -> u64 {
        self.tiles_applied
    }

    /// Current image. Empty before the first change set.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Reinitialise to black if the sender's screen size changed.
    ///
    /// Returns `true` when the buffer was reallocated.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if width == self.frame.width && height == self.frame.height {
            return false;
        }
        self.frame = Frame::filled(width, height, PixelFormat::Rgba8, 0);
        for px in self.frame.data.chunks_exact_mut(4) {
            px[3] = 0xFF;
        }
        true
    }

    /// Copy a decoded tile into place at `(x, y)`, clipping whatever
    /// falls outside the canvas.
    pub fn blit(&mut self, x: u32, y: u32, tile: &Frame) {
        if x >= self.frame.width || y >= self.frame.height {
            return;
        }
        let w = tile.width.min(self.frame.width - x) as usize;
        let h = tile.height.min(self.frame.height - y) as usize;
        let stride = self.frame.stride();

        for row in 0..h {
            let src = tile.row_span(0, row as u32, w as u32);
            let dst_start = (y as usize + row) * stride + x as usize * 4;
            let dst = &mut self.frame.data[dst_start..dst_start + w * 4];
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                d.copy_from_slice(&tile.format.to_rgba(s));
            }
        }
        self.tiles_applied += 1;
    }

    /// JPEG-encode the whole canvas.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, TilecastError> {
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(TilecastError::Codec("canvas is empty".into()));
        }
        JpegCodec.encode(&self.frame, quality)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_resets_to_black() {
        let mut canvas = Canvas::new();
        assert!(canvas.ensure_size(4, 2));
        assert!(!canvas.ensure_size(4, 2));
        assert_eq!(canvas.frame().data.len(), 32);
        assert_eq!(&canvas.frame().data[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn blit_converts_and_clips() {
        let mut canvas = Canvas::new();
        canvas.ensure_size(4, 4);

        let mut tile = Frame::filled(3, 3, PixelFormat::Bgra8, 0);
        for px in tile.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[1, 2, 3, 4]);
        }
        canvas.blit(2, 2, &tile);

        let data = &canvas.frame().data;
        let at = |x: usize, y: usize| &data[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(3, 3), &[3, 2, 1, 4]);
        assert_eq!(at(1, 1), &[0, 0, 0, 255]);
        assert_eq!(canvas.tiles_applied(), 1);
    }

    #[test]
    fn blit_outside_canvas_is_ignored() {
        let mut canvas = Canvas::new();
        canvas.ensure_size(4, 4);
        canvas.blit(10, 0, &Frame::filled(2, 2, PixelFormat::Rgba8, 9));
        assert_eq!(canvas.tiles_applied(), 0);
    }

    #[test]
    fn jpeg_snapshot_of_empty_canvas_fails() {
        assert!(Canvas::new().to_jpeg(85).is_err());
        let mut canvas = Canvas::new();
        canvas.ensure_size(16, 16);
        assert!(canvas.to_jpeg(85).unwrap().starts_with(&[0xFF, 0xD8]));
    }
}
