//! Shared frame and geometry types for the capture/display pipeline.
//!
//! A [`Frame`] is the transient, full-resolution buffer produced once per
//! capture cycle. Tiles cut from it are themselves small `Frame`s, which
//! keeps the codec interface to a single pixel type.

use std::time::Instant;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for captured and decoded buffers. Always 4 bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Blue, Green, Red, Alpha (GDI / DXGI native order).
    Bgra8,
    /// Red, Green, Blue, Alpha (`xcap` / `image` native order).
    Rgba8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Reorder one pixel from this format into RGBA.
    #[inline]
    pub fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
        }
    }
}

// ── TileRect ─────────────────────────────────────────────────────

/// A rectangular region of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The `(x, y)` origin used as the checksum table key.
    pub fn origin(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// A tightly packed pixel buffer: `height` rows of `width * 4` bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `width * height * 4` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl Frame {
    /// Wrap a pixel buffer, checking that its length matches the dimensions.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            data,
            timestamp: Instant::now(),
        })
    }

    /// A frame with every byte set to `fill`.
    pub fn filled(width: u32, height: u32, format: PixelFormat, fill: u8) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![fill; len],
            timestamp: Instant::now(),
        }
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Total byte size of the bitmap.
    pub fn byte_len(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// The bytes of row `y` restricted to columns `x..x + width`.
    pub fn row_span(&self, x: u32, y: u32, width: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride() + x as usize * bpp;
        &self.data[start..start + width as usize * bpp]
    }

    /// Copy `rect` out into a standalone frame of the same format.
    ///
    /// # Panics
    ///
    /// Panics if `rect` extends past the frame edges.
    pub fn crop(&self, rect: TileRect) -> Frame {
        let bpp = self.format.bytes_per_pixel();
        let mut data = Vec::with_capacity(rect.width as usize * rect.height as usize * bpp);
        for row in 0..rect.height {
            data.extend_from_slice(self.row_span(rect.x, rect.y + row, rect.width));
        }
        Frame {
            width: rect.width,
            height: rect.height,
            format: self.format,
            data,
            timestamp: self.timestamp,
        }
    }

    /// Tightly packed RGB bytes, the input layout JPEG encoding expects.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(4) {
            let rgba = self.format.to_rgba(px);
            out.extend_from_slice(&rgba[..3]);
        }
        out
    }

    /// Tightly packed RGBA bytes.
    pub fn to_rgba(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgba8 => self.data.clone(),
            PixelFormat::Bgra8 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| self.format.to_rgba(px))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_length() {
        assert!(Frame::new(4, 4, PixelFormat::Rgba8, vec![0; 63]).is_none());
        assert!(Frame::new(4, 4, PixelFormat::Rgba8, vec![0; 64]).is_some());
    }

    #[test]
    fn crop_copies_region() {
        let mut frame = Frame::filled(8, 8, PixelFormat::Bgra8, 0);
        // Mark pixel (5, 6).
        let off = 6 * frame.stride() + 5 * 4;
        frame.data[off..off + 4].copy_from_slice(&[1, 2, 3, 4]);

        let tile = frame.crop(TileRect::new(4, 4, 4, 4));
        assert_eq!(tile.width, 4);
        assert_eq!(tile.data.len(), 64);
        let off = 2 * tile.stride() + 4;
        assert_eq!(&tile.data[off..off + 4], &[1, 2, 3, 4]);
    }

    #[test]
    fn bgra_converts_to_rgb() {
        let frame = Frame::new(1, 1, PixelFormat::Bgra8, vec![10, 20, 30, 255]).unwrap();
        assert_eq!(frame.to_rgb(), vec![30, 20, 10]);
        assert_eq!(frame.to_rgba(), vec![30, 20, 10, 255]);
    }
}
