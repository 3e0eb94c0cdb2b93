//! Tile codecs.
//!
//! A [`TileCodec`] turns a pixel region into compressed bytes and back.
//! Two implementations ship:
//!
//! - [`JpegCodec`]: lossy JPEG through the `image` crate. The default,
//!   and the only format the MJPEG bridge can serve.
//! - [`ZstdCodec`]: lossless, raw RGBA compressed with zstd. Useful on
//!   fast links where text crispness matters more than bytes.
//!
//! Nothing on the wire says which codec produced a payload, so both
//! ends of a session must be configured alike.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::TilecastError;
use crate::pipeline::types::{Frame, PixelFormat};
use crate::protocol::video::MAX_TILE_DIMENSION;

// ── TileCodec ────────────────────────────────────────────────────

/// Encode a pixel region to bytes and decode it back.
pub trait TileCodec: Send + Sync {
    /// Compress `region` at `quality` (1..=100, higher is better).
    fn encode(&self, region: &Frame, quality: u8) -> Result<Vec<u8>, TilecastError>;

    /// Reconstruct pixels from a payload produced by [`encode`](Self::encode).
    fn decode(&self, payload: &[u8]) -> Result<Frame, TilecastError>;

    /// Decode a payload that must hold exactly `width` x `height` pixels.
    fn decode_tile(&self, payload: &[u8], width: u32, height: u32) -> Result<Frame, TilecastError> {
        let frame = self.decode(payload)?;
        if (frame.width, frame.height) != (width, height) {
            return Err(TilecastError::Codec(format!(
                "tile decoded to {}x{}, record says {width}x{height}",
                frame.width, frame.height
            )));
        }
        Ok(frame)
    }
}

/// Encode at `preferred` quality and, only if that fails, once more at
/// `fallback`. An empty payload counts as a failure.
pub fn encode_with_fallback(
    codec: &dyn TileCodec,
    region: &Frame,
    preferred: u8,
    fallback: u8,
) -> Result<Vec<u8>, TilecastError> {
    let attempt = |quality| {
        codec.encode(region, quality).and_then(|bytes| {
            if bytes.is_empty() {
                Err(TilecastError::Codec("encoder produced no bytes".into()))
            } else {
                Ok(bytes)
            }
        })
    };

    match attempt(preferred) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            tracing::debug!("encode at quality {preferred} failed ({e}); retrying at {fallback}");
            attempt(fallback)
        }
    }
}

// ── CodecKind ────────────────────────────────────────────────────

/// Configuration-level codec selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    #[default]
    Jpeg,
    Zstd,
}

impl CodecKind {
    /// Instantiate the codec this selector names.
    pub fn build(self) -> Box<dyn TileCodec> {
        match self {
            CodecKind::Jpeg => Box::new(JpegCodec),
            CodecKind::Zstd => Box::new(ZstdCodec),
        }
    }
}

// ── JpegCodec ────────────────────────────────────────────────────

/// Baseline JPEG via `image`. Alpha is discarded on encode and comes
/// back fully opaque.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl TileCodec for JpegCodec {
    fn encode(&self, region: &Frame, quality: u8) -> Result<Vec<u8>, TilecastError> {
        let rgb = region.to_rgb();
        let mut out = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder.encode(&rgb, region.width, region.height, ExtendedColorType::Rgb8)?;
        }
        Ok(out)
    }

    fn decode(&self, payload: &[u8]) -> Result<Frame, TilecastError> {
        let img = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)?.to_rgba8();
        let (width, height) = img.dimensions();
        Frame::new(width, height, PixelFormat::Rgba8, img.into_raw())
            .ok_or_else(|| TilecastError::Codec("decoded JPEG has inconsistent size".into()))
    }
}

// ── ZstdCodec ────────────────────────────────────────────────────

/// Lossless codec: an 8-byte `width, height` prefix (little-endian u32s)
/// followed by zstd-compressed RGBA rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl ZstdCodec {
    const PREFIX: usize = 8;

    /// Map the quality slider onto a zstd level: lower quality buys
    /// more compression effort, since the output is lossless either way.
    fn level_for(quality: u8) -> i32 {
        ((100 - quality.min(100) as i32) / 5).clamp(1, 19)
    }
}

impl TileCodec for ZstdCodec {
    fn encode(&self, region: &Frame, quality: u8) -> Result<Vec<u8>, TilecastError> {
        let rgba = region.to_rgba();
        let compressed = zstd::encode_all(rgba.as_slice(), Self::level_for(quality))
            .map_err(|e| TilecastError::Codec(format!("zstd encode failed: {e}")))?;

        let mut out = Vec::with_capacity(Self::PREFIX + compressed.len());
        out.extend_from_slice(&region.width.to_le_bytes());
        out.extend_from_slice(&region.height.to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn decode(&self, payload: &[u8]) -> Result<Frame, TilecastError> {
        let (width, height) = Self::prefix(payload)?;
        Self::inflate(payload, width, height)
    }

    fn decode_tile(&self, payload: &[u8], width: u32, height: u32) -> Result<Frame, TilecastError> {
        let prefix = Self::prefix(payload)?;
        if prefix != (width, height) {
            return Err(TilecastError::Codec(format!(
                "zstd tile claims {}x{}, record says {width}x{height}",
                prefix.0, prefix.1
            )));
        }
        Self::inflate(payload, width, height)
    }
}

impl ZstdCodec {
    /// Dimensions from the prefix, bounded by the largest legal tile.
    fn prefix(payload: &[u8]) -> Result<(u32, u32), TilecastError> {
        if payload.len() < Self::PREFIX {
            return Err(TilecastError::Codec(format!(
                "zstd tile too short: {} < {}",
                payload.len(),
                Self::PREFIX
            )));
        }
        let width = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let height = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        if width == 0 || height == 0 || width > MAX_TILE_DIMENSION || height > MAX_TILE_DIMENSION {
            return Err(TilecastError::Codec(format!(
                "zstd tile size {width}x{height} out of range"
            )));
        }
        Ok((width, height))
    }

    /// Decompress into at most `width * height * 4` bytes.
    fn inflate(payload: &[u8], width: u32, height: u32) -> Result<Frame, TilecastError> {
        let capacity = width as usize * height as usize * 4;
        let data = zstd::bulk::decompress(&payload[Self::PREFIX..], capacity)
            .map_err(|e| TilecastError::Codec(format!("zstd decode failed: {e}")))?;

        Frame::new(width, height, PixelFormat::Rgba8, data).ok_or_else(|| {
            TilecastError::Codec(format!("zstd tile does not hold {width}x{height} pixels"))
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
