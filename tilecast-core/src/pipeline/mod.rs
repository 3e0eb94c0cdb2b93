//! Pixel pipeline: capture → diff → encode on the server, decode →
//! canvas on the viewer.

pub mod canvas;
pub mod capture;
pub mod diff;
pub mod encoder;
pub mod types;

pub use canvas::Canvas;
pub use capture::{CapturePipeline, CapturePipelineConfig, CycleStats, FrameSource};
pub use diff::{ChecksumCommit, ChecksumTable, DEFAULT_TILE_SIZE, DirtyTile, TileDiffer, tile_checksum};
pub use encoder::{CodecKind, JpegCodec, TileCodec, ZstdCodec, encode_with_fallback};
pub use types::{Frame, PixelFormat, TileRect};
