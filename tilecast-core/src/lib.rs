//! # tilecast-core
//!
//! Core library for tilecast, a tile-based remote screen streaming
//! system.
//!
//! This crate contains:
//! - **Pipeline**: `TileDiffer` change detection, `TileCodec` (JPEG / zstd),
//!   the capture-side `CapturePipeline` and the viewer-side `Canvas`
//! - **Protocol**: framing for the video, control and audio channels
//! - **Session**: `SessionServer`, `ViewerSession`, the MJPEG bridge and
//!   the per-channel worker loops
//! - **Error**: `TilecastError`, a typed, `thiserror`-based error hierarchy
//! - **Platform**: Windows screen capture, input injection and audio
//!   devices behind the `FrameSource`, `InputInjector`, `AudioSource`
//!   and `AudioSink` traits

pub mod error;
pub mod pipeline;
pub mod platform;
pub mod protocol;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{ChannelKind, TilecastError};
pub use pipeline::{
    Canvas, CapturePipeline, ChecksumCommit, CodecKind, Frame, FrameSource, PixelFormat,
    TileCodec, TileDiffer, TileRect,
};
pub use protocol::{ChangeSet, ControlEvent, Edge, MouseButton};
pub use session::{
    AudioPacket, AudioSink, AudioSource, ControlSender, InputInjector, SessionConfig,
    SessionHandle, SessionParts, SessionServer, SharedFrameCell, SubmitOutcome, ViewerConfig,
    ViewerSession,
};
