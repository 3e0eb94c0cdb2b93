//! Domain-specific error types for the tilecast session protocols.
//!
//! All fallible operations return `Result<T, TilecastError>`.
//! Malformed network input never panics; it surfaces as a typed variant
//! so each worker loop can decide whether the fault is fatal for its
//! channel or only for the current unit of work.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Which of the session's listening endpoints a resource error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Video,
    Control,
    Audio,
    Web,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelKind::Video => "video",
            ChannelKind::Control => "control",
            ChannelKind::Audio => "audio",
            ChannelKind::Web => "web",
        };
        f.write_str(name)
    }
}

/// The canonical error type for tilecast.
#[derive(Debug, Error)]
pub enum TilecastError {
    // ── Stream validation ────────────────────────────────────────
    /// A video change set did not start with the protocol sentinel.
    #[error("bad video sentinel: {0:#010x}")]
    BadSentinel(u32),

    /// A declared dimension or count exceeded its sanity bound.
    #[error("{field} out of bounds: {value} (max {max})")]
    HeaderOutOfBounds {
        field: &'static str,
        value: u32,
        max: u32,
    },

    /// A tile record declared a payload too large to skip safely.
    #[error("tile payload too large: {size} bytes (max {max})")]
    TilePayloadTooLarge { size: u32, max: u32 },

    /// The control stream carried a tag with no defined payload.
    #[error("unknown control tag: {0}")]
    UnknownControlTag(u8),

    /// An audio frame declared a zero or oversized length.
    #[error("invalid audio packet length: {0}")]
    InvalidAudioLength(u32),

    /// The peer closed the stream in the middle of a field.
    #[error("short read: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },

    // ── Transport ────────────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A send did not complete before its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Resource acquisition ─────────────────────────────────────
    /// A listener could not be bound at startup.
    #[error("failed to bind {channel} listener on {addr}: {source}")]
    Bind {
        channel: ChannelKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborators ────────────────────────────────────────────
    /// Encoding or decoding of a tile or snapshot failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The frame source could not produce a frame.
    #[error("capture error: {0}")]
    Capture(String),

    /// The input injector rejected an event.
    #[error("input injection error: {0}")]
    Input(String),

    /// The audio device layer failed.
    #[error("audio device error: {0}")]
    Audio(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl TilecastError {
    /// True when the error means the byte stream can no longer be trusted.
    pub fn is_stream_corruption(&self) -> bool {
        matches!(
            self,
            TilecastError::BadSentinel(_)
                | TilecastError::HeaderOutOfBounds { .. }
                | TilecastError::TilePayloadTooLarge { .. }
                | TilecastError::UnknownControlTag(_)
                | TilecastError::InvalidAudioLength(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TilecastError {
    fn from(s: String) -> Self {
        TilecastError::Other(s)
    }
}

impl From<&str> for TilecastError {
    fn from(s: &str) -> Self {
        TilecastError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TilecastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TilecastError::ChannelClosed
    }
}

impl From<image::ImageError> for TilecastError {
    fn from(e: image::ImageError) -> Self {
        TilecastError::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TilecastError::BadSentinel(0xDEAD_BEEF);
        assert!(e.to_string().contains("0xdeadbeef"));

        let e = TilecastError::HeaderOutOfBounds {
            field: "tile count",
            value: 20_000,
            max: 10_000,
        };
        assert!(e.to_string().contains("tile count"));
        assert!(e.to_string().contains("20000"));
    }

    #[test]
    fn corruption_classification() {
        assert!(TilecastError::UnknownControlTag(9).is_stream_corruption());
        assert!(TilecastError::InvalidAudioLength(0).is_stream_corruption());
        assert!(!TilecastError::Codec("bad jpeg".into()).is_stream_corruption());
        assert!(!TilecastError::Timeout(Duration::from_secs(5)).is_stream_corruption());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TilecastError = io_err.into();
        assert!(matches!(e, TilecastError::Connection(_)));
    }

    #[test]
    fn bind_error_names_channel() {
        let e = TilecastError::Bind {
            channel: ChannelKind::Audio,
            addr: "127.0.0.1:9634".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(e.to_string().contains("audio listener"));
    }
}
