//! Configuration for the tilecast server.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tilecast_core::pipeline::{CapturePipelineConfig, ChecksumCommit, CodecKind};
use tilecast_core::session::{CaptureLoopConfig, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub screen: ScreenConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

/// Listening sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to listen on.
    pub bind_address: IpAddr,
    /// Tile change sets (server → viewer).
    pub video_port: u16,
    /// Input events (viewer → server).
    pub control_port: u16,
    /// MJPEG bridge for browsers.
    pub web_port: u16,
    /// PCM audio, both directions.
    pub audio_port: u16,
    pub web_enabled: bool,
    /// Deadline for a single socket write, in milliseconds.
    pub io_timeout_ms: u64,
}

/// Capture and tile encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Capture cycles per second (1–60).
    pub fps: u32,
    /// Tile size in pixels (16–1000).
    pub tile_width: u32,
    pub tile_height: u32,
    /// "jpeg" or "zstd". The viewer must use the same codec.
    pub codec: CodecKind,
    pub tile_quality: u8,
    /// Used for one retry when a tile fails to encode.
    pub fallback_quality: u8,
    /// JPEG quality of the browser snapshot.
    pub snapshot_quality: u8,
    /// Refresh the browser snapshot every N capture cycles.
    pub snapshot_every: u32,
    /// Monitor to capture (0 = primary).
    pub monitor_index: usize,
    /// "on-encode" or "on-detect".
    pub checksum_commit: ChecksumCommit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Stream system audio (loopback) to the viewer.
    pub enabled: bool,
    /// Play audio the viewer sends back.
    pub play_remote: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            video_port: 9632,
            control_port: 9633,
            web_port: 8080,
            audio_port: 9634,
            web_enabled: true,
            io_timeout_ms: 5000,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            tile_width: 256,
            tile_height: 256,
            codec: CodecKind::Jpeg,
            tile_quality: 90,
            fallback_quality: 80,
            snapshot_quality: 85,
            snapshot_every: 5,
            monitor_index: 0,
            checksum_commit: ChecksumCommit::OnEncode,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            play_remote: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Session settings with every value clamped into its valid range.
    pub fn to_session_config(&self) -> SessionConfig {
        let net = &self.network;
        let screen = &self.screen;
        SessionConfig {
            bind_address: net.bind_address,
            video_port: net.video_port,
            control_port: net.control_port,
            web_port: net.web_port,
            audio_port: net.audio_port,
            web_enabled: net.web_enabled,
            io_timeout: Duration::from_millis(net.io_timeout_ms.max(100)),
            codec: screen.codec,
            pipeline: CapturePipelineConfig {
                tile_width: screen.tile_width.clamp(16, 1000),
                tile_height: screen.tile_height.clamp(16, 1000),
                tile_quality: screen.tile_quality.clamp(1, 100),
                fallback_quality: screen.fallback_quality.clamp(1, 100),
                commit: screen.checksum_commit,
            },
            capture: CaptureLoopConfig {
                fps: screen.fps.clamp(1, 60),
                snapshot_every: screen.snapshot_every.max(1),
                snapshot_quality: screen.snapshot_quality.clamp(1, 100),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
