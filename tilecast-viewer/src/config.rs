//! Viewer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tilecast_core::pipeline::CodecKind;
use tilecast_core::session::ViewerConfig;

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub display: DisplayConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

/// Where the server is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host name or IP of the server.
    pub server_address: String,
    pub video_port: u16,
    pub control_port: u16,
    pub audio_port: u16,
    /// Per-channel connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Deadline for a single socket write, in milliseconds.
    pub io_timeout_ms: u64,
}

/// Decoding and snapshot output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Must match the server's codec.
    pub codec: CodecKind,
    /// Write the current screen here as a JPEG. Empty disables it.
    pub snapshot_path: String,
    pub snapshot_interval_ms: u64,
    pub snapshot_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Play the audio the server streams.
    pub play: bool,
    /// Send the local microphone to the server. Only useful when the
    /// server has `play_remote` set.
    pub send_microphone: bool,
}

/// Logging.
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
            server_address: "127.0.0.1".into(),
            video_port: 9632,
            control_port: 9633,
            audio_port: 9634,
            connect_timeout_ms: 5000,
            io_timeout_ms: 5000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Jpeg,
            snapshot_path: String::new(),
            snapshot_interval_ms: 1000,
            snapshot_quality: 85,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            play: true,
            send_microphone: false,
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

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
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

    pub fn to_viewer_config(&self) -> ViewerConfig {
        let net = &self.network;
        ViewerConfig {
            server: net.server_address.clone(),
            video_port: net.video_port,
            control_port: net.control_port,
            audio_port: net.audio_port,
            connect_timeout: Duration::from_millis(net.connect_timeout_ms.max(100)),
            io_timeout: Duration::from_millis(net.io_timeout_ms.max(100)),
            codec: self.display.codec,
        }
    }

    /// Snapshot interval, never below 100 ms.
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.display.snapshot_interval_ms.max(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(text.contains("server_address = \"127.0.0.1\""));
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.audio_port, 9634);
        assert_eq!(parsed.display.snapshot_quality, 85);
        assert!(parsed.audio.play);
        assert!(!parsed.audio.send_microphone);
    }

    #[test]
    fn microphone_is_opt_in() {
        let parsed: ClientConfig = toml::from_str("[audio]\nsend_microphone = true\n").unwrap();
        assert!(parsed.audio.play);
        assert!(parsed.audio.send_microphone);
    }

    #[test]
    fn viewer_config_carries_codec_and_timeouts() {
        let mut cfg = ClientConfig::default();
        cfg.display.codec = CodecKind::Zstd;
        cfg.network.connect_timeout_ms = 0;
        let viewer = cfg.to_viewer_config();
        assert_eq!(viewer.codec, CodecKind::Zstd);
        assert_eq!(viewer.connect_timeout, Duration::from_millis(100));
        assert_eq!(viewer.server, "127.0.0.1");
    }
}
