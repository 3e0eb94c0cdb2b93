//! Server process lifecycle.
//!
//! Binds every port, wires the platform adapters into a session, waits
//! for the viewer, and tears the session down once its workers are
//! done or the process is asked to stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use tilecast_core::error::{ChannelKind, TilecastError};
use tilecast_core::platform::{DeviceSink, DeviceSource, ScreenCapturer, default_injector};
use tilecast_core::session::{AudioSink, AudioSource, SessionParts, SessionServer};

use crate::config::ServerConfig;

// ── ServerService ────────────────────────────────────────────────

/// One tilecast session, from bind to teardown.
pub struct ServerService {
    config: ServerConfig,
    server: SessionServer,
}

impl ServerService {
    /// Claim every listening port. Fails if any of them is taken.
    pub fn bind(config: ServerConfig) -> Result<Self, TilecastError> {
        let server = SessionServer::bind(config.to_session_config())?;
        Ok(Self { config, server })
    }

    /// Clear the returned flag to stop the session from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.server.stop_handle()
    }

    pub fn is_running(&self) -> bool {
        self.stop_handle().load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn port(&self, channel: ChannelKind) -> Option<u16> {
        self.server.local_addr(channel).map(|a| a.port())
    }

    /// Run one session to completion with the given adapters.
    pub async fn run(self, parts: SessionParts) -> Result<(), TilecastError> {
        let stop = self.server.stop_handle();
        let handle = self.server.run(parts).await?;

        if !handle.worker_names().is_empty() {
            info!("session running: {}", handle.worker_names().join(", "));
            handle.finished().await;
            if stop.load(Ordering::SeqCst) {
                info!("session ended: capture stopped or the viewer disconnected");
            } else {
                info!("session ended: stop requested");
            }
        }
        handle.shutdown().await;
        Ok(())
    }
}

// ── Platform wiring ──────────────────────────────────────────────

/// Open the local screen, input and audio devices named by `config`.
///
/// Screen capture is required. Audio devices are optional: a failure
/// to open one is logged and the session runs without it.
pub fn platform_parts(config: &ServerConfig) -> Result<SessionParts, TilecastError> {
    let frames = ScreenCapturer::open(config.screen.monitor_index)?;

    let audio_source: Option<Box<dyn AudioSource>> = if config.audio.enabled {
        match DeviceSource::loopback() {
            Ok(source) => Some(Box::new(source)),
            Err(e) => {
                warn!("audio capture disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let audio_sink: Option<Box<dyn AudioSink>> = if config.audio.play_remote {
        match DeviceSink::speakers() {
            Ok(sink) => Some(Box::new(sink)),
            Err(e) => {
                warn!("remote audio playback disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    Ok(SessionParts {
        frames: Box::new(frames),
        injector: default_injector(),
        audio_source,
        audio_sink,
    })
}

// ── Tests ────────────────────────────────────────────────────────
