//! Viewer side of a session.
//!
//! Connects to the server's video, control and audio ports in that
//! order, then keeps a [`Canvas`] up to date from the video stream while
//! the caller pushes input through a [`ControlSender`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ChannelKind, TilecastError};
use crate::pipeline::canvas::Canvas;
use crate::pipeline::encoder::{CodecKind, TileCodec};
use crate::pipeline::types::Frame;
use crate::protocol::video::{ReceivedChangeSet, VideoReader};
use crate::session::audio::{
    AudioSink, AudioSource, run_audio_capture, run_audio_drain, run_audio_playback,
};
use crate::session::control::ControlSender;
use crate::session::wait_for_stop;

// ── ViewerConfig ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Host name or IP of the server.
    pub server: String,
    pub video_port: u16,
    pub control_port: u16,
    pub audio_port: u16,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// Must match the server's codec.
    pub codec: CodecKind,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            video_port: 9632,
            control_port: 9633,
            audio_port: 9634,
            connect_timeout: Duration::from_millis(5000),
            io_timeout: Duration::from_millis(5000),
            codec: CodecKind::Jpeg,
        }
    }
}

// ── VideoStats ───────────────────────────────────────────────────

/// Receive-side counters for the video channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    pub change_sets: u64,
    pub tiles_applied: u64,
    /// Records rejected by the framing checks.
    pub tiles_skipped: u64,
    /// Records whose payload failed to decode.
    pub decode_failures: u64,
}

// ── Video receive loop ───────────────────────────────────────────

/// Apply change sets from `reader` to `canvas` until the peer closes,
/// the stream is corrupt, or `running` goes false.
pub async fn run_video_receiver<R>(
    reader: R,
    codec: &dyn TileCodec,
    canvas: &Mutex<Canvas>,
    stats: &Mutex<VideoStats>,
    running: &Arc<AtomicBool>,
) -> Result<(), TilecastError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = VideoReader::new(reader);

    while running.load(Ordering::SeqCst) {
        let next = tokio::select! {
            next = reader.next_change_set() => next?,
            _ = wait_for_stop(running) => break,
        };
        let Some(change_set) = next else {
            debug!("video peer closed the connection");
            break;
        };
        apply_change_set(&change_set, codec, canvas, stats);
    }
    Ok(())
}

fn apply_change_set(
    change_set: &ReceivedChangeSet,
    codec: &dyn TileCodec,
    canvas: &Mutex<Canvas>,
    stats: &Mutex<VideoStats>,
) {
    // Decode before taking the lock so readers of the canvas are not
    // held up by JPEG work.
    let mut decoded: Vec<(u32, u32, Frame)> = Vec::with_capacity(change_set.tiles.len());
    let mut failures = 0u64;
    for tile in &change_set.tiles {
        match codec.decode_tile(&tile.payload, tile.width, tile.height) {
            Ok(frame) => decoded.push((tile.x, tile.y, frame)),
            Err(e) => {
                warn!("dropping tile at ({}, {}): {e}", tile.x, tile.y);
                failures += 1;
            }
        }
    }

    {
        let mut canvas = canvas.lock().unwrap_or_else(|p| p.into_inner());
        if canvas.ensure_size(change_set.header.width, change_set.header.height) {
            info!(
                "remote screen is {}x{}",
                change_set.header.width, change_set.header.height
            );
        }
        for (x, y, frame) in &decoded {
            canvas.blit(*x, *y, frame);
        }
    }

    let mut stats = stats.lock().unwrap_or_else(|p| p.into_inner());
    stats.change_sets += 1;
    stats.tiles_applied += decoded.len() as u64;
    stats.tiles_skipped += change_set.skipped as u64;
    stats.decode_failures += failures;
}

// ── ViewerSession ────────────────────────────────────────────────

/// A connected viewer.
pub struct ViewerSession {
    canvas: Arc<Mutex<Canvas>>,
    stats: Arc<Mutex<VideoStats>>,
    control: ControlSender,
    running: Arc<AtomicBool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ViewerSession {
    /// Connect all three channels and start the receive workers.
    ///
    /// `microphone` streams local audio to the server; `speaker` plays
    /// what the server sends.
    pub async fn connect(
        config: &ViewerConfig,
        microphone: Option<Box<dyn AudioSource>>,
        speaker: Option<Box<dyn AudioSink>>,
    ) -> Result<Self, TilecastError> {
        let video = connect_channel(config, ChannelKind::Video, config.video_port).await?;
        let control = connect_channel(config, ChannelKind::Control, config.control_port).await?;
        let audio = connect_channel(config, ChannelKind::Audio, config.audio_port).await?;

        let running = Arc::new(AtomicBool::new(true));
        let canvas = Arc::new(Mutex::new(Canvas::new()));
        let stats = Arc::new(Mutex::new(VideoStats::default()));
        let mut tasks = Vec::new();

        // Video.
        {
            let codec = config.codec.build();
            let (canvas, stats, flag) = (Arc::clone(&canvas), Arc::clone(&stats), Arc::clone(&running));
            tasks.push((
                "video",
                tokio::spawn(async move {
                    match run_video_receiver(video, codec.as_ref(), &canvas, &stats, &flag).await {
                        Ok(()) => info!("video receiver finished"),
                        Err(e) => error!("video receiver ended: {e}"),
                    }
                }),
            ));
        }

        // Control.
        let (control, writer) = ControlSender::spawn(control, config.io_timeout);
        tasks.push((
            "control",
            tokio::spawn(async move {
                match writer.await {
                    Ok(Ok(())) => info!("control writer finished"),
                    Ok(Err(e)) => error!("control writer ended: {e}"),
                    Err(e) => error!("control writer panicked: {e}"),
                }
            }),
        ));

        // Audio.
        let (audio_read, audio_write) = audio.into_split();
        let flag = Arc::clone(&running);
        tasks.push(match speaker {
            Some(mut sink) => (
                "audio-playback",
                tokio::spawn(async move {
                    match run_audio_playback(audio_read, sink.as_mut(), &flag).await {
                        Ok(stats) => info!("audio playback finished: {stats:?}"),
                        Err(e) => error!("audio playback ended: {e}"),
                    }
                }),
            ),
            None => (
                "audio-drain",
                tokio::spawn(async move {
                    match run_audio_drain(audio_read, &flag).await {
                        Ok(stats) => debug!("audio drain finished: {stats:?}"),
                        Err(e) => error!("audio drain ended: {e}"),
                    }
                }),
            ),
        });
        if let Some(mut source) = microphone {
            let flag = Arc::clone(&running);
            let io_timeout = config.io_timeout;
            tasks.push((
                "audio-capture",
                tokio::spawn(async move {
                    match run_audio_capture(audio_write, source.as_mut(), &flag, io_timeout).await {
                        Ok(stats) => info!("audio capture finished: {stats:?}"),
                        Err(e) => error!("audio capture ended: {e}"),
                    }
                }),
            ));
        }

        Ok(Self {
            canvas,
            stats,
            control,
            running,
            tasks,
        })
    }

    /// Shared framebuffer, updated as change sets arrive.
    pub fn canvas(&self) -> Arc<Mutex<Canvas>> {
        Arc::clone(&self.canvas)
    }

    pub fn control(&self) -> ControlSender {
        self.control.clone()
    }

    pub fn stats(&self) -> VideoStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Resolves once the video receiver has returned or the session
    /// has been stopped.
    pub async fn finished(&self) {
        loop {
            let video_done = self
                .tasks
                .iter()
                .any(|(name, h)| *name == "video" && h.is_finished());
            if video_done || !self.running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(super::STOP_POLL_INTERVAL).await;
        }
    }

    /// Stop every worker and wait for it.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        // The control writer ends once its last sender is gone.
        drop(self.control);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!("{name} task panicked: {e}");
            }
        }
    }
}

async fn connect_channel(
    config: &ViewerConfig,
    channel: ChannelKind,
    port: u16,
) -> Result<TcpStream, TilecastError> {
    let target = (config.server.as_str(), port);
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| TilecastError::Timeout(config.connect_timeout))??;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("could not disable Nagle on {channel} socket: {e}");
    }
    info!("{channel} channel connected to {}:{port}", config.server);
    Ok(stream)
}

// ── Tests ────────────────────────────────────────────────────────
