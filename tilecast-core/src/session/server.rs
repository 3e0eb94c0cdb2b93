//! Server side of a session.
//!
//! [`SessionServer::bind`] claims every listening port up front, so a
//! port conflict is reported before anyone connects. [`SessionServer::run`]
//! starts the MJPEG bridge, waits for exactly one viewer on each of the
//! video, control and audio ports, then spawns one task per channel.
//!
//! Every socket is owned by exactly one task and is closed when that
//! task returns, so [`SessionHandle::shutdown`] only has to clear the
//! running flag and join.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ChannelKind, TilecastError};
use crate::pipeline::capture::{CapturePipeline, CapturePipelineConfig, FrameSource};
use crate::pipeline::encoder::CodecKind;
use crate::protocol::video::VideoWriter;
use crate::session::audio::{
    AudioSink, AudioSource, run_audio_capture, run_audio_drain, run_audio_playback,
};
use crate::session::bridge;
use crate::session::capture::{CaptureLoop, CaptureLoopConfig};
use crate::session::control::{InputInjector, run_control_loop};
use crate::session::frame_cell::SharedFrameCell;
use crate::session::wait_for_stop;

/// Pending-connection queue for the single-peer channels.
const CHANNEL_BACKLOG: u32 = 1;
/// Pending-connection queue for the HTTP bridge.
const WEB_BACKLOG: u32 = 5;

// ── SessionConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bind_address: IpAddr,
    pub video_port: u16,
    pub control_port: u16,
    pub web_port: u16,
    pub audio_port: u16,
    pub web_enabled: bool,
    /// Deadline for each socket write.
    pub io_timeout: Duration,
    pub codec: CodecKind,
    pub pipeline: CapturePipelineConfig,
    pub capture: CaptureLoopConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            video_port: 9632,
            control_port: 9633,
            web_port: 8080,
            audio_port: 9634,
            web_enabled: true,
            io_timeout: Duration::from_millis(5000),
            codec: CodecKind::Jpeg,
            pipeline: CapturePipelineConfig::default(),
            capture: CaptureLoopConfig::default(),
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────

/// Platform adapters handed to a session.
pub struct SessionParts {
    pub frames: Box<dyn FrameSource>,
    pub injector: Box<dyn InputInjector>,
    /// Local audio to stream to the viewer.
    pub audio_source: Option<Box<dyn AudioSource>>,
    /// Where to play audio the viewer sends back.
    pub audio_sink: Option<Box<dyn AudioSink>>,
}

// ── SessionServer ────────────────────────────────────────────────

/// Bound, not yet accepting.
pub struct SessionServer {
    config: SessionConfig,
    video: TcpListener,
    control: TcpListener,
    audio: TcpListener,
    web: Option<TcpListener>,
    running: Arc<AtomicBool>,
}

impl SessionServer {
    /// Bind every listener named in `config`.
    pub fn bind(config: SessionConfig) -> Result<Self, TilecastError> {
        let ip = config.bind_address;
        let video = listen(ChannelKind::Video, SocketAddr::new(ip, config.video_port), CHANNEL_BACKLOG)?;
        let control = listen(
            ChannelKind::Control,
            SocketAddr::new(ip, config.control_port),
            CHANNEL_BACKLOG,
        )?;
        let audio = listen(ChannelKind::Audio, SocketAddr::new(ip, config.audio_port), CHANNEL_BACKLOG)?;
        let web = if config.web_enabled {
            Some(listen(ChannelKind::Web, SocketAddr::new(ip, config.web_port), WEB_BACKLOG)?)
        } else {
            None
        };

        Ok(Self {
            config,
            video,
            control,
            audio,
            web,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// A cloneable handle that stops the session from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Actual bound address of a channel (useful with port 0).
    pub fn local_addr(&self, channel: ChannelKind) -> Option<SocketAddr> {
        let listener = match channel {
            ChannelKind::Video => &self.video,
            ChannelKind::Control => &self.control,
            ChannelKind::Audio => &self.audio,
            ChannelKind::Web => self.web.as_ref()?,
        };
        listener.local_addr().ok()
    }

    /// Start the bridge, accept one viewer, and spawn the channel workers.
    ///
    /// Returns once all three channels are connected, or early if the
    /// session is stopped while waiting.
    pub async fn run(self, parts: SessionParts) -> Result<SessionHandle, TilecastError> {
        let SessionServer {
            config,
            video,
            control,
            audio,
            web,
            running,
        } = self;

        let mut handle = SessionHandle {
            running: Arc::clone(&running),
            viewer_left: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            bridge: None,
        };

        let snapshots = web.as_ref().map(|_| SharedFrameCell::new());
        if let (Some(listener), Some(cell)) = (web, snapshots.clone()) {
            let flag = Arc::clone(&running);
            handle.bridge = Some(tokio::spawn(async move {
                if let Err(e) = bridge::serve(listener, cell, flag).await {
                    error!("MJPEG bridge failed: {e}");
                }
            }));
        }

        info!(
            "waiting for viewer on video {}, control {}, audio {}",
            config.video_port, config.control_port, config.audio_port
        );
        let accepted = tokio::try_join!(
            accept_one(&video, ChannelKind::Video, &running),
            accept_one(&control, ChannelKind::Control, &running),
            accept_one(&audio, ChannelKind::Audio, &running),
        )?;
        let (Some(video_stream), Some(control_stream), Some(audio_stream)) = accepted else {
            info!("session stopped before a viewer connected");
            return Ok(handle);
        };
        drop((video, control, audio));

        let SessionParts {
            frames,
            mut injector,
            audio_source,
            audio_sink,
        } = parts;

        // Video.
        let pipeline = CapturePipeline::new(config.codec.build(), config.pipeline);
        let mut capture = CaptureLoop::new(frames, pipeline, snapshots, config.capture);
        let flag = Arc::clone(&running);
        let io_timeout = config.io_timeout;
        handle.spawn("capture", async move {
            let mut writer = VideoWriter::new(video_stream, io_timeout);
            match capture.run(&mut writer, &flag).await {
                Ok(summary) => info!("capture loop finished: {summary:?}"),
                Err(e) => error!("capture loop ended: {e}"),
            }
        });

        // Control.
        let flag = Arc::clone(&running);
        let viewer_left = Arc::clone(&handle.viewer_left);
        handle.spawn("control", async move {
            match run_control_loop(control_stream, injector.as_mut(), &flag).await {
                Ok(n) => {
                    info!("control loop finished after {n} events");
                    if flag.load(Ordering::SeqCst) {
                        viewer_left.store(true, Ordering::SeqCst);
                    }
                }
                Err(e) => error!("control loop ended: {e}"),
            }
        });

        // Audio, one task per direction.
        let (audio_read, audio_write) = audio_stream.into_split();
        if let Some(mut source) = audio_source {
            let flag = Arc::clone(&running);
            handle.spawn("audio-capture", async move {
                match run_audio_capture(audio_write, source.as_mut(), &flag, io_timeout).await {
                    Ok(stats) => info!("audio capture finished: {stats:?}"),
                    Err(e) => error!("audio capture ended: {e}"),
                }
            });
        }
        let flag = Arc::clone(&running);
        match audio_sink {
            Some(mut sink) => handle.spawn("audio-playback", async move {
                match run_audio_playback(audio_read, sink.as_mut(), &flag).await {
                    Ok(stats) => info!("audio playback finished: {stats:?}"),
                    Err(e) => error!("audio playback ended: {e}"),
                }
            }),
            None => handle.spawn("audio-drain", async move {
                match run_audio_drain(audio_read, &flag).await {
                    Ok(stats) => debug!("audio drain finished: {stats:?}"),
                    Err(e) => error!("audio drain ended: {e}"),
                }
            }),
        }

        Ok(handle)
    }
}

fn listen(channel: ChannelKind, addr: SocketAddr, backlog: u32) -> Result<TcpListener, TilecastError> {
    let bind = || -> std::io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        #[cfg(not(windows))]
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(backlog)
    };
    let listener = bind().map_err(|source| TilecastError::Bind {
        channel,
        addr,
        source,
    })?;
    info!("{channel} listener bound on {addr}");
    Ok(listener)
}

/// Accept a single peer, or `None` if the session stops first.
async fn accept_one(
    listener: &TcpListener,
    channel: ChannelKind,
    running: &Arc<AtomicBool>,
) -> Result<Option<TcpStream>, TilecastError> {
    let accepted = tokio::select! {
        result = listener.accept() => result,
        _ = wait_for_stop(running) => return Ok(None),
    };
    let (stream, peer) = accepted?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("could not disable Nagle on {channel} socket: {e}");
    }
    info!("{channel} channel connected from {peer}");
    Ok(Some(stream))
}

// ── SessionHandle ────────────────────────────────────────────────

/// Running session. Dropping it does not stop anything; call
/// [`shutdown`](Self::shutdown).
pub struct SessionHandle {
    running: Arc<AtomicBool>,
    viewer_left: Arc<AtomicBool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    bridge: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.workers.push((name, tokio::spawn(task)));
    }

    /// Names of the channel workers started for this session.
    pub fn worker_names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|(name, _)| *name).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once the capture worker has returned, the viewer has
    /// closed its control connection, or the running flag is cleared.
    ///
    /// A corrupt control stream or an audio worker ending does not end
    /// the session.
    pub async fn finished(&self) {
        loop {
            let capture_done = self
                .workers
                .iter()
                .any(|(name, h)| *name == "capture" && h.is_finished());
            if !self.is_running() || capture_done || self.viewer_left.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(super::STOP_POLL_INTERVAL).await;
        }
    }

    /// Clear the running flag and join every task.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        for (name, task) in self.workers {
            if let Err(e) = task.await {
                error!("{name} worker panicked: {e}");
            }
        }
        if let Some(bridge) = self.bridge {
            if let Err(e) = bridge.await {
                error!("bridge task panicked: {e}");
            }
        }
        info!("session shut down");
    }
}

// ── Tests ────────────────────────────────────────────────────────
