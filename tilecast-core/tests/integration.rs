//! Integration tests: a full server/viewer session over loopback TCP,
//! the exact video wire bytes for a known frame, and the MJPEG bridge.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tilecast_core::pipeline::capture::CapturePipelineConfig;
use tilecast_core::protocol::video::VideoReader;
use tilecast_core::session::CaptureLoopConfig;
use tilecast_core::{
    AudioPacket, AudioSink, AudioSource, CapturePipeline, ChannelKind, CodecKind, ControlEvent,
    Edge, Frame, FrameSource, InputInjector, MouseButton, PixelFormat, SessionConfig,
    SessionParts, SessionServer, SubmitOutcome, TileCodec, TilecastError, ViewerConfig,
    ViewerSession,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// ── Fakes ────────────────────────────────────────────────────────

/// Alternates between two solid colours so every cycle has changes.
struct BlinkingScreen {
    tick: u32,
}

impl FrameSource for BlinkingScreen {
    fn capture_full_frame(&mut self) -> Result<Frame, TilecastError> {
        self.tick += 1;
        let fill = if self.tick % 2 == 0 { 0x20 } else { 0xC0 };
        Ok(Frame::filled(96, 64, PixelFormat::Bgra8, fill))
    }
}

#[derive(Clone, Default)]
struct RecordingInjector {
    events: Arc<Mutex<Vec<ControlEvent>>>,
}

impl InputInjector for RecordingInjector {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), TilecastError> {
        self.events.lock().unwrap().push(ControlEvent::CursorMove { x, y });
        Ok(())
    }

    fn button_event(
        &mut self,
        button: MouseButton,
        edge: Edge,
        x: i32,
        y: i32,
    ) -> Result<(), TilecastError> {
        self.events
            .lock()
            .unwrap()
            .push(ControlEvent::ButtonEdge { button, edge, x, y });
        Ok(())
    }

    fn key_event(&mut self, edge: Edge, vk: u16) -> Result<(), TilecastError> {
        self.events.lock().unwrap().push(ControlEvent::KeyEdge { edge, vk });
        Ok(())
    }
}

/// Emits one packet, then nothing.
struct OneShotMic {
    packet: Option<Bytes>,
}

impl AudioSource for OneShotMic {
    fn next_packet(&mut self) -> Result<Option<AudioPacket>, TilecastError> {
        Ok(self.packet.take().map(|data| AudioPacket { data, silent: false }))
    }
}

/// Always has another loud 64 KiB buffer ready; counts how many were taken.
#[derive(Clone, Default)]
struct EndlessMic {
    pulls: Arc<AtomicU64>,
}

impl AudioSource for EndlessMic {
    fn next_packet(&mut self) -> Result<Option<AudioPacket>, TilecastError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(AudioPacket {
            data: Bytes::from(vec![0x11; 64 * 1024]),
            silent: false,
        }))
    }
}

#[derive(Clone, Default)]
struct RecordingSpeaker {
    played: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl AudioSink for RecordingSpeaker {
    fn submit(&mut self, pcm: &[u8]) -> Result<SubmitOutcome, TilecastError> {
        self.played.lock().unwrap().push(pcm.to_vec());
        Ok(SubmitOutcome::Accepted)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn loopback_session_config() -> SessionConfig {
    SessionConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        video_port: 0,
        control_port: 0,
        web_port: 0,
        audio_port: 0,
        pipeline: CapturePipelineConfig {
            tile_width: 32,
            tile_height: 32,
            ..Default::default()
        },
        capture: CaptureLoopConfig {
            fps: 60,
            snapshot_every: 1,
            snapshot_quality: 85,
        },
        ..Default::default()
    }
}

/// Poll `check` until it holds or `limit` elapses.
async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ── Wire contract ────────────────────────────────────────────────

#[tokio::test]
async fn test_single_tile_change_exact_bytes() {
    /// Returns a fixed 500-byte payload for every tile.
    struct FixedCodec;

    impl TileCodec for FixedCodec {
        fn encode(&self, _region: &Frame, _quality: u8) -> Result<Vec<u8>, TilecastError> {
            Ok(vec![0x5A; 500])
        }

        fn decode(&self, _payload: &[u8]) -> Result<Frame, TilecastError> {
            Err(TilecastError::Codec("unused".into()))
        }
    }

    let mut pipeline = CapturePipeline::new(Box::new(FixedCodec), CapturePipelineConfig::default());

    // Prime the table with a uniform screen; the first pass sends everything.
    let base = Frame::filled(1024, 768, PixelFormat::Bgra8, 0x11);
    let (first, _) = pipeline.process(&base);
    assert_eq!(first.tiles.len(), 12);

    // Change one pixel inside the tile at (256, 256).
    let mut next = base.clone();
    let off = 300 * next.stride() + 300 * 4;
    next.data[off] = 0xEE;
    let (change_set, stats) = pipeline.process(&next);
    assert_eq!(stats.dirty, 1);

    let bytes = change_set.to_bytes();
    let mut expected = Vec::new();
    for word in [0x4953_5332u32, 1024, 768, 256, 256, 1, 256, 256, 256, 256, 500] {
        expected.extend_from_slice(&word.to_le_bytes());
    }
    expected.extend_from_slice(&[0x5A; 500]);
    assert_eq!(bytes.len(), 544);
    assert_eq!(&bytes[..], &expected[..]);

    let mut reader = VideoReader::new(&bytes[..]);
    let received = reader.next_change_set().await.unwrap().unwrap();
    assert_eq!(received.tiles.len(), 1);
    assert_eq!((received.tiles[0].x, received.tiles[0].y), (256, 256));
}

// ── Full session ─────────────────────────────────────────────────

#[tokio::test]
async fn test_full_session_over_loopback() {
    let server = SessionServer::bind(loopback_session_config()).unwrap();
    let video_port = server.local_addr(ChannelKind::Video).unwrap().port();
    let control_port = server.local_addr(ChannelKind::Control).unwrap().port();
    let audio_port = server.local_addr(ChannelKind::Audio).unwrap().port();
    let web_addr = server.local_addr(ChannelKind::Web).unwrap();

    let injector = RecordingInjector::default();
    let server_speaker = RecordingSpeaker::default();
    let parts = SessionParts {
        frames: Box::new(BlinkingScreen { tick: 0 }),
        injector: Box::new(injector.clone()),
        audio_source: Some(Box::new(OneShotMic {
            packet: Some(Bytes::from_static(&[1, 2, 3, 4])),
        })),
        audio_sink: Some(Box::new(server_speaker.clone())),
    };
    let server_task = tokio::spawn(server.run(parts));

    let viewer_speaker = RecordingSpeaker::default();
    let viewer = ViewerSession::connect(
        &ViewerConfig {
            server: "127.0.0.1".into(),
            video_port,
            control_port,
            audio_port,
            codec: CodecKind::Jpeg,
            ..Default::default()
        },
        Some(Box::new(OneShotMic {
            packet: Some(Bytes::from_static(&[9, 9])),
        })),
        Some(Box::new(viewer_speaker.clone())),
    )
    .await
    .unwrap();

    let handle = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server never finished accepting")
        .unwrap()
        .unwrap();
    assert_eq!(
        handle.worker_names(),
        vec!["capture", "control", "audio-capture", "audio-playback"]
    );

    // Video reaches the canvas.
    let canvas = viewer.canvas();
    assert!(
        eventually(Duration::from_secs(5), || {
            let canvas = canvas.lock().unwrap();
            canvas.width() == 96 && canvas.tiles_applied() >= 6
        })
        .await
    );

    // Control reaches the injector.
    let control = viewer.control();
    control
        .send(ControlEvent::CursorMove { x: 10, y: 20 })
        .await
        .unwrap();
    control
        .send(ControlEvent::KeyEdge {
            edge: Edge::Down,
            vk: 0x41,
        })
        .await
        .unwrap();
    assert!(
        eventually(Duration::from_secs(5), || injector.events.lock().unwrap().len() == 2).await
    );
    assert_eq!(
        injector.events.lock().unwrap()[0],
        ControlEvent::CursorMove { x: 10, y: 20 }
    );

    // Audio flows both ways.
    assert!(
        eventually(Duration::from_secs(5), || {
            !viewer_speaker.played.lock().unwrap().is_empty()
                && !server_speaker.played.lock().unwrap().is_empty()
        })
        .await
    );
    assert_eq!(viewer_speaker.played.lock().unwrap()[0], vec![1, 2, 3, 4]);
    assert_eq!(server_speaker.played.lock().unwrap()[0], vec![9, 9]);

    // The bridge has a snapshot to serve.
    let mut http = TcpStream::connect(web_addr).await.unwrap();
    http.write_all(b"GET /stream HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    while !String::from_utf8_lossy(&seen).contains("Content-Type: image/jpeg") {
        let n = tokio::time::timeout(Duration::from_secs(5), http.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "bridge closed the stream");
        seen.extend_from_slice(&buf[..n]);
    }
    drop(http);

    viewer.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("server shutdown hung");
}

#[tokio::test]
async fn test_stream_headers_before_first_snapshot() {
    let mut config = loopback_session_config();
    config.capture.snapshot_every = 1_000_000;
    let server = SessionServer::bind(config).unwrap();
    let web_addr = server.local_addr(ChannelKind::Web).unwrap();
    let stop = server.stop_handle();

    let injector = RecordingInjector::default();
    let parts = SessionParts {
        frames: Box::new(BlinkingScreen { tick: 0 }),
        injector: Box::new(injector),
        audio_source: None,
        audio_sink: None,
    };
    // Nobody connects to the channels; only the bridge is live.
    let server_task = tokio::spawn(server.run(parts));

    let mut http = TcpStream::connect(web_addr).await.unwrap();
    http.write_all(b"GET /stream HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&seen).contains("\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), http.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        seen.extend_from_slice(&buf[..n]);
    }
    let head = String::from_utf8_lossy(&seen);
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(head.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(!head.contains("--frame"));
    drop(http);

    stop.store(false, Ordering::SeqCst);
    let handle = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(handle.worker_names().is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_control_stream_leaves_video_running() {
    let server = SessionServer::bind(loopback_session_config()).unwrap();
    let video = server.local_addr(ChannelKind::Video).unwrap();
    let control = server.local_addr(ChannelKind::Control).unwrap();
    let audio = server.local_addr(ChannelKind::Audio).unwrap();

    let injector = RecordingInjector::default();
    let parts = SessionParts {
        frames: Box::new(BlinkingScreen { tick: 0 }),
        injector: Box::new(injector.clone()),
        audio_source: None,
        audio_sink: None,
    };
    let server_task = tokio::spawn(server.run(parts));

    let mut video = TcpStream::connect(video).await.unwrap();
    let mut control = TcpStream::connect(control).await.unwrap();
    let _audio = TcpStream::connect(audio).await.unwrap();
    let handle = server_task.await.unwrap().unwrap();

    // Undefined tag: the server must close the control socket.
    control.write_all(&[0xEE, 1, 2, 3]).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), control.read(&mut buf))
        .await
        .expect("control socket left open")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(injector.events.lock().unwrap().is_empty());

    // Video keeps flowing regardless.
    let mut header = [0u8; 24];
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), video.read_exact(&mut header))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&header[..4], &0x4953_5332u32.to_le_bytes());
        let count = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);
        for _ in 0..count {
            let mut rec = [0u8; 20];
            video.read_exact(&mut rec).await.unwrap();
            let len = u32::from_le_bytes([rec[16], rec[17], rec[18], rec[19]]);
            let mut payload = vec![0u8; len as usize];
            video.read_exact(&mut payload).await.unwrap();
        }
    }

    drop(video);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_uplink_keeps_flowing_without_server_sink() {
    let server = SessionServer::bind(loopback_session_config()).unwrap();
    let video_port = server.local_addr(ChannelKind::Video).unwrap().port();
    let control_port = server.local_addr(ChannelKind::Control).unwrap().port();
    let audio_port = server.local_addr(ChannelKind::Audio).unwrap().port();

    let parts = SessionParts {
        frames: Box::new(BlinkingScreen { tick: 0 }),
        injector: Box::new(RecordingInjector::default()),
        audio_source: None,
        audio_sink: None,
    };
    let server_task = tokio::spawn(server.run(parts));

    let mic = EndlessMic::default();
    let viewer = ViewerSession::connect(
        &ViewerConfig {
            server: "127.0.0.1".into(),
            video_port,
            control_port,
            audio_port,
            io_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        Some(Box::new(mic.clone())),
        None,
    )
    .await
    .unwrap();

    let handle = server_task.await.unwrap().unwrap();
    assert_eq!(handle.worker_names(), vec!["capture", "control", "audio-drain"]);

    // Well past the point where undrained socket buffers would fill and
    // the write deadline would expire.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let early = mic.pulls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let late = mic.pulls.load(Ordering::SeqCst);
    assert!(early > 64, "uplink barely started: {early} pulls");
    assert!(late > early, "uplink stalled at {early} pulls");

    viewer.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("server shutdown hung");
}
