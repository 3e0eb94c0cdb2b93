//! Audio device backends.
//!
//! Samples travel as interleaved little-endian `f32` in the device's
//! native rate and channel count. Both ends use their default devices,
//! so mismatched formats are not converted.
//!
//! `cpal::Stream` is not `Send`, so every stream lives on its own OS
//! thread and talks to the session through a queue.

use crate::error::TilecastError;
#[cfg(target_os = "windows")]
use crate::session::audio::{AudioPacket, AudioSink, AudioSource, SubmitOutcome};

/// Bytes per wire sample.
pub const SAMPLE_BYTES: usize = 4;

pub fn samples_to_bytes<I>(samples: I) -> Vec<u8>
where
    I: IntoIterator<Item = f32>,
{
    let samples = samples.into_iter();
    let mut out = Vec::with_capacity(samples.size_hint().0 * SAMPLE_BYTES);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Trailing bytes that do not form a whole sample are dropped.
pub fn bytes_to_samples(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(SAMPLE_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(target_os = "windows")]
pub use windows_impl::{DeviceSink, DeviceSource};

#[cfg(not(target_os = "windows"))]
pub use fallback::{DeviceSink, DeviceSource};

// ── Windows implementation (WASAPI via cpal) ─────────────────────

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError};
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use std::time::Duration;

    use bytes::Bytes;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SizedSample};
    use tracing::{info, warn};

    use super::*;

    const DEVICE_POLL: Duration = Duration::from_millis(50);
    /// Captured buffers queued before new ones are dropped.
    const CAPTURE_QUEUE: usize = 64;
    /// Playback buffering, in milliseconds of audio.
    const PLAYBACK_BUFFER_MS: usize = 500;

    fn audio_err(what: &str, e: impl std::fmt::Display) -> TilecastError {
        TilecastError::Audio(format!("{what}: {e}"))
    }

    /// Owns a running `cpal::Stream` on a dedicated thread.
    struct DeviceThread {
        stop: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl DeviceThread {
        fn spawn<F>(name: &str, build: F) -> Result<Self, TilecastError>
        where
            F: FnOnce() -> Result<cpal::Stream, TilecastError> + Send + 'static,
        {
            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
            let flag = Arc::clone(&stop);

            let handle = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    let started = build().and_then(|stream| {
                        stream.play().map_err(|e| audio_err("could not start stream", e))?;
                        Ok(stream)
                    });
                    let stream = match started {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    while !flag.load(Ordering::SeqCst) {
                        std::thread::sleep(DEVICE_POLL);
                    }
                    drop(stream);
                })
                .map_err(|e| audio_err("could not spawn device thread", e))?;

            let mut thread = Self {
                stop,
                handle: Some(handle),
            };
            match ready_rx.recv() {
                Ok(Ok(())) => Ok(thread),
                Ok(Err(e)) => {
                    thread.halt();
                    Err(e)
                }
                Err(_) => {
                    thread.halt();
                    Err(TilecastError::Audio("device thread exited during start-up".into()))
                }
            }
        }

        fn halt(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    impl Drop for DeviceThread {
        fn drop(&mut self) {
            self.halt();
        }
    }

    // ── Capture ──────────────────────────────────────────────────

    /// Pulls buffers from a capture stream.
    pub struct DeviceSource {
        rx: Receiver<Vec<u8>>,
        dropped: Arc<AtomicU64>,
        reported: u64,
        _device: DeviceThread,
    }

    impl DeviceSource {
        /// Loopback capture of whatever the default output device plays.
        pub fn loopback() -> Result<Self, TilecastError> {
            Self::open(true)
        }

        /// The default microphone.
        pub fn microphone() -> Result<Self, TilecastError> {
            Self::open(false)
        }

        fn open(loopback: bool) -> Result<Self, TilecastError> {
            let (tx, rx) = std::sync::mpsc::sync_channel(CAPTURE_QUEUE);
            let dropped = Arc::new(AtomicU64::new(0));
            let counter = Arc::clone(&dropped);

            let device = DeviceThread::spawn("audio-in", move || {
                let host = cpal::default_host();
                let (device, supported) = if loopback {
                    let device = host
                        .default_output_device()
                        .ok_or_else(|| TilecastError::Audio("no output device".into()))?;
                    let cfg = device
                        .default_output_config()
                        .map_err(|e| audio_err("no output config", e))?;
                    (device, cfg)
                } else {
                    let device = host
                        .default_input_device()
                        .ok_or_else(|| TilecastError::Audio("no input device".into()))?;
                    let cfg = device
                        .default_input_config()
                        .map_err(|e| audio_err("no input config", e))?;
                    (device, cfg)
                };
                info!(
                    "audio capture: {} Hz, {} channels, {:?}{}",
                    supported.sample_rate().0,
                    supported.channels(),
                    supported.sample_format(),
                    if loopback { " (loopback)" } else { "" }
                );
                let format = supported.sample_format();
                let config: cpal::StreamConfig = supported.into();
                match format {
                    cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, tx, counter),
                    cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, tx, counter),
                    cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, tx, counter),
                    other => Err(TilecastError::Audio(format!(
                        "unsupported capture sample format {other:?}"
                    ))),
                }
            })?;

            Ok(Self {
                rx,
                dropped,
                reported: 0,
                _device: device,
            })
        }
    }

    fn build_input<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        tx: SyncSender<Vec<u8>>,
        dropped: Arc<AtomicU64>,
    ) -> Result<cpal::Stream, TilecastError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let pcm = samples_to_bytes(data.iter().map(|s| s.to_sample::<f32>()));
                    if let Err(TrySendError::Full(_)) = tx.try_send(pcm) {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                |e| warn!("audio capture stream error: {e}"),
                None,
            )
            .map_err(|e| audio_err("could not open capture stream", e))
    }

    impl AudioSource for DeviceSource {
        fn next_packet(&mut self) -> Result<Option<AudioPacket>, TilecastError> {
            let dropped = self.dropped.load(Ordering::Relaxed);
            if dropped > self.reported {
                warn!("audio capture queue full, {} buffers dropped", dropped - self.reported);
                self.reported = dropped;
            }
            match self.rx.try_recv() {
                Ok(pcm) => Ok(Some(AudioPacket {
                    silent: crate::session::audio::is_silent(&pcm),
                    data: Bytes::from(pcm),
                })),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => {
                    Err(TilecastError::Audio("capture stream closed".into()))
                }
            }
        }
    }

    // ── Playback ─────────────────────────────────────────────────

    /// Feeds a playback stream from a bounded sample queue.
    pub struct DeviceSink {
        queue: Arc<Mutex<VecDeque<f32>>>,
        capacity: usize,
        _device: DeviceThread,
    }

    impl DeviceSink {
        /// The default output device.
        pub fn speakers() -> Result<Self, TilecastError> {
            let host = cpal::default_host();
            let probe = host
                .default_output_device()
                .ok_or_else(|| TilecastError::Audio("no output device".into()))?
                .default_output_config()
                .map_err(|e| audio_err("no output config", e))?;
            let capacity = probe.sample_rate().0 as usize * probe.channels() as usize
                * PLAYBACK_BUFFER_MS
                / 1000;

            let queue = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
            let shared = Arc::clone(&queue);
            let device = DeviceThread::spawn("audio-out", move || {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| TilecastError::Audio("no output device".into()))?;
                let supported = device
                    .default_output_config()
                    .map_err(|e| audio_err("no output config", e))?;
                info!(
                    "audio playback: {} Hz, {} channels, {:?}",
                    supported.sample_rate().0,
                    supported.channels(),
                    supported.sample_format()
                );
                let format = supported.sample_format();
                let config: cpal::StreamConfig = supported.into();
                match format {
                    cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, shared),
                    cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, shared),
                    cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, shared),
                    other => Err(TilecastError::Audio(format!(
                        "unsupported playback sample format {other:?}"
                    ))),
                }
            })?;

            Ok(Self {
                queue,
                capacity: capacity.max(1),
                _device: device,
            })
        }
    }

    fn build_output<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        queue: Arc<Mutex<VecDeque<f32>>>,
    ) -> Result<cpal::Stream, TilecastError>
    where
        T: SizedSample + FromSample<f32>,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| match queue.lock() {
                    Ok(mut queue) => {
                        for out in data.iter_mut() {
                            *out = T::from_sample(queue.pop_front().unwrap_or(0.0));
                        }
                    }
                    Err(_) => {
                        for out in data.iter_mut() {
                            *out = T::EQUILIBRIUM;
                        }
                    }
                },
                |e| warn!("audio playback stream error: {e}"),
                None,
            )
            .map_err(|e| audio_err("could not open playback stream", e))
    }

    impl AudioSink for DeviceSink {
        fn submit(&mut self, pcm: &[u8]) -> Result<SubmitOutcome, TilecastError> {
            let mut samples = bytes_to_samples(pcm);
            let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());

            if samples.len() > self.capacity {
                // Keep the most recent audio.
                let excess = samples.len() - self.capacity;
                samples.drain(..excess);
                queue.clear();
            } else if self.capacity - queue.len() < samples.len() {
                return Ok(SubmitOutcome::Backpressure);
            }
            queue.extend(samples);
            Ok(SubmitOutcome::Accepted)
        }
    }
}

// ── Unsupported platforms ────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
mod fallback {
    use super::TilecastError;
    use crate::session::audio::{AudioPacket, AudioSink, AudioSource, SubmitOutcome};

    fn unsupported() -> TilecastError {
        TilecastError::Audio("audio devices are only available on Windows".into())
    }

    /// Never constructed off Windows.
    pub struct DeviceSource {
        _private: (),
    }

    impl DeviceSource {
        pub fn loopback() -> Result<Self, TilecastError> {
            Err(unsupported())
        }

        pub fn microphone() -> Result<Self, TilecastError> {
            Err(unsupported())
        }
    }

    impl AudioSource for DeviceSource {
        fn next_packet(&mut self) -> Result<Option<AudioPacket>, TilecastError> {
            Err(unsupported())
        }
    }

    /// Never constructed off Windows.
    pub struct DeviceSink {
        _private: (),
    }

    impl DeviceSink {
        pub fn speakers() -> Result<Self, TilecastError> {
            Err(unsupported())
        }
    }

    impl AudioSink for DeviceSink {
        fn submit(&mut self, _pcm: &[u8]) -> Result<SubmitOutcome, TilecastError> {
            Err(unsupported())
        }
    }
}
