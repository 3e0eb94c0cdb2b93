//! Audio channel workers.
//!
//! Audio runs on its own connection, independent of video timing. The
//! capture side drains an [`AudioSource`] onto the socket, skipping
//! silence; the playback side feeds received packets into an
//! [`AudioSink`], polling while the device buffer is full. A peer with
//! no sink still drains the socket so the sender never stalls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::TilecastError;
use crate::protocol::audio::{AudioCodec, MAX_AUDIO_PACKET};
use crate::session::wait_for_stop;

/// Sleep when the source has nothing ready.
pub const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Delay between submit attempts while the sink is full.
pub const BACKPRESSURE_RETRY: Duration = Duration::from_millis(10);

/// Attempts per packet before it is dropped.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 50;

// ── Collaborator traits ──────────────────────────────────────────

/// One buffer of interleaved PCM from the capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub data: Bytes,
    /// The device flagged this buffer as silence.
    pub silent: bool,
}

/// Platform audio capture.
pub trait AudioSource: Send {
    /// Next captured buffer, or `None` if nothing is ready yet.
    fn next_packet(&mut self) -> Result<Option<AudioPacket>, TilecastError>;
}

/// Result of handing a packet to an [`AudioSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Not enough room right now; try again shortly.
    Backpressure,
}

/// Platform audio playback.
pub trait AudioSink: Send {
    fn submit(&mut self, pcm: &[u8]) -> Result<SubmitOutcome, TilecastError>;
}

/// True when every sample byte is zero.
pub fn is_silent(pcm: &[u8]) -> bool {
    pcm.iter().all(|&b| b == 0)
}

/// Counters for one audio worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub packets: u64,
    pub bytes: u64,
    /// Capture side: buffers not sent because they were silent.
    pub silent_skipped: u64,
    /// Playback side: packets dropped after exhausting retries, or
    /// discarded because there is no sink.
    pub dropped: u64,
}

// ── Capture loop ─────────────────────────────────────────────────

/// Pump `source` onto `writer` until `running` clears or a write fails.
pub async fn run_audio_capture<W>(
    writer: W,
    source: &mut dyn AudioSource,
    running: &Arc<AtomicBool>,
    io_timeout: Duration,
) -> Result<AudioStats, TilecastError>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, AudioCodec);
    let mut stats = AudioStats::default();

    while running.load(Ordering::SeqCst) {
        let packet = match source.next_packet()? {
            Some(p) => p,
            None => {
                tokio::time::sleep(IDLE_SLEEP).await;
                continue;
            }
        };

        if packet.data.is_empty() || packet.silent || is_silent(&packet.data) {
            stats.silent_skipped += 1;
            continue;
        }

        let mut offset = 0;
        while offset < packet.data.len() {
            let end = (offset + MAX_AUDIO_PACKET as usize).min(packet.data.len());
            let chunk = packet.data.slice(offset..end);
            tokio::time::timeout(io_timeout, sink.send(chunk))
                .await
                .map_err(|_| TilecastError::Timeout(io_timeout))??;
            stats.packets += 1;
            stats.bytes += (end - offset) as u64;
            offset = end;
        }
    }

    Ok(stats)
}

// ── Playback loop ────────────────────────────────────────────────

/// Feed packets from `reader` into `sink` until the peer closes,
/// `running` clears, or a corrupt length arrives.
pub async fn run_audio_playback<R>(
    reader: R,
    sink: &mut dyn AudioSink,
    running: &Arc<AtomicBool>,
) -> Result<AudioStats, TilecastError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, AudioCodec);
    let mut stats = AudioStats::default();

    while running.load(Ordering::SeqCst) {
        let next = tokio::select! {
            next = frames.next() => next,
            _ = wait_for_stop(running) => break,
        };
        let packet = match next {
            Some(Ok(p)) => p,
            Some(Err(e)) => return Err(e),
            None => {
                debug!("audio peer closed the connection");
                break;
            }
        };

        stats.packets += 1;
        stats.bytes += packet.len() as u64;

        if !submit_with_retry(sink, &packet, running).await? {
            stats.dropped += 1;
            warn!(
                "dropping {} byte audio packet: sink full after {MAX_SUBMIT_ATTEMPTS} attempts",
                packet.len()
            );
        }
    }

    Ok(stats)
}

// ── Drain loop ───────────────────────────────────────────────────

/// Read and discard packets from `reader` until the peer closes or
/// `running` clears. Framing is still checked, so a corrupt length ends
/// the loop with an error.
pub async fn run_audio_drain<R>(
    reader: R,
    running: &Arc<AtomicBool>,
) -> Result<AudioStats, TilecastError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, AudioCodec);
    let mut stats = AudioStats::default();

    while running.load(Ordering::SeqCst) {
        let next = tokio::select! {
            next = frames.next() => next,
            _ = wait_for_stop(running) => break,
        };
        match next {
            Some(Ok(packet)) => {
                stats.packets += 1;
                stats.bytes += packet.len() as u64;
                stats.dropped += 1;
            }
            Some(Err(e)) => return Err(e),
            None => {
                debug!("audio peer closed the connection");
                break;
            }
        }
    }

    Ok(stats)
}

/// Returns `false` if the packet had to be dropped.
async fn submit_with_retry(
    sink: &mut dyn AudioSink,
    pcm: &[u8],
    running: &Arc<AtomicBool>,
) -> Result<bool, TilecastError> {
    for _ in 0..MAX_SUBMIT_ATTEMPTS {
        match sink.submit(pcm)? {
            SubmitOutcome::Accepted => return Ok(true),
            SubmitOutcome::Backpressure => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(BACKPRESSURE_RETRY).await;
            }
        }
    }
    Ok(false)
}

// ── Tests ────────────────────────────────────────────────────────
