//! Video channel framing.
//!
//! One change set per capture cycle, written back to back on a dedicated
//! TCP connection. There is no outer length envelope and no resync
//! marker beyond the per-set sentinel, so the receiver must consume
//! exactly the bytes each field declares.
//!
//! ## Wire format (all fields little-endian `u32`)
//!
//! **Change set header** (24 bytes):
//! ```text
//! sentinel:     u32  (4)   0x49535332
//! width:        u32  (4)
//! height:       u32  (4)
//! tile_width:   u32  (4)
//! tile_height:  u32  (4)
//! tile_count:   u32  (4)
//! ```
//!
//! **Tile record** (20 byte header + payload), repeated `tile_count` times
//! in scan order:
//! ```text
//! x:            u32  (4)
//! y:            u32  (4)
//! width:        u32  (4)
//! height:       u32  (4)
//! payload_len:  u32  (4)
//! payload:      [u8] (payload_len)
//! ```

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TilecastError;

// ── Constants ────────────────────────────────────────────────────

/// First four bytes of every change set.
pub const VIDEO_SENTINEL: u32 = 0x4953_5332;

/// Largest frame width or height a receiver accepts.
pub const MAX_FRAME_DIMENSION: u32 = 10_000;

/// Largest tile width or height a receiver accepts.
pub const MAX_TILE_DIMENSION: u32 = 1_000;

/// Largest number of tile records in one change set.
pub const MAX_TILE_COUNT: u32 = 10_000;

/// Largest single tile payload a receiver will read or skip.
pub const MAX_TILE_PAYLOAD: u32 = 100 * 1024 * 1024;

fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn bounded(field: &'static str, value: u32, max: u32) -> Result<(), TilecastError> {
    if value > max {
        return Err(TilecastError::HeaderOutOfBounds { field, value, max });
    }
    Ok(())
}

// ── VideoHeader ──────────────────────────────────────────────────

/// Per-change-set header, sentinel included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_count: u32,
}

impl VideoHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 24;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&VIDEO_SENTINEL.to_le_bytes());
        buf[4..8].copy_from_slice(&self.width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.tile_width.to_le_bytes());
        buf[16..20].copy_from_slice(&self.tile_height.to_le_bytes());
        buf[20..24].copy_from_slice(&self.tile_count.to_le_bytes());
        buf
    }

    /// Deserialize from bytes, checking the sentinel.
    pub fn decode(data: &[u8]) -> Result<Self, TilecastError> {
        if data.len() < Self::SIZE {
            return Err(TilecastError::ShortRead {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        let sentinel = le_u32(data, 0);
        if sentinel != VIDEO_SENTINEL {
            return Err(TilecastError::BadSentinel(sentinel));
        }
        Ok(Self {
            width: le_u32(data, 4),
            height: le_u32(data, 8),
            tile_width: le_u32(data, 12),
            tile_height: le_u32(data, 16),
            tile_count: le_u32(data, 20),
        })
    }

    /// Check every declared size against its sanity bound.
    pub fn validate(&self) -> Result<(), TilecastError> {
        bounded("frame width", self.width, MAX_FRAME_DIMENSION)?;
        bounded("frame height", self.height, MAX_FRAME_DIMENSION)?;
        bounded("tile width", self.tile_width, MAX_TILE_DIMENSION)?;
        bounded("tile height", self.tile_height, MAX_TILE_DIMENSION)?;
        bounded("tile count", self.tile_count, MAX_TILE_COUNT)?;
        Ok(())
    }
}

// ── TileRecordHeader ─────────────────────────────────────────────

/// The fixed part of one tile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRecordHeader {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub payload_len: u32,
}

impl TileRecordHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 20;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.x.to_le_bytes());
        buf[4..8].copy_from_slice(&self.y.to_le_bytes());
        buf[8..12].copy_from_slice(&self.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, TilecastError> {
        if data.len() < Self::SIZE {
            return Err(TilecastError::ShortRead {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            x: le_u32(data, 0),
            y: le_u32(data, 4),
            width: le_u32(data, 8),
            height: le_u32(data, 12),
            payload_len: le_u32(data, 16),
        })
    }

    /// Why this record cannot be applied to a frame described by
    /// `header`, or `None` if it fits.
    pub fn geometry_fault(&self, header: &VideoHeader) -> Option<&'static str> {
        if self.width == 0 || self.height == 0 {
            return Some("empty tile");
        }
        if self.width > header.tile_width || self.height > header.tile_height {
            return Some("tile larger than announced tile size");
        }
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        if right > header.width as u64 || bottom > header.height as u64 {
            return Some("tile outside frame");
        }
        None
    }
}

// ── EncodedTile / ChangeSet ──────────────────────────────────────

/// A changed tile with its compressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub payload: Bytes,
}

impl EncodedTile {
    fn record_header(&self) -> TileRecordHeader {
        TileRecordHeader {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            payload_len: self.payload.len() as u32,
        }
    }
}

/// Every tile that changed in one capture cycle, in scan order.
///
/// Single use: once written, a change set is dropped, never resent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles: Vec<EncodedTile>,
}

impl ChangeSet {
    pub fn new(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            tiles: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn header(&self) -> VideoHeader {
        VideoHeader {
            width: self.width,
            height: self.height,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            tile_count: self.tiles.len() as u32,
        }
    }

    /// Exact number of bytes [`encode_into`](Self::encode_into) appends.
    pub fn encoded_len(&self) -> usize {
        VideoHeader::SIZE
            + self
                .tiles
                .iter()
                .map(|t| TileRecordHeader::SIZE + t.payload.len())
                .sum::<usize>()
    }

    /// Append the wire form of this change set to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header().encode());
        for tile in &self.tiles {
            dst.put_slice(&tile.record_header().encode());
            dst.put_slice(&tile.payload);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

// ── VideoWriter ──────────────────────────────────────────────────

/// Sender half of the video channel.
///
/// Each change set is serialised into one buffer and written with a
/// deadline. Any error or timeout is fatal for the channel; the peer
/// must reconnect.
pub struct VideoWriter<W> {
    inner: W,
    timeout: Duration,
    buf: BytesMut,
    bytes_sent: u64,
}

impl<W: AsyncWrite + Unpin> VideoWriter<W> {
    pub fn new(inner: W, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            buf: BytesMut::new(),
            bytes_sent: 0,
        }
    }

    /// Total bytes written since construction.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Write one change set in full.
    pub async fn send(&mut self, change_set: &ChangeSet) -> Result<usize, TilecastError> {
        self.buf.clear();
        change_set.encode_into(&mut self.buf);

        let (inner, buf) = (&mut self.inner, &self.buf);
        let write = async move {
            inner.write_all(buf).await?;
            inner.flush().await
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| TilecastError::Timeout(self.timeout))??;

        let len = self.buf.len();
        self.bytes_sent += len as u64;
        Ok(len)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ── VideoReader ──────────────────────────────────────────────────

/// A change set as seen by the receiver.
#[derive(Debug, Clone)]
pub struct ReceivedChangeSet {
    pub header: VideoHeader,
    /// Tiles that passed validation, in wire order.
    pub tiles: Vec<EncodedTile>,
    /// Records skipped as corrupt.
    pub skipped: u32,
}

/// Receiver half of the video channel.
///
/// Corrupt tile records are skipped when the stream framing still makes
/// sense (their payload is read and discarded); a bad header or a
/// payload size too large to skip ends the stream.
pub struct VideoReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> VideoReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next change set. `Ok(None)` means the peer closed the
    /// connection cleanly between change sets.
    pub async fn next_change_set(&mut self) -> Result<Option<ReceivedChangeSet>, TilecastError> {
        let mut head = [0u8; VideoHeader::SIZE];
        let filled = self.fill(&mut head).await?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < head.len() {
            return Err(TilecastError::ShortRead {
                needed: head.len(),
                available: filled,
            });
        }

        let header = VideoHeader::decode(&head)?;
        header.validate()?;

        let mut tiles = Vec::with_capacity(header.tile_count as usize);
        let mut skipped = 0;

        for index in 0..header.tile_count {
            let mut rec = [0u8; TileRecordHeader::SIZE];
            self.read_exact(&mut rec).await?;
            let record = TileRecordHeader::decode(&rec)?;

            if record.payload_len > MAX_TILE_PAYLOAD {
                return Err(TilecastError::TilePayloadTooLarge {
                    size: record.payload_len,
                    max: MAX_TILE_PAYLOAD,
                });
            }
            if record.payload_len == 0 {
                tracing::warn!("skipping tile {index} at ({}, {}): empty payload", record.x, record.y);
                skipped += 1;
                continue;
            }
            if let Some(fault) = record.geometry_fault(&header) {
                tracing::warn!(
                    "skipping tile {index} at ({}, {}) {}x{}: {fault}",
                    record.x,
                    record.y,
                    record.width,
                    record.height
                );
                self.discard(record.payload_len).await?;
                skipped += 1;
                continue;
            }

            let mut payload = vec![0u8; record.payload_len as usize];
            self.read_exact(&mut payload).await?;
            tiles.push(EncodedTile {
                x: record.x,
                y: record.y,
                width: record.width,
                height: record.height,
                payload: Bytes::from(payload),
            });
        }

        Ok(Some(ReceivedChangeSet {
            header,
            tiles,
            skipped,
        }))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Read until `buf` is full or the peer closes; returns bytes read.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize, TilecastError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TilecastError> {
        let filled = self.fill(buf).await?;
        if filled < buf.len() {
            return Err(TilecastError::ShortRead {
                needed: buf.len(),
                available: filled,
            });
        }
        Ok(())
    }

    async fn discard(&mut self, len: u32) -> Result<(), TilecastError> {
        let copied = tokio::io::copy(&mut (&mut self.inner).take(len as u64), &mut tokio::io::sink()).await?;
        if copied < len as u64 {
            return Err(TilecastError::ShortRead {
                needed: len as usize,
                available: copied as usize,
            });
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x: u32, y: u32, w: u32, h: u32, payload: &[u8]) -> EncodedTile {
        EncodedTile {
            x,
            y,
            width: w,
            height: h,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn raw_record(x: u32, y: u32, w: u32, h: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = TileRecordHeader {
            x,
            y,
            width: w,
            height: h,
            payload_len: payload.len() as u32,
        }
        .encode()
        .to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn raw_header(w: u32, h: u32, tw: u32, th: u32, count: u32) -> Vec<u8> {
        VideoHeader {
            width: w,
            height: h,
            tile_width: tw,
            tile_height: th,
            tile_count: count,
        }
        .encode()
        .to_vec()
    }

    #[test]
    fn concrete_layout_matches_wire_contract() {
        let payload: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let mut cs = ChangeSet::new(1024, 768, 256, 256);
        cs.tiles.push(tile(256, 256, 256, 256, &payload));

        let bytes = cs.to_bytes();

        let mut expected = Vec::new();
        for word in [0x4953_5332u32, 1024, 768, 256, 256, 1, 256, 256, 256, 256, 500] {
            expected.extend_from_slice(&word.to_le_bytes());
        }
        expected.extend_from_slice(&payload);

        assert_eq!(bytes.len(), 24 + 20 + 500);
        assert_eq!(&bytes[..], &expected[..]);
        assert_eq!(&bytes[..4], &[0x32, 0x53, 0x53, 0x49]);
    }

    #[tokio::test]
    async fn wire_roundtrip_preserves_order_and_payloads() {
        let mut cs = ChangeSet::new(600, 300, 256, 256);
        cs.tiles.push(tile(0, 0, 256, 256, b"first"));
        cs.tiles.push(tile(512, 0, 88, 256, b"second"));
        cs.tiles.push(tile(256, 256, 256, 44, b"third"));

        let bytes = cs.to_bytes();
        let mut reader = VideoReader::new(&bytes[..]);
        let received = reader.next_change_set().await.unwrap().unwrap();

        assert_eq!(received.header, cs.header());
        assert_eq!(received.tiles, cs.tiles);
        assert_eq!(received.skipped, 0);
        assert!(reader.next_change_set().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_handles_fragmented_delivery() {
        let mut cs = ChangeSet::new(512, 256, 256, 256);
        cs.tiles.push(tile(256, 0, 256, 256, &[7u8; 64]));
        let bytes = cs.to_bytes();

        let mock = tokio_test::io::Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..30])
            .read(&bytes[30..50])
            .read(&bytes[50..])
            .build();

        let mut reader = VideoReader::new(mock);
        let received = reader.next_change_set().await.unwrap().unwrap();
        assert_eq!(received.tiles.len(), 1);
        assert_eq!(received.tiles[0].payload.len(), 64);
    }

    #[tokio::test]
    async fn bad_sentinel_is_fatal() {
        let mut bytes = raw_header(64, 64, 64, 64, 0);
        bytes[0] = 0;
        let mut reader = VideoReader::new(&bytes[..]);
        let err = reader.next_change_set().await.unwrap_err();
        assert!(matches!(err, TilecastError::BadSentinel(_)));
    }

    #[tokio::test]
    async fn oversized_header_rejected_before_allocation() {
        let bytes = raw_header(64, 64, 64, 64, 50_000);
        let mut reader = VideoReader::new(&bytes[..]);
        let err = reader.next_change_set().await.unwrap_err();
        assert!(matches!(
            err,
            TilecastError::HeaderOutOfBounds {
                field: "tile count",
                ..
            }
        ));

        let bytes = raw_header(20_000, 64, 64, 64, 1);
        let mut reader = VideoReader::new(&bytes[..]);
        assert!(reader.next_change_set().await.is_err());
    }

    #[tokio::test]
    async fn corrupt_tiles_skipped_and_stream_stays_framed() {
        let mut bytes = raw_header(512, 512, 256, 256, 4);
        // Out of frame: payload must be discarded to stay in sync.
        bytes.extend(raw_record(400, 0, 256, 256, b"junk-junk"));
        // Zero payload: nothing to consume.
        bytes.extend(raw_record(0, 0, 256, 256, b""));
        // Larger than the announced tile size.
        bytes.extend(raw_record(0, 256, 300, 256, b"big"));
        // Valid.
        bytes.extend(raw_record(256, 256, 256, 256, b"good"));
        // A second, well-formed change set follows.
        bytes.extend(raw_header(512, 512, 256, 256, 1));
        bytes.extend(raw_record(0, 0, 256, 256, b"next"));

        let mut reader = VideoReader::new(&bytes[..]);

        let first = reader.next_change_set().await.unwrap().unwrap();
        assert_eq!(first.skipped, 3);
        assert_eq!(first.tiles.len(), 1);
        assert_eq!(&first.tiles[0].payload[..], b"good");

        let second = reader.next_change_set().await.unwrap().unwrap();
        assert_eq!(&second.tiles[0].payload[..], b"next");
    }

    #[tokio::test]
    async fn huge_payload_ends_stream() {
        let mut bytes = raw_header(512, 512, 256, 256, 1);
        bytes.extend(
            TileRecordHeader {
                x: 0,
                y: 0,
                width: 256,
                height: 256,
                payload_len: MAX_TILE_PAYLOAD + 1,
            }
            .encode(),
        );
        let mut reader = VideoReader::new(&bytes[..]);
        let err = reader.next_change_set().await.unwrap_err();
        assert!(matches!(err, TilecastError::TilePayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn truncated_change_set_is_short_read() {
        let mut cs = ChangeSet::new(256, 256, 256, 256);
        cs.tiles.push(tile(0, 0, 256, 256, &[1u8; 32]));
        let bytes = cs.to_bytes();

        let mut reader = VideoReader::new(&bytes[..bytes.len() - 1]);
        let err = reader.next_change_set().await.unwrap_err();
        assert!(matches!(err, TilecastError::ShortRead { .. }));
    }

    #[tokio::test]
    async fn writer_emits_exact_bytes() {
        let mut cs = ChangeSet::new(1024, 768, 256, 256);
        cs.tiles.push(tile(256, 256, 256, 256, &[0xAB; 500]));
        let expected = cs.to_bytes();

        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let mut writer = VideoWriter::new(mock, Duration::from_secs(1));
        let written = writer.send(&cs).await.unwrap();

        assert_eq!(written, 544);
        assert_eq!(writer.bytes_sent(), 544);
    }
}
