//! Audio channel framing: `len: u32` (little-endian) then `len` bytes of
//! raw PCM, repeated for the life of the connection. Both directions use
//! the same framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TilecastError;

/// Largest PCM packet a receiver accepts.
pub const MAX_AUDIO_PACKET: u32 = 1_000_000;

const LEN_PREFIX: usize = 4;

/// `tokio_util` codec for audio packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioCodec;

impl Decoder for AudioCodec {
    type Item = Bytes;
    type Error = TilecastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if len == 0 || len > MAX_AUDIO_PACKET {
            return Err(TilecastError::InvalidAudioLength(len));
        }

        let total = LEN_PREFIX + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        Ok(Some(src.split_to(len as usize).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(TilecastError::ShortRead {
                needed: if src.len() < LEN_PREFIX {
                    LEN_PREFIX
                } else {
                    LEN_PREFIX + u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize
                },
                available: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for AudioCodec {
    type Error = TilecastError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.len() as u32;
        if item.is_empty() || item.len() > MAX_AUDIO_PACKET as usize {
            return Err(TilecastError::InvalidAudioLength(len));
        }
        dst.reserve(LEN_PREFIX + item.len());
        dst.put_u32_le(len);
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_length_prefix() {
        let mut buf = BytesMut::new();
        AudioCodec.encode(Bytes::from_static(&[9, 8, 7]), &mut buf).unwrap();
        assert_eq!(&buf[..], &[3, 0, 0, 0, 9, 8, 7]);

        let packet = AudioCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&packet[..], &[9, 8, 7]);
        assert!(buf.is_empty());
    }

    #[test]
    fn zero_length_is_corrupt() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(
            AudioCodec.decode(&mut buf),
            Err(TilecastError::InvalidAudioLength(0))
        ));
    }

    #[test]
    fn oversized_length_is_corrupt() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_AUDIO_PACKET + 1);
        assert!(matches!(
            AudioCodec.decode(&mut buf),
            Err(TilecastError::InvalidAudioLength(_))
        ));
    }

    #[test]
    fn partial_packet_waits() {
        let mut buf = BytesMut::from(&[4u8, 0, 0, 0, 1, 2][..]);
        assert!(AudioCodec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[3, 4]);
        assert_eq!(&AudioCodec.decode(&mut buf).unwrap().unwrap()[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn truncated_at_eof_is_short_read() {
        let mut buf = BytesMut::from(&[4u8, 0, 0, 0, 1][..]);
        assert!(matches!(
            AudioCodec.decode_eof(&mut buf),
            Err(TilecastError::ShortRead {
                needed: 8,
                available: 5
            })
        ));
    }

    #[test]
    fn encoder_refuses_empty_packet() {
        let mut buf = BytesMut::new();
        assert!(AudioCodec.encode(Bytes::new(), &mut buf).is_err());
    }
}
