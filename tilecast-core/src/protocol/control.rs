//! Control channel: input events from viewer to server.
//!
//! Every message is a one-byte tag followed by a payload whose length is
//! fixed per tag. All integers are little-endian.
//!
//! | tag | event       | payload                                   | bytes |
//! |-----|-------------|-------------------------------------------|-------|
//! | 1   | cursor move | `x: i32`, `y: i32`                        | 8     |
//! | 2   | button down | `button: u8` (1 left, 2 right), `x`, `y`  | 9     |
//! | 3   | button up   | same as tag 2                             | 9     |
//! | 4   | key edge    | `edge: u8` (0 up, 1 down), `vk: u16`      | 3     |
//!
//! A tag outside this table leaves the decoder with no way to find the
//! next message boundary, so it is a fatal stream error. An out-of-range
//! button or edge value inside a well-formed message only drops that one
//! message.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TilecastError;

pub const TAG_CURSOR_MOVE: u8 = 1;
pub const TAG_BUTTON_DOWN: u8 = 2;
pub const TAG_BUTTON_UP: u8 = 3;
pub const TAG_KEY_EDGE: u8 = 4;

/// Payload length for `tag`, or `None` for an undefined tag.
pub fn payload_len(tag: u8) -> Option<usize> {
    match tag {
        TAG_CURSOR_MOVE => Some(8),
        TAG_BUTTON_DOWN | TAG_BUTTON_UP => Some(9),
        TAG_KEY_EDGE => Some(3),
        _ => None,
    }
}

// ── Event types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

impl MouseButton {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(MouseButton::Left),
            2 => Some(MouseButton::Right),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Right => 2,
        }
    }
}

/// Press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Up,
    Down,
}

impl Edge {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Edge::Up),
            1 => Some(Edge::Down),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Edge::Up => 0,
            Edge::Down => 1,
        }
    }
}

/// One input event, in screen coordinates of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    CursorMove {
        x: i32,
        y: i32,
    },
    ButtonEdge {
        button: MouseButton,
        edge: Edge,
        x: i32,
        y: i32,
    },
    KeyEdge {
        edge: Edge,
        vk: u16,
    },
}

impl ControlEvent {
    pub fn tag(&self) -> u8 {
        match self {
            ControlEvent::CursorMove { .. } => TAG_CURSOR_MOVE,
            ControlEvent::ButtonEdge { edge: Edge::Down, .. } => TAG_BUTTON_DOWN,
            ControlEvent::ButtonEdge { edge: Edge::Up, .. } => TAG_BUTTON_UP,
            ControlEvent::KeyEdge { .. } => TAG_KEY_EDGE,
        }
    }

    /// Total encoded size, tag included.
    pub fn wire_len(&self) -> usize {
        1 + payload_len(self.tag()).unwrap_or(0)
    }
}

// ── ControlCodec ─────────────────────────────────────────────────

/// `tokio_util` codec for the control stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlCodec;

impl ControlCodec {
    /// Parse one complete message (tag + payload). `None` means the
    /// message was well framed but carried an invalid button or edge.
    fn parse(mut msg: BytesMut) -> Option<ControlEvent> {
        let tag = msg.get_u8();
        match tag {
            TAG_CURSOR_MOVE => {
                let x = msg.get_i32_le();
                let y = msg.get_i32_le();
                Some(ControlEvent::CursorMove { x, y })
            }
            TAG_BUTTON_DOWN | TAG_BUTTON_UP => {
                let raw = msg.get_u8();
                let x = msg.get_i32_le();
                let y = msg.get_i32_le();
                let Some(button) = MouseButton::from_wire(raw) else {
                    tracing::warn!("ignoring control message with unknown button {raw}");
                    return None;
                };
                let edge = if tag == TAG_BUTTON_DOWN { Edge::Down } else { Edge::Up };
                Some(ControlEvent::ButtonEdge { button, edge, x, y })
            }
            _ => {
                let raw = msg.get_u8();
                let vk = msg.get_u16_le();
                let Some(edge) = Edge::from_wire(raw) else {
                    tracing::warn!("ignoring key event with unknown edge {raw}");
                    return None;
                };
                Some(ControlEvent::KeyEdge { edge, vk })
            }
        }
    }
}

impl Decoder for ControlCodec {
    type Item = ControlEvent;
    type Error = TilecastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(&tag) = src.first() else {
                return Ok(None);
            };
            let len = payload_len(tag).ok_or(TilecastError::UnknownControlTag(tag))?;
            if src.len() < 1 + len {
                src.reserve(1 + len - src.len());
                return Ok(None);
            }

            let msg = src.split_to(1 + len);
            if let Some(event) = Self::parse(msg) {
                return Ok(Some(event));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(event) => Ok(Some(event)),
            None if src.is_empty() => Ok(None),
            None => {
                let needed = src.first().and_then(|&t| payload_len(t)).map_or(1, |l| l + 1);
                Err(TilecastError::ShortRead {
                    needed,
                    available: src.len(),
                })
            }
        }
    }
}

impl Encoder<ControlEvent> for ControlCodec {
    type Error = TilecastError;

    fn encode(&mut self, item: ControlEvent, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.wire_len());
        dst.put_u8(item.tag());
        match item {
            ControlEvent::CursorMove { x, y } => {
                dst.put_i32_le(x);
                dst.put_i32_le(y);
            }
            ControlEvent::ButtonEdge { button, x, y, .. } => {
                dst.put_u8(button.to_wire());
                dst.put_i32_le(x);
                dst.put_i32_le(y);
            }
            ControlEvent::KeyEdge { edge, vk } => {
                dst.put_u8(edge.to_wire());
                dst.put_u16_le(vk);
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
