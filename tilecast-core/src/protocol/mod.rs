//! Wire framing for the three session channels.
//!
//! Each channel runs on its own TCP connection with its own framing;
//! nothing is multiplexed and no channel carries a version field.

pub mod audio;
pub mod control;
pub mod video;

pub use audio::{AudioCodec, MAX_AUDIO_PACKET};
pub use control::{ControlCodec, ControlEvent, Edge, MouseButton};
pub use video::{
    ChangeSet, EncodedTile, ReceivedChangeSet, TileRecordHeader, VIDEO_SENTINEL, VideoHeader,
    VideoReader, VideoWriter,
};
