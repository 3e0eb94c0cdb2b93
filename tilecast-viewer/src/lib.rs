//! # tilecast-viewer
//!
//! Viewer side of tilecast. Connects to a server's video, control and
//! audio ports, keeps a decoded copy of the remote screen, optionally
//! dumps it to a JPEG file, relays input typed on stdin, and plays the
//! server's audio.

pub mod commands;
pub mod config;
pub mod snapshot;
