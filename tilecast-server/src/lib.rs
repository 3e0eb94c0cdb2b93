//! # tilecast-server
//!
//! Source-machine side of tilecast. Captures the local screen, sends
//! changed tiles to a single viewer, injects the viewer's mouse and
//! keyboard input, and exchanges PCM audio with it. A read-only MJPEG
//! view is served to browsers on the web port.
//!
//! One viewer per process: once the session ends the process exits.

pub mod config;
pub mod service;
