//! Platform adapters: screen grabbing, input injection and audio
//! devices.
//!
//! Real backends exist for Windows only. On other targets the same
//! types are present but fail to open (input falls back to logging), so
//! the protocol and session layers build and test everywhere.

pub mod audio;
pub mod input;
pub mod screen;

pub use audio::{DeviceSink, DeviceSource};
pub use input::{LoggingInjector, default_injector};
#[cfg(target_os = "windows")]
pub use input::SendInputInjector;
pub use screen::ScreenCapturer;
