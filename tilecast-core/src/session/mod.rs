//! Session orchestration: the server that accepts one viewer and drives
//! every worker loop, the viewer side that consumes the streams, and the
//! pieces they share.

pub mod audio;
pub mod bridge;
pub mod capture;
pub mod control;
pub mod frame_cell;
pub mod server;
pub mod viewer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use audio::{AudioPacket, AudioSink, AudioSource, SubmitOutcome};
pub use capture::{CaptureLoop, CaptureLoopConfig, CaptureSummary};
pub use control::{ControlSender, InputInjector};
pub use frame_cell::SharedFrameCell;
pub use server::{SessionConfig, SessionHandle, SessionParts, SessionServer};
pub use viewer::{ViewerConfig, ViewerSession, VideoStats};

/// How often a worker blocked on I/O re-checks the running flag.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves once `running` becomes false.
pub async fn wait_for_stop(running: &Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}
