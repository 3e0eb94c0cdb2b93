//! Latest full-screen JPEG snapshot, shared between the capture loop and
//! every MJPEG responder.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

/// Single-slot, last-writer-wins snapshot holder.
///
/// The lock is held only to swap a reference-counted buffer in or out,
/// never across network I/O. Cloning the cell shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct SharedFrameCell {
    inner: Arc<Mutex<Option<Bytes>>>,
}

impl SharedFrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Bytes>> {
        // A writer that panicked mid-swap cannot leave a torn `Bytes`.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the snapshot.
    pub fn store(&self, jpeg: impl Into<Bytes>) {
        let jpeg = jpeg.into();
        *self.lock() = Some(jpeg);
    }

    /// The most recent snapshot, or `None` before the first write.
    pub fn load(&self) -> Option<Bytes> {
        self.lock().clone()
    }
}
