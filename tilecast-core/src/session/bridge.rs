//! MJPEG-over-HTTP bridge.
//!
//! Serves the latest [`SharedFrameCell`] snapshot to any number of
//! browsers, independent of the native viewer:
//!
//! - `GET /` returns a minimal page whose `<img>` points at `/stream`.
//! - `GET /stream` returns `multipart/x-mixed-replace; boundary=frame`
//!   and re-emits the current snapshot every [`POLL_INTERVAL`] until the
//!   client goes away or the session stops.
//! - Anything else is a 404.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::TcpListener;

use crate::error::TilecastError;
use crate::session::frame_cell::SharedFrameCell;
use crate::session::wait_for_stop;

/// How often a `/stream` responder re-reads the snapshot cell.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Multipart boundary token.
pub const BOUNDARY: &str = "frame";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Screen Share</title>
    <style>
        body { margin: 0; padding: 0; background: #000; }
        img { display: block; width: 100%; height: auto; }
    </style>
</head>
<body>
    <img id="screen" src="/stream" alt="Screen Stream">
</body>
</html>
"#;

#[derive(Clone)]
struct BridgeState {
    cell: SharedFrameCell,
    running: Arc<AtomicBool>,
}

/// Build the bridge's routes over `cell`. Streams end once `running`
/// goes false.
pub fn router(cell: SharedFrameCell, running: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/", get(index).fallback(not_found))
        .route("/stream", get(stream).fallback(not_found))
        .fallback(not_found)
        .with_state(BridgeState { cell, running })
}

/// Serve the bridge on an already-bound listener until `running` clears.
pub async fn serve(
    listener: TcpListener,
    cell: SharedFrameCell,
    running: Arc<AtomicBool>,
) -> Result<(), TilecastError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("MJPEG bridge listening on http://{addr}/");
    }
    let app = router(cell, Arc::clone(&running));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait_for_stop(&running).await })
        .await?;
    tracing::info!("MJPEG bridge stopped");
    Ok(())
}

/// One multipart body part carrying `jpeg`.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

// ── Handlers ─────────────────────────────────────────────────────

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn stream(State(state): State<BridgeState>) -> Response {
    tracing::debug!("MJPEG client attached");

    let parts = futures::stream::unfold(state, |state| async move {
        loop {
            if !state.running.load(Ordering::SeqCst) {
                return None;
            }
            let snapshot = state.cell.load();
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(jpeg) = snapshot {
                return Some((Ok::<_, std::convert::Infallible>(multipart_part(&jpeg)), state));
            }
        }
    });

    let headers = [
        (
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        ),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (header::CONNECTION, "close".to_string()),
    ];
    (headers, Body::from_stream(parts)).into_response()
}

// ── Tests ────────────────────────────────────────────────────────
