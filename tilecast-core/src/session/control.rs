//! Control channel workers.
//!
//! Server side: [`run_control_loop`] decodes events and hands them to an
//! [`InputInjector`]. Viewer side: [`ControlSender`] queues events for a
//! background writer task that owns the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::TilecastError;
use crate::protocol::control::{ControlCodec, ControlEvent, Edge, MouseButton};
use crate::session::wait_for_stop;

// ── InputInjector ────────────────────────────────────────────────

/// Turns control events into real input on the server's desktop.
pub trait InputInjector: Send {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), TilecastError>;

    /// Press or release `button` at `(x, y)`.
    fn button_event(
        &mut self,
        button: MouseButton,
        edge: Edge,
        x: i32,
        y: i32,
    ) -> Result<(), TilecastError>;

    /// Press or release the key with Windows virtual-key code `vk`.
    fn key_event(&mut self, edge: Edge, vk: u16) -> Result<(), TilecastError>;
}

/// Route one event to the matching injector call.
pub fn dispatch(injector: &mut dyn InputInjector, event: ControlEvent) -> Result<(), TilecastError> {
    match event {
        ControlEvent::CursorMove { x, y } => injector.move_cursor_to(x, y),
        ControlEvent::ButtonEdge { button, edge, x, y } => injector.button_event(button, edge, x, y),
        ControlEvent::KeyEdge { edge, vk } => injector.key_event(edge, vk),
    }
}

// ── Receive loop ─────────────────────────────────────────────────

/// Decode events from `reader` and inject them until the peer closes,
/// the stream turns out corrupt, or `running` goes false.
///
/// Injection failures are logged and do not end the loop. Returns the
/// number of events decoded.
pub async fn run_control_loop<R>(
    reader: R,
    injector: &mut dyn InputInjector,
    running: &Arc<AtomicBool>,
) -> Result<u64, TilecastError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, ControlCodec);
    let mut events = 0u64;

    while running.load(Ordering::SeqCst) {
        let next = tokio::select! {
            next = frames.next() => next,
            _ = wait_for_stop(running) => break,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => return Err(e),
            None => {
                debug!("control peer closed the connection");
                break;
            }
        };

        events += 1;
        if let Err(e) = dispatch(injector, event) {
            warn!("input injection failed for {event:?}: {e}");
        }
    }

    Ok(events)
}

// ── ControlSender ────────────────────────────────────────────────

/// Cloneable handle that queues events for the control socket.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: mpsc::Sender<ControlEvent>,
}

impl ControlSender {
    /// Spawn the writer task over `writer`. The task ends when every
    /// handle is dropped or a write fails or times out.
    pub fn spawn<W>(writer: W, io_timeout: Duration) -> (Self, JoinHandle<Result<(), TilecastError>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ControlEvent>(100);

        let handle = tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, ControlCodec);
            while let Some(event) = rx.recv().await {
                tokio::time::timeout(io_timeout, sink.send(event))
                    .await
                    .map_err(|_| TilecastError::Timeout(io_timeout))??;
            }
            Ok(())
        });

        (Self { tx }, handle)
    }

    /// Queue one event.
    pub async fn send(&self, event: ControlEvent) -> Result<(), TilecastError> {
        self.tx.send(event).await?;
        Ok(())
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingInjector {
        events: Vec<ControlEvent>,
        fail_keys: bool,
    }

    impl InputInjector for RecordingInjector {
        fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), TilecastError> {
            self.events.push(ControlEvent::CursorMove { x, y });
            Ok(())
        }

        fn button_event(
            &mut self,
            button: MouseButton,
            edge: Edge,
            x: i32,
            y: i32,
        ) -> Result<(), TilecastError> {
            self.events.push(ControlEvent::ButtonEdge { button, edge, x, y });
            Ok(())
        }

        fn key_event(&mut self, edge: Edge, vk: u16) -> Result<(), TilecastError> {
            if self.fail_keys {
                return Err(TilecastError::Input("blocked".into()));
            }
            self.events.push(ControlEvent::KeyEdge { edge, vk });
            Ok(())
        }
    }

    fn running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[tokio::test]
    async fn injects_events_in_order() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&100i32.to_le_bytes());
        bytes.extend_from_slice(&200i32.to_le_bytes());
        bytes.extend_from_slice(&[2, 1, 5, 0, 0, 0, 6, 0, 0, 0]);
        bytes.extend_from_slice(&[4, 1, 0x41, 0]);

        let mut injector = RecordingInjector::default();
        let n = run_control_loop(&bytes[..], &mut injector, &running())
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(
            injector.events,
            vec![
                ControlEvent::CursorMove { x: 100, y: 200 },
                ControlEvent::ButtonEdge {
                    button: MouseButton::Left,
                    edge: Edge::Down,
                    x: 5,
                    y: 6
                },
                ControlEvent::KeyEdge {
                    edge: Edge::Down,
                    vk: 0x41
                },
            ]
        );
    }

    #[tokio::test]
    async fn truncated_stream_yields_no_event() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&100i32.to_le_bytes());
        bytes.extend_from_slice(&[200, 0, 0]);

        let mut injector = RecordingInjector::default();
        let err = run_control_loop(&bytes[..], &mut injector, &running())
            .await
            .unwrap_err();
        assert!(matches!(err, TilecastError::ShortRead { .. }));
        assert!(injector.events.is_empty());
    }

    #[tokio::test]
    async fn unknown_tag_closes_loop() {
        let bytes = [1u8, 0, 0, 0, 0, 0, 0, 0, 0, 9, 1, 2, 3];
        let mut injector = RecordingInjector::default();
        let err = run_control_loop(&bytes[..], &mut injector, &running())
            .await
            .unwrap_err();
        assert!(matches!(err, TilecastError::UnknownControlTag(9)));
        assert_eq!(injector.events.len(), 1);
    }

    #[tokio::test]
    async fn injector_failure_is_not_fatal() {
        let bytes = [4u8, 1, 0x41, 0, 1, 1, 0, 0, 0, 2, 0, 0, 0];
        let mut injector = RecordingInjector {
            fail_keys: true,
            ..Default::default()
        };
        let n = run_control_loop(&bytes[..], &mut injector, &running())
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(injector.events, vec![ControlEvent::CursorMove { x: 1, y: 2 }]);
    }

    #[tokio::test]
    async fn stopped_flag_ends_idle_loop() {
        let (_client, server) = tokio::io::duplex(64);
        let flag = running();
        let stopper = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.store(false, Ordering::SeqCst);
        });

        let mut injector = RecordingInjector::default();
        let n = tokio::time::timeout(
            Duration::from_secs(2),
            run_control_loop(server, &mut injector, &flag),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn sender_writes_wire_bytes() {
        let expected = [1u8, 7, 0, 0, 0, 8, 0, 0, 0, 4, 0, 0x1B, 0];
        let mock = tokio_test::io::Builder::new()
            .write(&expected[..9])
            .write(&expected[9..])
            .build();

        let (sender, handle) = ControlSender::spawn(mock, Duration::from_secs(1));
        sender
            .send(ControlEvent::CursorMove { x: 7, y: 8 })
            .await
            .unwrap();
        sender
            .send(ControlEvent::KeyEdge {
                edge: Edge::Up,
                vk: 0x1B,
            })
            .await
            .unwrap();
        drop(sender);
        handle.await.unwrap().unwrap();
    }
}
