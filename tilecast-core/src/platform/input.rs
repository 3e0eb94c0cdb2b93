//! Input injection backends.
//!
//! On Windows, [`SendInputInjector`] replays control events with
//! `SetCursorPos` and `SendInput`. The process must run in the same
//! desktop session as the user (or hold `UIAccess`). Elsewhere,
//! [`LoggingInjector`] records what would have been injected.

use crate::error::TilecastError;
use crate::protocol::control::{Edge, MouseButton};
use crate::session::control::InputInjector;

/// The injector for the current platform.
pub fn default_injector() -> Box<dyn InputInjector> {
    #[cfg(target_os = "windows")]
    {
        Box::new(SendInputInjector::new())
    }
    #[cfg(not(target_os = "windows"))]
    {
        tracing::warn!("input injection is only available on Windows; control events will be logged");
        Box::new(LoggingInjector::default())
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
pub use windows_impl::SendInputInjector;

#[cfg(target_os = "windows")]
mod windows_impl {
    use super::*;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;
    use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN, SetCursorPos};

    /// Injects into the interactive desktop through Win32.
    #[derive(Debug, Default)]
    pub struct SendInputInjector;

    impl SendInputInjector {
        pub fn new() -> Self {
            Self
        }

        fn send(input: INPUT, what: &str) -> Result<(), TilecastError> {
            let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
            if sent == 0 {
                return Err(TilecastError::Input(format!("SendInput ({what}) returned 0")));
            }
            Ok(())
        }

        fn mouse(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
            INPUT {
                r#type: INPUT_MOUSE,
                Anonymous: INPUT_0 {
                    mi: MOUSEINPUT {
                        dx,
                        dy,
                        mouseData: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            }
        }
    }

    impl InputInjector for SendInputInjector {
        fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), TilecastError> {
            unsafe { SetCursorPos(x, y) }
                .map_err(|e| TilecastError::Input(format!("SetCursorPos failed: {e}")))
        }

        fn button_event(
            &mut self,
            button: MouseButton,
            edge: Edge,
            x: i32,
            y: i32,
        ) -> Result<(), TilecastError> {
            // Absolute coordinates are normalised to 0..=65535.
            let (screen_w, screen_h) =
                unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
            if screen_w <= 1 || screen_h <= 1 {
                return Err(TilecastError::Input("GetSystemMetrics returned 0".into()));
            }
            let abs_x = (x as i64 * 65535 / (screen_w as i64 - 1)) as i32;
            let abs_y = (y as i64 * 65535 / (screen_h as i64 - 1)) as i32;
            Self::send(
                Self::mouse(abs_x, abs_y, MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE),
                "mouse move",
            )?;

            let flags = match (button, edge) {
                (MouseButton::Left, Edge::Down) => MOUSEEVENTF_LEFTDOWN,
                (MouseButton::Left, Edge::Up) => MOUSEEVENTF_LEFTUP,
                (MouseButton::Right, Edge::Down) => MOUSEEVENTF_RIGHTDOWN,
                (MouseButton::Right, Edge::Up) => MOUSEEVENTF_RIGHTUP,
            };
            Self::send(Self::mouse(0, 0, flags), "mouse button")
        }

        fn key_event(&mut self, edge: Edge, vk: u16) -> Result<(), TilecastError> {
            let flags = match edge {
                Edge::Down => KEYBD_EVENT_FLAGS(0),
                Edge::Up => KEYEVENTF_KEYUP,
            };
            let input = INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: VIRTUAL_KEY(vk),
                        wScan: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            };
            Self::send(input, "keyboard")
        }
    }
}

// ── Logging fallback ─────────────────────────────────────────────

/// Logs every event instead of injecting it.
#[derive(Debug, Default)]
pub struct LoggingInjector {
    events: u64,
}

impl LoggingInjector {
    /// Events seen so far.
    pub fn events(&self) -> u64 {
        self.events
    }
}

impl InputInjector for LoggingInjector {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), TilecastError> {
        self.events += 1;
        tracing::debug!("cursor -> ({x}, {y})");
        Ok(())
    }

    fn button_event(
        &mut self,
        button: MouseButton,
        edge: Edge,
        x: i32,
        y: i32,
    ) -> Result<(), TilecastError> {
        self.events += 1;
        tracing::info!("{button:?} {edge:?} at ({x}, {y})");
        Ok(())
    }

    fn key_event(&mut self, edge: Edge, vk: u16) -> Result<(), TilecastError> {
        self.events += 1;
        tracing::info!("key {vk:#04x} {edge:?}");
        Ok(())
    }
}
