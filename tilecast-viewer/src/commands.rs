//! Typed input relay: one command per stdin line.
//!
//! ```text
//! move X Y                 cursor to (X, Y)
//! down left|right X Y      button press at (X, Y)
//! up left|right X Y        button release at (X, Y)
//! key down|up VK           virtual-key edge (decimal or 0x-hex)
//! stats                    print receive counters
//! quit                     end the session
//! ```

use thiserror::Error;

use tilecast_core::protocol::{ControlEvent, Edge, MouseButton};

/// A parsed stdin line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Send(ControlEvent),
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid number '{0}'")]
    BadNumber(String),
}

pub const HELP: &str = "commands: move X Y | down|up left|right X Y | key down|up VK | stats | quit";

/// Parse one line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "move" => match args {
            [x, y] => Command::Send(ControlEvent::CursorMove {
                x: coord(x)?,
                y: coord(y)?,
            }),
            _ => return Err(CommandError::Usage("move X Y")),
        },
        "down" | "up" => {
            let edge = if verb.eq_ignore_ascii_case("down") {
                Edge::Down
            } else {
                Edge::Up
            };
            match args {
                [button, x, y] => Command::Send(ControlEvent::ButtonEdge {
                    button: mouse_button(button)?,
                    edge,
                    x: coord(x)?,
                    y: coord(y)?,
                }),
                _ => return Err(CommandError::Usage("down|up left|right X Y")),
            }
        }
        "key" => match args {
            [edge, vk] => Command::Send(ControlEvent::KeyEdge {
                edge: key_edge(edge)?,
                vk: virtual_key(vk)?,
            }),
            _ => return Err(CommandError::Usage("key down|up VK")),
        },
        "stats" => Command::Stats,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn coord(s: &str) -> Result<i32, CommandError> {
    s.parse().map_err(|_| CommandError::BadNumber(s.to_string()))
}

fn mouse_button(s: &str) -> Result<MouseButton, CommandError> {
    match s.to_ascii_lowercase().as_str() {
        "left" | "l" => Ok(MouseButton::Left),
        "right" | "r" => Ok(MouseButton::Right),
        _ => Err(CommandError::Usage("down|up left|right X Y")),
    }
}

fn key_edge(s: &str) -> Result<Edge, CommandError> {
    match s.to_ascii_lowercase().as_str() {
        "down" => Ok(Edge::Down),
        "up" => Ok(Edge::Up),
        _ => Err(CommandError::Usage("key down|up VK")),
    }
}

fn virtual_key(s: &str) -> Result<u16, CommandError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| CommandError::BadNumber(s.to_string()))
}
