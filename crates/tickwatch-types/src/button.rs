//! Console button vocabulary.
//!
//! Commands arriving from an external producer are free-form text. They are
//! normalized (trimmed, lowercased) and matched against this closed set
//! before they are allowed anywhere near the command FIFO.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// A button on the driven console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    /// D-pad up.
    Up,
    /// D-pad down.
    Down,
    /// D-pad left.
    Left,
    /// D-pad right.
    Right,
    /// Primary action button.
    A,
    /// Secondary action button.
    B,
    /// Start button.
    Start,
    /// Select button.
    Select,
}

impl Button {
    /// Every button, in vocabulary order.
    pub const ALL: [Self; 8] = [
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::A,
        Self::B,
        Self::Start,
        Self::Select,
    ];

    /// The canonical lowercase token for this button.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::A => "a",
            Self::B => "b",
            Self::Start => "start",
            Self::Select => "select",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a token is not part of the button vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid command '{0}' (valid: up, down, left, right, a, b, start, select)")]
pub struct ParseButtonError(pub String);

impl FromStr for Button {
    type Err = ParseButtonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|button| button.as_str() == token)
            .ok_or(ParseButtonError(token))
    }
}
