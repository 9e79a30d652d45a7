//! Console capability and a deterministic scripted implementation.
//!
//! The emulator is an external collaborator. Tickwatch only needs three
//! things from it: step forward one tick, read a byte of addressable
//! memory, and press a button. [`Console`] captures exactly that surface.
//!
//! [`ScriptedConsole`] plays back a fixed list of [`Frame`]s. Each frame is
//! a set of memory writes applied when the console advances onto it;
//! memory persists between frames, so a trace only has to describe what
//! changes. Traces can be built in code (tests) or loaded from YAML (the
//! engine's replay mode):
//!
//! ```yaml
//! frames:
//!   - set: { "D362": 5, "D361": 7 }
//!     repeat: 30
//!   - set: { "D057": 1 }
//!   - clear: ["D362"]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use tickwatch_types::Button;
use tracing::debug;

/// Errors raised by a console when asked to inject input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// The console refused the button press.
    #[error("console rejected '{button}': {reason}")]
    InputRejected {
        /// The button that was pressed.
        button: Button,
        /// Why the console refused it.
        reason: String,
    },
}

/// The capabilities Tickwatch consumes from a driven console.
pub trait Console {
    /// Advance one tick. Returns `false` once the session has ended.
    fn advance(&mut self) -> bool;

    /// Read one byte of addressable memory.
    ///
    /// Returns `None` when the address cannot be read this tick. Callers
    /// treat that as "no data", never as zero.
    fn read_byte(&self, address: u16) -> Option<u8>;

    /// Press `button` and hold it for `hold_ticks` ticks.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::InputRejected`] if the console refuses input.
    fn inject_button(&mut self, button: Button, hold_ticks: u32) -> Result<(), ConsoleError>;
}

/// Memory writes applied when a [`ScriptedConsole`] advances onto a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    writes: Vec<(u16, Option<u8>)>,
}

impl Frame {
    /// A frame that changes nothing.
    pub const fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Make `address` read as `value` from this tick on.
    #[must_use]
    pub fn set(mut self, address: u16, value: u8) -> Self {
        self.writes.push((address, Some(value)));
        self
    }

    /// Make `address` unreadable from this tick on.
    #[must_use]
    pub fn clear(mut self, address: u16) -> Self {
        self.writes.push((address, None));
        self
    }
}

/// Errors that can occur when loading a console trace.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Failed to read the trace file from disk.
    #[error("failed to read trace file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse trace YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// The expanded trace would exceed [`MAX_TRACE_FRAMES`].
    #[error("trace frame {frame} expands past the {limit}-frame limit")]
    TooLong {
        /// Index of the trace entry that crossed the limit.
        frame: usize,
        /// The frame limit.
        limit: usize,
    },

    /// A memory address was not a 16-bit hexadecimal number.
    #[error("invalid address '{address}' in trace frame {frame}")]
    Address {
        /// The offending address text.
        address: String,
        /// Index of the trace entry containing it.
        frame: usize,
    },
}

#[derive(Debug, Deserialize)]
struct TraceFile {
    #[serde(default)]
    frames: Vec<TraceEntry>,
}

#[derive(Debug, Deserialize)]
struct TraceEntry {
    #[serde(default)]
    set: BTreeMap<String, u8>,
    #[serde(default)]
    clear: Vec<String>,
    #[serde(default = "default_repeat")]
    repeat: u32,
}

/// Upper bound on the expanded length of a YAML trace.
pub const MAX_TRACE_FRAMES: usize = 1_000_000;

const fn default_repeat() -> u32 {
    1
}

/// Parse `D362`, `0xD362`, or `0XD362` into an address.
fn parse_address(text: &str) -> Option<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 16).ok()
}

/// A console that replays scripted memory frames.
///
/// Advancing past the last frame ends the session. Button presses are
/// recorded and can be inspected with [`ScriptedConsole::injected`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedConsole {
    memory: HashMap<u16, u8>,
    frames: Vec<Frame>,
    cursor: usize,
    injected: Vec<(Button, u32)>,
    reject_input: bool,
}

impl ScriptedConsole {
    /// Create a console that will play `frames` and then finish.
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// Parse a YAML trace.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Yaml`] for malformed YAML,
    /// [`TraceError::Address`] for addresses that are not hex `u16`s, and
    /// [`TraceError::TooLong`] when repeats expand past
    /// [`MAX_TRACE_FRAMES`].
    pub fn from_yaml(yaml: &str) -> Result<Self, TraceError> {
        let trace: TraceFile = serde_yml::from_str(yaml)?;
        let mut frames = Vec::new();

        for (index, entry) in trace.frames.into_iter().enumerate() {
            let repeat = usize::try_from(entry.repeat.max(1)).unwrap_or(usize::MAX);
            if frames.len().saturating_add(repeat) > MAX_TRACE_FRAMES {
                return Err(TraceError::TooLong {
                    frame: index,
                    limit: MAX_TRACE_FRAMES,
                });
            }
            let mut frame = Frame::new();
            for (address, value) in &entry.set {
                let address = parse_address(address).ok_or_else(|| TraceError::Address {
                    address: address.clone(),
                    frame: index,
                })?;
                frame = frame.set(address, *value);
            }
            for address in &entry.clear {
                let parsed = parse_address(address).ok_or_else(|| TraceError::Address {
                    address: address.clone(),
                    frame: index,
                })?;
                frame = frame.clear(parsed);
            }
            frames.push(frame);
            for _ in 1..entry.repeat {
                frames.push(Frame::new());
            }
        }

        debug!(frames = frames.len(), "console trace parsed");
        Ok(Self::new(frames))
    }

    /// Load a YAML trace from disk.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] if the file cannot be read, otherwise as
    /// [`ScriptedConsole::from_yaml`].
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Write a byte directly, outside of any frame.
    pub fn set_byte(&mut self, address: u16, value: u8) {
        self.memory.insert(address, value);
    }

    /// Make an address unreadable, outside of any frame.
    pub fn clear_byte(&mut self, address: u16) {
        self.memory.remove(&address);
    }

    /// Refuse every subsequent button press when `reject` is true.
    pub const fn reject_input(&mut self, reject: bool) {
        self.reject_input = reject;
    }

    /// Buttons pressed so far, with their hold durations.
    pub fn injected(&self) -> &[(Button, u32)] {
        &self.injected
    }

    /// Frames not yet played.
    pub const fn remaining_frames(&self) -> usize {
        self.frames.len().saturating_sub(self.cursor)
    }
}

impl Console for ScriptedConsole {
    fn advance(&mut self) -> bool {
        let Some(frame) = self.frames.get(self.cursor) else {
            return false;
        };
        for &(address, value) in &frame.writes {
            match value {
                Some(byte) => {
                    self.memory.insert(address, byte);
                }
                None => {
                    self.memory.remove(&address);
                }
            }
        }
        self.cursor = self.cursor.saturating_add(1);
        true
    }

    fn read_byte(&self, address: u16) -> Option<u8> {
        self.memory.get(&address).copied()
    }

    fn inject_button(&mut self, button: Button, hold_ticks: u32) -> Result<(), ConsoleError> {
        if self.reject_input {
            return Err(ConsoleError::InputRejected {
                button,
                reason: "input disabled".to_owned(),
            });
        }
        self.injected.push((button, hold_ticks));
        Ok(())
    }
}
