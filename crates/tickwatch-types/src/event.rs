//! Event vocabulary and envelope.
//!
//! Every event carries an [`EventType`] and a [`Payload`]: a JSON object
//! mapping field names to values. The wire name of the event type (see
//! [`EventType::as_str`]) doubles as the broker routing key, so it must
//! stay stable across releases.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// JSON object carried by every event. Empty when an event has no fields.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The closed set of events Tickwatch publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The player moved from one tile to another.
    Step,
    /// The player position differs from the last observed position
    /// (including the very first successful read).
    PositionChange,
    /// The in-battle flag went from false to true.
    BattleStart,
    /// The in-battle flag went from true to false.
    BattleEnd,
    /// The lead party member's HP pair changed.
    HealthChange,
    /// A session started driving the console.
    GameStart,
    /// A session stopped driving the console.
    GameEnd,
    /// A queued command was injected into the console.
    CommandExecuted,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Step,
        Self::PositionChange,
        Self::BattleStart,
        Self::BattleEnd,
        Self::HealthChange,
        Self::GameStart,
        Self::GameEnd,
        Self::CommandExecuted,
    ];

    /// Wire name used as the routing key on the broker.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::PositionChange => "position_change",
            Self::BattleStart => "battle_start",
            Self::BattleEnd => "battle_end",
            Self::HealthChange => "health_change",
            Self::GameStart => "game_start",
            Self::GameEnd => "game_end",
            Self::CommandExecuted => "command_executed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not the wire name of any [`EventType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == trimmed)
            .ok_or_else(|| ParseEventTypeError(trimmed.to_owned()))
    }
}

/// A published event: its type plus an immutable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event_type: EventType,
    /// Event fields. Empty for marker events such as [`EventType::GameStart`].
    pub payload: Payload,
}

impl Event {
    /// Create an event with an empty payload.
    pub fn empty(event_type: EventType) -> Self {
        Self {
            event_type,
            payload: Payload::new(),
        }
    }
}
