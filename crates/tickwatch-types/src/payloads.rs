//! Typed payloads for each event.
//!
//! The detector builds these structs and converts them into a [`Payload`]
//! with [`EventPayload::to_payload`]. Subscribers that want typed access can
//! go the other way with [`EventPayload::from_payload`]. Field names are the
//! wire names; positions serialize as a two-element `[x, y]` array.

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};

use crate::button::Button;
use crate::event::{EventType, Payload};

/// A tile coordinate on the current map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u8, u8)", into = "(u8, u8)")]
pub struct Position {
    /// Horizontal tile index.
    pub x: u8,
    /// Vertical tile index.
    pub y: u8,
}

impl Position {
    /// Create a position from its coordinates.
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

impl From<(u8, u8)> for Position {
    fn from((x, y): (u8, u8)) -> Self {
        Self { x, y }
    }
}

impl From<Position> for (u8, u8) {
    fn from(position: Position) -> Self {
        (position.x, position.y)
    }
}

/// Current and maximum HP of the lead party member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HpPair {
    /// Current hit points.
    pub current: u16,
    /// Maximum hit points.
    pub max: u16,
}

impl HpPair {
    /// Create an HP pair.
    pub const fn new(current: u16, max: u16) -> Self {
        Self { current, max }
    }
}

/// A struct that can be published as the payload of a fixed event type.
pub trait EventPayload: Serialize {
    /// The event this payload belongs to.
    const EVENT_TYPE: EventType;

    /// Serialize into a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or does not yield an object.
    fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde_json::Error::custom(format!(
                "payload for {} must be a JSON object, got {other}",
                Self::EVENT_TYPE
            ))),
        }
    }

    /// Decode a received payload back into the typed struct.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is missing fields or has wrong types.
    fn from_payload(payload: &Payload) -> Result<Self, serde_json::Error>
    where
        Self: DeserializeOwned,
    {
        serde_json::from_value(serde_json::Value::Object(payload.clone()))
    }
}

/// Payload of [`EventType::Step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Position after the step.
    pub position: Position,
    /// Position before the step.
    pub previous_position: Position,
    /// Raw facing-direction byte, absent when unreadable.
    pub direction: Option<u8>,
}

impl EventPayload for StepEvent {
    const EVENT_TYPE: EventType = EventType::Step;
}

/// Payload of [`EventType::PositionChange`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChangeEvent {
    /// The newly observed position.
    pub position: Position,
    /// Current map identifier, absent when unreadable.
    pub map_id: Option<u8>,
}

impl EventPayload for PositionChangeEvent {
    const EVENT_TYPE: EventType = EventType::PositionChange;
}

/// Payload of [`EventType::BattleStart`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleStartEvent {
    /// Where the player stood when the battle began.
    pub position: Position,
    /// Map the battle began on, absent when unreadable.
    pub map_id: Option<u8>,
}

impl EventPayload for BattleStartEvent {
    const EVENT_TYPE: EventType = EventType::BattleStart;
}

/// Payload of [`EventType::BattleEnd`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleEndEvent {
    /// Where the player stood when the battle ended.
    pub position: Position,
}

impl EventPayload for BattleEndEvent {
    const EVENT_TYPE: EventType = EventType::BattleEnd;
}

/// Payload of [`EventType::HealthChange`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChangeEvent {
    /// Current HP after the change.
    pub current_hp: u16,
    /// Maximum HP after the change.
    pub max_hp: u16,
    /// Current HP from the previous latch; absent on the first reading.
    pub previous_hp: Option<u16>,
}

impl EventPayload for HealthChangeEvent {
    const EVENT_TYPE: EventType = EventType::HealthChange;
}

/// Payload of [`EventType::CommandExecuted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExecutedEvent {
    /// The button that was injected.
    pub command: Button,
    /// Commands still waiting in the FIFO after this one was taken.
    pub queue_size: usize,
}

impl EventPayload for CommandExecutedEvent {
    const EVENT_TYPE: EventType = EventType::CommandExecuted;
}
