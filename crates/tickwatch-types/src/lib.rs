//! Shared type definitions for Tickwatch.
//!
//! This crate is the single source of truth for the values that cross
//! component boundaries: the event vocabulary published by the detector,
//! the typed payloads carried by each event, and the closed button
//! vocabulary accepted by the command FIFO.
//!
//! # Modules
//!
//! - [`event`] -- Event type enumeration, the JSON payload mapping, and the
//!   [`Event`] envelope
//! - [`payloads`] -- Typed payload structs for each event plus the sampled
//!   value types ([`Position`], [`HpPair`])
//! - [`button`] -- The console button vocabulary and its token parser

pub mod button;
pub mod event;
pub mod payloads;

// Re-export all public types at crate root for convenience.
pub use button::{Button, ParseButtonError};
pub use event::{Event, EventType, ParseEventTypeError, Payload};
pub use payloads::{
    BattleEndEvent, BattleStartEvent, CommandExecutedEvent, EventPayload, HealthChangeEvent,
    HpPair, Position, PositionChangeEvent, StepEvent,
};
