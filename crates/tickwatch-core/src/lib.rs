//! Console observation, command relay, and session orchestration for
//! Tickwatch.
//!
//! This crate turns sampled console memory into events on an
//! [`EventBus`](tickwatch_bus::EventBus) and relays operator commands back
//! into the console.
//!
//! # Modules
//!
//! - [`console`] -- [`Console`] capability trait and the
//!   [`ScriptedConsole`] trace player.
//! - [`memory_map`] -- Addresses of the tracked values.
//! - [`detector`] -- [`StateChangeDetector`], edge-triggered event
//!   detection.
//! - [`command_fifo`] -- Bounded, validated command queue.
//! - [`config`] -- Typed configuration sections and [`ConfigError`].
//! - [`operator`] -- Shared stop flag and end reason.
//! - [`session`] -- The per-tick driving loop.
//! - [`tally`] -- Per-event-type delivery counters.
//!
//! [`Console`]: console::Console
//! [`ScriptedConsole`]: console::ScriptedConsole
//! [`StateChangeDetector`]: detector::StateChangeDetector
//! [`ConfigError`]: config::ConfigError

pub mod command_fifo;
pub mod config;
pub mod console;
pub mod detector;
pub mod memory_map;
pub mod operator;
pub mod session;
pub mod tally;
