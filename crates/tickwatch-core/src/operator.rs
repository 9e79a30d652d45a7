//! Operator control state for a running session.
//!
//! The driving loop and the stdin producer share one [`OperatorState`]
//! through an [`Arc`](std::sync::Arc). The stop flag is atomic so the loop
//! can check it every tick without taking a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Reason why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEndReason {
    /// The console stopped advancing (trace exhausted, emulator closed).
    ConsoleFinished,
    /// An operator issued a stop command.
    OperatorStop,
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
}

/// Shared operator control state.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wall-clock time when the session state was created.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Pause between ticks in milliseconds.
    tick_interval_ms: u64,

    /// Reason the session ended, if it has.
    end_reason: Mutex<Option<SessionEndReason>>,
}

impl OperatorState {
    /// Create a new operator state from configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            started_at: Utc::now(),
            max_ticks: config.max_ticks,
            tick_interval_ms: config.tick_interval_ms,
            end_reason: Mutex::new(None),
        }
    }

    /// Request a clean stop at the next tick boundary.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record the reason the session ended.
    pub fn set_end_reason(&self, reason: SessionEndReason) {
        *self.end_reason.lock() = Some(reason);
    }

    /// Get the reason the session ended, if it has.
    pub fn end_reason(&self) -> Option<SessionEndReason> {
        *self.end_reason.lock()
    }

    /// Returns `true` if `max_ticks > 0` and `current_tick >= max_ticks`.
    pub const fn tick_limit_reached(&self, current_tick: u64) -> bool {
        self.max_ticks > 0 && current_tick >= self.max_ticks
    }

    /// Get the configured max ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Pause the driving loop takes after each tick.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Return the wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Return elapsed milliseconds since the state was created.
    pub fn elapsed_ms(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds();
        // Negative if the wall clock stepped backwards.
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }
}
