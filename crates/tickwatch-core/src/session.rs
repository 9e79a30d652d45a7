//! Session driving loop.
//!
//! [`Session::run`] owns the per-tick sequence:
//!
//! 1. advance the console (stop when it reports the end)
//! 2. run the detector against fresh memory
//! 3. if commands are attached and the cadence has elapsed, inject the
//!    oldest queued button and publish `command_executed`
//!
//! The session brackets the run with `game_start` and `game_end` and
//! stops early on an operator request or the configured tick bound.

use std::sync::Arc;

use tickwatch_bus::{BusError, EventBus, publish_event};
use tickwatch_types::{CommandExecutedEvent, EventType, Payload};
use tracing::{debug, error, info, warn};

use crate::command_fifo::CommandFifo;
use crate::config::CommandConfig;
use crate::console::Console;
use crate::detector::StateChangeDetector;
use crate::operator::{OperatorState, SessionEndReason};

/// Errors that abort a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Publishing an event failed.
    #[error("event bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: BusError,
    },
}

/// How a session ended and what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// The reason the session ended.
    pub end_reason: SessionEndReason,
    /// Ticks the console advanced through.
    pub total_ticks: u64,
    /// Buttons successfully injected.
    pub commands_executed: u64,
}

/// Drains a [`CommandFifo`] into the console at a fixed cadence.
#[derive(Debug)]
struct CommandDrain {
    fifo: Arc<CommandFifo>,
    ticks_per_command: u32,
    hold_ticks: u32,
    ticks_since_command: u32,
}

/// One run of the console with detection and optional command relay.
pub struct Session {
    bus: Arc<dyn EventBus>,
    detector: StateChangeDetector,
    operator: Arc<OperatorState>,
    commands: Option<CommandDrain>,
}

impl Session {
    /// Create a session that publishes detector events on `bus`.
    pub fn new(
        bus: Arc<dyn EventBus>,
        detector: StateChangeDetector,
        operator: Arc<OperatorState>,
    ) -> Self {
        Self {
            bus,
            detector,
            operator,
            commands: None,
        }
    }

    /// Relay commands from `fifo` into the console.
    #[must_use]
    pub fn with_commands(mut self, fifo: Arc<CommandFifo>, config: &CommandConfig) -> Self {
        self.commands = Some(CommandDrain {
            fifo,
            ticks_per_command: config.ticks_per_command,
            hold_ticks: config.hold_ticks,
            ticks_since_command: 0,
        });
        self
    }

    /// Drive `console` until it finishes, the operator stops the session,
    /// or the tick bound is reached.
    ///
    /// `game_end` is published on every exit path. When the run itself
    /// failed, the `game_end` publish is best effort and the original error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Bus`] if publishing an event fails.
    pub fn run<C: Console + ?Sized>(
        &mut self,
        console: &mut C,
    ) -> Result<SessionSummary, SessionError> {
        info!(
            max_ticks = self.operator.max_ticks(),
            tick_interval = ?self.operator.tick_interval(),
            commands = self.commands.is_some(),
            "Session starting"
        );
        self.bus.publish(EventType::GameStart, Payload::new())?;

        let outcome = self.drive(console);

        let ended = self.bus.publish(EventType::GameEnd, Payload::new());
        match outcome {
            Ok(summary) => {
                ended?;
                self.operator.set_end_reason(summary.end_reason);
                Ok(summary)
            }
            Err(err) => {
                if let Err(end_err) = ended {
                    warn!(error = %end_err, "game_end not delivered after session failure");
                }
                Err(err)
            }
        }
    }

    fn drive<C: Console + ?Sized>(&mut self, console: &mut C) -> Result<SessionSummary, SessionError> {
        let mut total_ticks: u64 = 0;
        let mut commands_executed: u64 = 0;

        let end_reason = loop {
            if self.operator.is_stop_requested() {
                info!("Operator stop requested");
                break SessionEndReason::OperatorStop;
            }
            if self.operator.tick_limit_reached(total_ticks) {
                info!(
                    tick = total_ticks,
                    max_ticks = self.operator.max_ticks(),
                    "Tick limit reached"
                );
                break SessionEndReason::MaxTicksReached;
            }
            if !console.advance() {
                info!(tick = total_ticks, "Console finished");
                break SessionEndReason::ConsoleFinished;
            }
            total_ticks = total_ticks.saturating_add(1);

            self.detector.update(&*console)?;

            if self.inject_due_command(console)? {
                commands_executed = commands_executed.saturating_add(1);
            }

            let interval = self.operator.tick_interval();
            if !interval.is_zero() {
                std::thread::sleep(interval);
            }
        };

        Ok(SessionSummary {
            end_reason,
            total_ticks,
            commands_executed,
        })
    }

    /// Returns `true` when a button was injected this tick.
    fn inject_due_command<C: Console + ?Sized>(
        &mut self,
        console: &mut C,
    ) -> Result<bool, SessionError> {
        let Some(drain) = self.commands.as_mut() else {
            return Ok(false);
        };
        drain.ticks_since_command = drain.ticks_since_command.saturating_add(1);
        if drain.ticks_since_command < drain.ticks_per_command {
            return Ok(false);
        }
        let Some(button) = drain.fifo.next() else {
            return Ok(false);
        };

        if let Err(err) = console.inject_button(button, drain.hold_ticks) {
            error!(command = %button, error = %err, "command injection failed, dropping command");
            return Ok(false);
        }

        let queue_size = drain.fifo.len();
        drain.ticks_since_command = 0;
        debug!(command = %button, queue_size, "command executed");
        publish_event(
            &*self.bus,
            &CommandExecutedEvent {
                command: button,
                queue_size,
            },
        )?;
        Ok(true)
    }

    /// The detector driven by this session.
    pub const fn detector(&self) -> &StateChangeDetector {
        &self.detector
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("detector", &self.detector)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

/// Log the end of a session.
pub fn log_session_end(summary: &SessionSummary, operator: &OperatorState) {
    info!(
        reason = ?summary.end_reason,
        total_ticks = summary.total_ticks,
        commands_executed = summary.commands_executed,
        elapsed_ms = operator.elapsed_ms(),
        "Session ended"
    );
    if summary.total_ticks == 0 {
        warn!("Session ended with no ticks executed");
    }
}
