//! Line-oriented command producer reading from stdin.
//!
//! Runs on its own OS thread because stdin reads block. Each line is split
//! on whitespace and every token is offered to the [`CommandFifo`]; a few
//! words are control commands instead of buttons.

use std::io::BufRead;
use std::sync::Arc;

use tickwatch_core::command_fifo::CommandFifo;
use tickwatch_core::operator::OperatorState;
use tracing::{info, warn};

/// What a single input line asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Tokens were offered to the FIFO; `queued` of them were accepted.
    Queued {
        /// Accepted tokens.
        queued: usize,
        /// Rejected tokens.
        rejected: usize,
    },
    /// Queue status was logged.
    Status,
    /// The queue was cleared.
    Cleared,
    /// The operator asked to stop.
    Quit,
}

/// Interpret one line of operator input.
pub fn handle_line(line: &str, fifo: &CommandFifo, operator: &OperatorState) -> LineOutcome {
    match line.trim().to_ascii_lowercase().as_str() {
        "quit" | "exit" => {
            info!("Operator requested stop");
            operator.request_stop();
            return LineOutcome::Quit;
        }
        "status" => {
            info!(
                queue_size = fifo.len(),
                capacity = fifo.capacity(),
                accepted_total = fifo.accepted_total(),
                "Command queue status"
            );
            return LineOutcome::Status;
        }
        "clear" => {
            let dropped = fifo.clear();
            info!(dropped, "Command queue cleared");
            return LineOutcome::Cleared;
        }
        _ => {}
    }

    let mut queued = 0_usize;
    let mut rejected = 0_usize;
    for token in line.split_whitespace() {
        // Rejections are logged by the FIFO itself.
        if fifo.add(token).is_ok() {
            queued = queued.saturating_add(1);
        } else {
            rejected = rejected.saturating_add(1);
        }
    }
    LineOutcome::Queued { queued, rejected }
}

/// Read `reader` line by line until EOF or a quit command.
///
/// EOF also requests a stop: with no more input the session has no
/// operator left.
pub fn read_commands<R: BufRead>(reader: R, fifo: &CommandFifo, operator: &OperatorState) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if handle_line(&line, fifo, operator) == LineOutcome::Quit {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read command input");
                break;
            }
        }
    }
    info!("Command input closed");
    operator.request_stop();
}

/// Spawn the stdin reader thread.
///
/// The thread is detached: a blocked stdin read cannot be interrupted, so
/// the process exits without joining it.
pub fn spawn_stdin_reader(fifo: Arc<CommandFifo>, operator: Arc<OperatorState>) {
    let spawned = std::thread::Builder::new()
        .name("tickwatch-stdin".to_owned())
        .spawn(move || {
            let stdin = std::io::stdin();
            read_commands(stdin.lock(), &fifo, &operator);
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start command input thread; commands disabled");
    }
}
