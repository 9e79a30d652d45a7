//! Bounded queue between an external command source and the tick loop.
//!
//! A producer (the stdin reader, a socket, a test) calls
//! [`CommandFifo::add`] with raw tokens; the driving loop calls
//! [`CommandFifo::next`] at its own cadence. Neither side blocks: a full
//! queue rejects new commands instead of applying backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tickwatch_types::{Button, ParseButtonError};
use tracing::{debug, warn};

/// Why a command was not queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    /// The token is not in the command vocabulary.
    #[error(transparent)]
    Invalid(#[from] ParseButtonError),

    /// The queue already holds `capacity` commands.
    #[error("command queue full ({capacity} pending)")]
    Full {
        /// The configured capacity.
        capacity: usize,
    },
}

/// Thread-safe bounded FIFO of validated buttons.
#[derive(Debug)]
pub struct CommandFifo {
    queue: Mutex<VecDeque<Button>>,
    capacity: usize,
    accepted: AtomicU64,
}

impl CommandFifo {
    /// Create a FIFO holding at most `capacity` commands (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            accepted: AtomicU64::new(0),
        }
    }

    /// Validate `token` and enqueue it.
    ///
    /// # Errors
    ///
    /// [`CommandRejected::Invalid`] for tokens outside the vocabulary and
    /// [`CommandRejected::Full`] when the queue is at capacity. Neither
    /// mutates the queue or the accepted counter.
    pub fn add(&self, token: &str) -> Result<Button, CommandRejected> {
        let button: Button = token.parse().inspect_err(|err| {
            warn!(error = %err, "invalid command ignored");
        })?;

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            warn!(command = %button, capacity = self.capacity, "command queue full");
            return Err(CommandRejected::Full {
                capacity: self.capacity,
            });
        }
        queue.push_back(button);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(command = %button, queue_size = queue.len(), "command queued");
        Ok(button)
    }

    /// Dequeue the oldest command, if any.
    pub fn next(&self) -> Option<Button> {
        self.queue.lock().pop_front()
    }

    /// Commands currently waiting.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether no commands are waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Maximum number of pending commands.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commands accepted over the FIFO's lifetime.
    pub fn accepted_total(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Drop every pending command and return how many were dropped.
    ///
    /// The accepted counter is left alone.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl Default for CommandFifo {
    fn default() -> Self {
        Self::new(crate::config::CommandConfig::default().capacity)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn commands_come_out_in_order() {
        let fifo = CommandFifo::new(10);
        fifo.add("up").unwrap();
        fifo.add(" A ").unwrap();
        fifo.add("Start").unwrap();

        assert_eq!(fifo.next(), Some(Button::Up));
        assert_eq!(fifo.next(), Some(Button::A));
        assert_eq!(fifo.next(), Some(Button::Start));
        assert_eq!(fifo.next(), None);
    }

    #[test]
    fn invalid_token_leaves_state_unchanged() {
        let fifo = CommandFifo::new(10);
        let err = fifo.add("jump").unwrap_err();

        assert!(matches!(err, CommandRejected::Invalid(_)));
        assert!(fifo.is_empty());
        assert_eq!(fifo.accepted_total(), 0);
    }

    #[test]
    fn full_queue_rejects_without_counting() {
        let fifo = CommandFifo::new(2);
        fifo.add("a").unwrap();
        fifo.add("b").unwrap();

        let err = fifo.add("up").unwrap_err();

        assert_eq!(err, CommandRejected::Full { capacity: 2 });
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.accepted_total(), 2);
    }

    #[test]
    fn rejection_when_full_keeps_queue_order() {
        let fifo = CommandFifo::new(2);
        assert_eq!(fifo.add("up").unwrap(), Button::Up);
        assert_eq!(fifo.add("down").unwrap(), Button::Down);

        assert_eq!(
            fifo.add("left").unwrap_err(),
            CommandRejected::Full { capacity: 2 }
        );

        assert_eq!(fifo.next(), Some(Button::Up));
        assert_eq!(fifo.next(), Some(Button::Down));
        assert_eq!(fifo.next(), None);
        assert_eq!(fifo.accepted_total(), 2);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let fifo = CommandFifo::new(0);
        assert_eq!(fifo.capacity(), 1);
        assert!(fifo.add("select").is_ok());
        assert!(fifo.add("select").is_err());
    }

    #[test]
    fn clear_keeps_lifetime_counter() {
        let fifo = CommandFifo::new(5);
        fifo.add("left").unwrap();
        fifo.add("right").unwrap();

        assert_eq!(fifo.clear(), 2);
        assert!(fifo.is_empty());
        assert_eq!(fifo.accepted_total(), 2);
    }

    #[test]
    fn producer_and_consumer_threads_share_the_queue() {
        let fifo = Arc::new(CommandFifo::new(1000));
        let producer = {
            let fifo = Arc::clone(&fifo);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    fifo.add("down").unwrap();
                }
            })
        };
        producer.join().unwrap();

        let mut drained = 0;
        while fifo.next().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 500);
        assert_eq!(fifo.accepted_total(), 500);
    }
}
