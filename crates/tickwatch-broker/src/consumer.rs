//! Per-event-type consumption tasks.
//!
//! Each subscribed event type gets one task that owns its own NATS
//! connection and a pull consumer filtered to that type's subject. The
//! task pulls one message at a time (`max_ack_pending = 1`), hands it to
//! every handler currently registered for the type, and settles it:
//!
//! | Outcome | Settlement |
//! |---------|------------|
//! | at least one handler succeeded, or no handlers registered | ack |
//! | body not a JSON object, or every handler failed | nak (redeliver) |
//! | as above on the last allowed delivery | term (drop) |
//!
//! Handlers are isolated from one another: an error or a panic in one is
//! logged and the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_nats::jetstream::AckKind;
use async_nats::jetstream::consumer::PullConsumer;
use futures::StreamExt as _;
use parking_lot::RwLock;
use tickwatch_bus::Handler;
use tickwatch_types::{EventType, Payload};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::wire;

/// Handlers shared between the subscribing thread and consumption tasks.
pub(crate) type Registry = Arc<RwLock<HashMap<EventType, Vec<Handler>>>>;

/// What happened when a payload was handed to the registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Nobody is subscribed locally any more.
    NoHandlers,
    /// At least one handler succeeded.
    Delivered {
        /// Handlers that failed or panicked.
        failed: usize,
    },
    /// Every registered handler failed.
    AllFailed {
        /// Number of handlers that ran.
        handlers: usize,
    },
}

/// Consecutive pull errors after which the consumer is considered gone.
///
/// A deleted consumer (for example one removed by the server after a long
/// disconnect) yields an endless run of errors rather than ending the stream.
pub(crate) const MAX_CONSECUTIVE_PULL_ERRORS: u32 = 10;

/// Why a consumption task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsumerExit {
    /// The bus was closed or dropped.
    Shutdown,
    /// The message stream could not be opened.
    OpenFailed,
    /// The server ended the message stream.
    StreamEnded,
    /// Pulls kept failing.
    PullFailed {
        /// Errors seen in a row before giving up.
        errors: u32,
    },
}

/// Count a pull error; `true` once the run of errors is terminal.
pub(crate) const fn pull_failed(consecutive: &mut u32) -> bool {
    *consecutive = consecutive.saturating_add(1);
    *consecutive >= MAX_CONSECUTIVE_PULL_ERRORS
}

/// How a message is settled with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack,
    Nak,
    Term,
}

/// Run every handler for `event_type` against `payload`, isolating each.
pub(crate) fn dispatch(registry: &Registry, event_type: EventType, payload: &Payload) -> Dispatch {
    let snapshot: Vec<Handler> = registry
        .read()
        .get(&event_type)
        .cloned()
        .unwrap_or_default();
    if snapshot.is_empty() {
        return Dispatch::NoHandlers;
    }

    let mut failed = 0_usize;
    for handler in &snapshot {
        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed = failed.saturating_add(1);
                error!(event_type = %event_type, error = %e, "event handler failed");
            }
            Err(_) => {
                failed = failed.saturating_add(1);
                error!(event_type = %event_type, "event handler panicked");
            }
        }
    }

    if failed == snapshot.len() {
        Dispatch::AllFailed { handlers: failed }
    } else {
        Dispatch::Delivered { failed }
    }
}

/// Decide how to settle a message.
///
/// `dispatch` is `None` when the body could not be decoded. `delivered` is
/// the server's delivery count for this message (1 on first delivery).
pub(crate) const fn settle(dispatch: Option<Dispatch>, delivered: i64, max_deliver: i64) -> Settlement {
    match dispatch {
        Some(Dispatch::NoHandlers | Dispatch::Delivered { .. }) => Settlement::Ack,
        None | Some(Dispatch::AllFailed { .. }) => {
            if max_deliver > 0 && delivered >= max_deliver {
                Settlement::Term
            } else {
                Settlement::Nak
            }
        }
    }
}

/// Everything a consumption task needs.
pub(crate) struct ConsumerTask {
    /// Keeps the task's own connection alive for as long as it runs.
    pub(crate) client: async_nats::Client,
    pub(crate) consumer: PullConsumer,
    pub(crate) event_type: EventType,
    pub(crate) registry: Registry,
    pub(crate) max_deliver: i64,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl ConsumerTask {
    /// Pull and dispatch messages until shutdown is signalled, the message
    /// stream ends, or pulls keep failing.
    pub(crate) async fn run(mut self) -> ConsumerExit {
        let event_type = self.event_type;
        // The bus may have closed while this consumer was being created.
        if *self.shutdown.borrow() {
            return ConsumerExit::Shutdown;
        }
        let mut messages = match self.consumer.messages().await {
            Ok(messages) => messages,
            Err(e) => {
                error!(event_type = %event_type, error = %e, "failed to open message stream");
                return ConsumerExit::OpenFailed;
            }
        };
        info!(event_type = %event_type, "consumer started");

        let mut consecutive_errors = 0_u32;
        let exit = loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break ConsumerExit::Shutdown;
                    }
                }
                next = messages.next() => {
                    match next {
                        Some(Ok(message)) => {
                            consecutive_errors = 0;
                            self.handle(&message).await;
                        }
                        Some(Err(e)) => {
                            warn!(event_type = %event_type, error = %e, "message pull failed");
                            if pull_failed(&mut consecutive_errors) {
                                error!(
                                    event_type = %event_type,
                                    errors = consecutive_errors,
                                    "consumer unusable, giving up"
                                );
                                break ConsumerExit::PullFailed { errors: consecutive_errors };
                            }
                        }
                        None => {
                            warn!(event_type = %event_type, "message stream ended");
                            break ConsumerExit::StreamEnded;
                        }
                    }
                }
            }
        };

        drop(messages);
        if let Err(e) = self.client.flush().await {
            debug!(event_type = %event_type, error = %e, "flush on consumer shutdown failed");
        }
        info!(event_type = %event_type, exit = ?exit, "consumer stopped");
        exit
    }

    async fn handle(&self, message: &async_nats::jetstream::Message) {
        let event_type = self.event_type;
        let delivered = message.info().map_or(1, |info| info.delivered);

        let outcome = match wire::decode(&message.payload) {
            Ok(payload) => Some(dispatch(&self.registry, event_type, &payload)),
            Err(e) => {
                warn!(event_type = %event_type, error = %e, delivered, "undecodable message body");
                None
            }
        };
        match outcome {
            Some(Dispatch::Delivered { failed }) if failed > 0 => {
                warn!(event_type = %event_type, failed, "some handlers failed; acking anyway");
            }
            Some(Dispatch::AllFailed { handlers }) => {
                warn!(event_type = %event_type, handlers, delivered, "every handler failed");
            }
            Some(Dispatch::NoHandlers) => {
                debug!(event_type = %event_type, "no local handlers; dropping message");
            }
            _ => {}
        }

        let result = match settle(outcome, delivered, self.max_deliver) {
            Settlement::Ack => {
                debug!(event_type = %event_type, delivered, "message acked");
                message.ack().await
            }
            Settlement::Nak => {
                warn!(event_type = %event_type, delivered, "message nacked for redelivery");
                message.ack_with(AckKind::Nak(None)).await
            }
            Settlement::Term => {
                error!(
                    event_type = %event_type,
                    delivered,
                    "message dropped after final delivery attempt"
                );
                message.ack_with(AckKind::Term).await
            }
        };
        if let Err(e) = result {
            warn!(event_type = %event_type, error = %e, "failed to settle message");
        }
    }
}

impl std::fmt::Debug for ConsumerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerTask")
            .field("event_type", &self.event_type)
            .field("max_deliver", &self.max_deliver)
            .finish_non_exhaustive()
    }
}
