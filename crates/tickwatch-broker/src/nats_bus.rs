//! [`EventBus`] implementation over NATS `JetStream`.
//!
//! # Sync/Async Bridge
//!
//! [`EventBus`] is synchronous because the detector runs inside the
//! per-tick console loop. [`NatsBus`] keeps the Tokio runtime [`Handle`]
//! it was created on and bridges each call with
//! [`tokio::task::block_in_place`] + [`Handle::block_on`]. That requires a
//! multi-threaded runtime; calling it from a current-thread runtime
//! panics inside Tokio.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_nats::HeaderMap;
use async_nats::jetstream::consumer::{DeliverPolicy, PullConsumer, pull};
use async_nats::jetstream::{self, stream};
use parking_lot::Mutex;
use tickwatch_bus::{BusError, EventBus, Handler};
use tickwatch_types::{EventType, Payload};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BrokerConfig, QueueBinding};
use crate::consumer::{ConsumerExit, ConsumerTask, Registry};
use crate::error::BrokerError;
use crate::wire;

/// Consumption state of one event type.
enum ConsumerSlot {
    /// A subscribe call is creating the consumer.
    Starting,
    /// The consumption task is running or has stopped on its own.
    Running(JoinHandle<ConsumerExit>),
}

/// Distributed event bus backed by a NATS `JetStream` stream.
///
/// Publishing is durable: the call returns once the stream has stored the
/// message. Each subscribed event type gets its own consumption task and
/// connection; handlers run on those tasks, isolated from one another.
pub struct NatsBus {
    config: Arc<BrokerConfig>,
    client: async_nats::Client,
    jetstream: jetstream::Context,
    handle: Handle,
    registry: Registry,
    tasks: Mutex<HashMap<EventType, ConsumerSlot>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl NatsBus {
    /// Connect to the server and make sure the event stream exists.
    ///
    /// Must be called from inside a multi-threaded Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] when every connection attempt
    /// fails, [`BrokerError::Stream`] when the stream cannot be created,
    /// and [`BrokerError::Runtime`] outside a Tokio runtime.
    pub async fn connect(config: BrokerConfig) -> Result<Self, BrokerError> {
        let handle = Handle::try_current()
            .map_err(|e| BrokerError::Runtime(format!("no tokio runtime available: {e}")))?;

        let client = connect_with_retry(&config).await?;
        let jetstream = jetstream::new(client.clone());
        ensure_stream(&jetstream, &config).await?;

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            client,
            jetstream,
            handle,
            registry: Arc::default(),
            tasks: Mutex::new(HashMap::new()),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// The configuration this bus was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Event types whose consumption task is alive.
    ///
    /// A type drops out of this list when its task stops on its own, for
    /// example after the server deleted the consumer.
    pub fn consuming(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self
            .tasks
            .lock()
            .iter()
            .filter_map(|(event_type, slot)| match slot {
                ConsumerSlot::Running(task) if !task.is_finished() => Some(*event_type),
                _ => None,
            })
            .collect();
        types.sort_unstable();
        types
    }

    /// Publish and wait for the stream acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] if the server rejects the message
    /// or never acknowledges it.
    pub async fn publish_async(
        &self,
        event_type: EventType,
        payload: &Payload,
    ) -> Result<(), BrokerError> {
        let subject = wire::subject(&self.config.subject_prefix, event_type);
        let body = wire::encode(payload)?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", wire::CONTENT_TYPE);

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, body.into())
            .await
            .map_err(|e| BrokerError::Publish {
                subject: subject.clone(),
                message: e.to_string(),
            })?;
        let ack = ack.await.map_err(|e| BrokerError::Publish {
            subject: subject.clone(),
            message: e.to_string(),
        })?;

        debug!(subject = %subject, sequence = ack.sequence, "event published");
        Ok(())
    }

    /// Stop every consumption task and flush the publishing connection.
    ///
    /// Waits up to `shutdown_timeout_ms` for each task. Calling it again
    /// is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing NATS bus");
        self.shutdown.send_replace(true);

        let tasks: Vec<(EventType, JoinHandle<ConsumerExit>)> = self
            .tasks
            .lock()
            .drain()
            .filter_map(|(event_type, slot)| match slot {
                ConsumerSlot::Running(task) => Some((event_type, task)),
                ConsumerSlot::Starting => None,
            })
            .collect();
        for (event_type, task) in tasks {
            match tokio::time::timeout(self.config.shutdown_timeout(), task).await {
                Ok(Ok(exit)) => debug!(event_type = %event_type, exit = ?exit, "consumer joined"),
                Ok(Err(e)) => warn!(event_type = %event_type, error = %e, "consumer task failed"),
                Err(_) => warn!(event_type = %event_type, "consumer did not stop in time"),
            }
        }

        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS on close");
        }
        info!("NATS bus closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register `handler` and make sure `event_type` is being consumed.
    ///
    /// The first subscription for a type creates its consumer before
    /// returning, so events published afterwards are not missed. If that
    /// fails the handler is removed again and the error is returned. A
    /// subscription for a type whose consumer is already running, or is
    /// being created by another caller, only registers the handler.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`], [`BrokerError::Stream`], or
    /// [`BrokerError::Consumer`] when the consumer cannot be created.
    pub async fn try_subscribe(
        &self,
        event_type: EventType,
        handler: Handler,
    ) -> Result<(), BrokerError> {
        self.registry
            .write()
            .entry(event_type)
            .or_default()
            .push(Arc::clone(&handler));

        let claimed = !self.is_closed() && claim_slot(&mut self.tasks.lock(), event_type);
        if !claimed {
            return Ok(());
        }

        match self.start_consumer(event_type).await {
            Ok(task) => {
                self.tasks.lock().insert(event_type, ConsumerSlot::Running(task));
                info!(event_type = %event_type, "subscribed");
                Ok(())
            }
            Err(e) => {
                self.tasks.lock().remove(&event_type);
                remove_handler(&mut self.registry.write(), event_type, &handler);
                Err(e)
            }
        }
    }

    /// Open a dedicated connection and consumer for `event_type` and
    /// spawn the task that drains it.
    async fn start_consumer(
        &self,
        event_type: EventType,
    ) -> Result<JoinHandle<ConsumerExit>, BrokerError> {
        let client = connect_with_retry(&self.config).await?;
        let context = jetstream::new(client.clone());
        let stream = ensure_stream(&context, &self.config).await?;
        let consumer = create_consumer(&stream, &self.config, event_type).await?;

        let task = ConsumerTask {
            client,
            consumer,
            event_type,
            registry: Arc::clone(&self.registry),
            max_deliver: self.config.max_deliver,
            shutdown: self.shutdown.subscribe(),
        };
        Ok(self.handle.spawn(task.run()))
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| self.handle.block_on(future))
    }
}

impl EventBus for NatsBus {
    /// Errors cannot be returned through the trait, so a failed consumer
    /// start is logged and the handler is not kept. Use
    /// [`NatsBus::try_subscribe`] to observe the failure.
    fn subscribe(&self, event_type: EventType, handler: Handler) {
        if let Err(e) = self.block_on(self.try_subscribe(event_type, handler)) {
            error!(event_type = %event_type, error = %e, "failed to start consumer");
        }
    }

    /// Only the local registry changes; the consumption task keeps running
    /// and acks messages that no longer have handlers.
    fn unsubscribe(&self, event_type: EventType, handler: &Handler) {
        let mut registry = self.registry.write();
        if remove_handler(&mut registry, event_type, handler) {
            debug!(event_type = %event_type, "handler removed");
        }
    }

    fn publish(&self, event_type: EventType, payload: Payload) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Publish {
                event_type,
                message: "bus is closed".to_owned(),
            });
        }
        self.block_on(self.publish_async(event_type, &payload))
            .map_err(|e| BusError::Publish {
                event_type,
                message: e.to_string(),
            })
    }

    fn clear(&self) {
        self.registry.write().clear();
        debug!("all handlers removed");
    }
}

impl Drop for NatsBus {
    fn drop(&mut self) {
        // Tasks notice the signal and drop their connections on their own.
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("nats_url", &self.config.nats_url)
            .field("stream", &self.config.stream)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Mark `event_type` as starting unless a live or starting consumer
/// already exists. Returns `true` when the caller must start it.
fn claim_slot(tasks: &mut HashMap<EventType, ConsumerSlot>, event_type: EventType) -> bool {
    match tasks.get(&event_type) {
        Some(ConsumerSlot::Starting) => false,
        Some(ConsumerSlot::Running(task)) if !task.is_finished() => false,
        _ => {
            tasks.insert(event_type, ConsumerSlot::Starting);
            true
        }
    }
}

/// Remove the first registration of `handler`. Returns whether one was found.
fn remove_handler(
    registry: &mut HashMap<EventType, Vec<Handler>>,
    event_type: EventType,
    handler: &Handler,
) -> bool {
    let Some(list) = registry.get_mut(&event_type) else {
        return false;
    };
    let Some(index) = list.iter().position(|h| Arc::ptr_eq(h, handler)) else {
        return false;
    };
    list.remove(index);
    if list.is_empty() {
        registry.remove(&event_type);
    }
    true
}

/// Connect with bounded retry.
pub(crate) async fn connect_with_retry(
    config: &BrokerConfig,
) -> Result<async_nats::Client, BrokerError> {
    let attempts = config.connect_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        info!(url = %config.nats_url, attempt, attempts, "connecting to NATS server");
        match async_nats::connect(config.nats_url.as_str()).await {
            Ok(client) => {
                info!("NATS connection established");
                return Ok(client);
            }
            Err(e) => {
                warn!(url = %config.nats_url, attempt, error = %e, "NATS connection failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
        }
    }

    Err(BrokerError::Unavailable {
        url: config.nats_url.clone(),
        attempts,
        message: last_error,
    })
}

/// Look up the event stream, creating it with file storage if missing.
pub(crate) async fn ensure_stream(
    context: &jetstream::Context,
    config: &BrokerConfig,
) -> Result<stream::Stream, BrokerError> {
    context
        .get_or_create_stream(stream::Config {
            name: config.stream.clone(),
            subjects: vec![wire::stream_subjects(&config.subject_prefix)],
            storage: stream::StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| BrokerError::Stream {
            stream: config.stream.clone(),
            message: e.to_string(),
        })
}

/// Build the consumer configuration for one event type.
pub(crate) fn consumer_config(config: &BrokerConfig, event_type: EventType) -> pull::Config {
    let filter_subject = wire::subject(&config.subject_prefix, event_type);
    let base = pull::Config {
        filter_subject,
        deliver_policy: DeliverPolicy::New,
        max_ack_pending: 1,
        max_deliver: config.max_deliver,
        ..Default::default()
    };
    match config.queue_binding() {
        QueueBinding::Broadcast => pull::Config {
            inactive_threshold: config.inactive_threshold(),
            ..base
        },
        QueueBinding::Shared { group } => pull::Config {
            durable_name: Some(wire::consumer_name(&group, event_type)),
            ..base
        },
    }
}

async fn create_consumer(
    stream: &stream::Stream,
    config: &BrokerConfig,
    event_type: EventType,
) -> Result<PullConsumer, BrokerError> {
    let consumer_config = consumer_config(config, event_type);
    let subject = consumer_config.filter_subject.clone();
    let to_error = |e: &dyn std::fmt::Display| BrokerError::Consumer {
        subject: subject.clone(),
        message: e.to_string(),
    };

    match consumer_config.durable_name.clone() {
        Some(name) => {
            debug!(consumer = %name, "binding shared consumer");
            stream
                .get_or_create_consumer(&name, consumer_config)
                .await
                .map_err(|e| to_error(&e))
        }
        None => stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| to_error(&e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tickwatch_bus::handler;

    use super::*;
    use crate::config::BindingMode;

    #[test]
    fn failed_start_rolls_back_only_the_new_handler() {
        let existing = handler(|_| Ok(()));
        let added = handler(|_| Ok(()));
        let mut registry = HashMap::new();
        registry.insert(EventType::Step, vec![Arc::clone(&existing), Arc::clone(&added)]);

        assert!(remove_handler(&mut registry, EventType::Step, &added));

        let left = registry.get(&EventType::Step).unwrap();
        assert_eq!(left.len(), 1);
        assert!(Arc::ptr_eq(left.first().unwrap(), &existing));
        assert!(!remove_handler(&mut registry, EventType::Step, &added));
    }

    #[test]
    fn removing_last_handler_leaves_no_entry() {
        let only = handler(|_| Ok(()));
        let mut registry = HashMap::new();
        registry.insert(EventType::BattleStart, vec![Arc::clone(&only)]);

        assert!(remove_handler(&mut registry, EventType::BattleStart, &only));
        assert!(registry.is_empty());
        assert!(!remove_handler(&mut registry, EventType::GameEnd, &only));
    }

    #[test]
    fn only_one_caller_claims_a_new_type() {
        let mut tasks = HashMap::new();

        assert!(claim_slot(&mut tasks, EventType::Step));
        assert!(!claim_slot(&mut tasks, EventType::Step));
        assert!(claim_slot(&mut tasks, EventType::BattleEnd));
    }

    #[tokio::test]
    async fn claims_respect_live_tasks_and_reclaim_dead_ones() {
        let mut tasks = HashMap::new();
        let (stop, mut stopped) = watch::channel(false);
        let live = tokio::spawn(async move {
            let _ = stopped.changed().await;
            ConsumerExit::Shutdown
        });
        tasks.insert(EventType::Step, ConsumerSlot::Running(live));
        let dead = tokio::spawn(async { ConsumerExit::StreamEnded });
        while !dead.is_finished() {
            tokio::task::yield_now().await;
        }
        tasks.insert(EventType::HealthChange, ConsumerSlot::Running(dead));

        assert!(!claim_slot(&mut tasks, EventType::Step));
        assert!(claim_slot(&mut tasks, EventType::HealthChange));
        assert!(matches!(
            tasks.get(&EventType::HealthChange),
            Some(ConsumerSlot::Starting)
        ));

        stop.send_replace(true);
    }

    #[test]
    fn broadcast_consumer_is_ephemeral_and_filtered() {
        let config = BrokerConfig::default();
        let consumer = consumer_config(&config, EventType::Step);

        assert_eq!(consumer.filter_subject, "tickwatch.events.step");
        assert_eq!(consumer.durable_name, None);
        assert_eq!(consumer.max_ack_pending, 1);
        assert_eq!(consumer.max_deliver, 5);
        assert!(matches!(consumer.deliver_policy, DeliverPolicy::New));
        assert_eq!(consumer.inactive_threshold, config.inactive_threshold());
    }

    #[test]
    fn shared_consumer_is_durable_per_group_and_type() {
        let config = BrokerConfig {
            binding: BindingMode::Shared,
            group: "stats".to_owned(),
            ..BrokerConfig::default()
        };
        let consumer = consumer_config(&config, EventType::BattleEnd);

        assert_eq!(consumer.durable_name.as_deref(), Some("stats_battle_end"));
        assert_eq!(consumer.filter_subject, "tickwatch.events.battle_end");
    }
}
