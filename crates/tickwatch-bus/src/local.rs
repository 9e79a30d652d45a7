//! In-process, synchronous event bus.
//!
//! [`LocalBus`] calls handlers directly on the publishing thread, in the
//! order they were registered. There is no queue, no network, and no
//! persistence: a publish is finished when the last handler returns.
//!
//! # Failure semantics
//!
//! Handlers are **not** isolated from each other. When a handler returns an
//! error, [`LocalBus::publish`] stops immediately and returns
//! [`BusError::Handler`]; handlers registered after the failing one do not
//! see that event. Callers that need isolation must wrap their handlers
//! (log and return `Ok`). A slow handler stalls the publisher, which for the
//! detector means stalling the console loop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tickwatch_types::{EventType, Payload};
use tracing::debug;

use crate::{BusError, EventBus, Handler};

/// Synchronous fan-out bus for subscribers in the same process.
#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<HashMap<EventType, Vec<Handler>>>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers currently registered for `event_type`.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers.read().get(&event_type).map_or(0, Vec::len)
    }
}

impl EventBus for LocalBus {
    fn subscribe(&self, event_type: EventType, handler: Handler) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(event_type).or_default();
        list.push(handler);
        debug!(event_type = %event_type, handlers = list.len(), "local subscription added");
    }

    fn unsubscribe(&self, event_type: EventType, handler: &Handler) {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return;
        };
        if let Some(index) = list.iter().position(|h| Arc::ptr_eq(h, handler)) {
            list.remove(index);
            debug!(event_type = %event_type, handlers = list.len(), "local subscription removed");
        }
    }

    /// Invoke every handler for `event_type` in registration order.
    ///
    /// The handler list is copied before delivery, so handlers may
    /// subscribe or unsubscribe without deadlocking; such changes take
    /// effect from the next publish.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Handler`] from the first failing handler.
    fn publish(&self, event_type: EventType, payload: Payload) -> Result<(), BusError> {
        let snapshot: Vec<Handler> = self
            .handlers
            .read()
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        for handler in &snapshot {
            handler(&payload).map_err(|source| BusError::Handler { event_type, source })?;
        }
        Ok(())
    }

    fn clear(&self) {
        self.handlers.write().clear();
        debug!("local subscriptions cleared");
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let total: usize = handlers.values().map(Vec::len).sum();
        f.debug_struct("LocalBus")
            .field("event_types", &handlers.len())
            .field("handlers", &total)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{HandlerError, handler};

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Handler {
        let log = Arc::clone(log);
        handler(move |_| {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = LocalBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventType::BattleStart, recorder(&log, "h1"));
        bus.subscribe(EventType::BattleStart, recorder(&log, "h2"));

        bus.publish(EventType::BattleStart, Payload::new()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[test]
    fn unsubscribe_stops_delivery_to_that_handler_only() {
        let bus = LocalBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h1 = recorder(&log, "h1");
        let h2 = recorder(&log, "h2");
        bus.subscribe(EventType::BattleStart, Arc::clone(&h1));
        bus.subscribe(EventType::BattleStart, Arc::clone(&h2));

        bus.unsubscribe(EventType::BattleStart, &h2);
        bus.publish(EventType::BattleStart, Payload::new()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["h1"]);
    }

    #[test]
    fn unsubscribe_removes_only_first_duplicate() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let h = handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.subscribe(EventType::Step, Arc::clone(&h));
        bus.subscribe(EventType::Step, Arc::clone(&h));
        assert_eq!(bus.subscriber_count(EventType::Step), 2);

        bus.unsubscribe(EventType::Step, &h);
        bus.publish(EventType::Step, Payload::new()).unwrap();

        assert_eq!(bus.subscriber_count(EventType::Step), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_unknown_handler_is_noop() {
        let bus = LocalBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventType::Step, recorder(&log, "kept"));

        bus.unsubscribe(EventType::Step, &recorder(&log, "stranger"));
        bus.unsubscribe(EventType::GameEnd, &recorder(&log, "stranger"));

        assert_eq!(bus.subscriber_count(EventType::Step), 1);
    }

    #[test]
    fn failing_handler_aborts_remaining_deliveries() {
        let bus = LocalBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventType::HealthChange, recorder(&log, "before"));
        bus.subscribe(
            EventType::HealthChange,
            handler(|_| Err(HandlerError::new("boom"))),
        );
        bus.subscribe(EventType::HealthChange, recorder(&log, "after"));

        let err = bus
            .publish(EventType::HealthChange, Payload::new())
            .unwrap_err();

        assert!(matches!(
            err,
            BusError::Handler {
                event_type: EventType::HealthChange,
                ..
            }
        ));
        assert_eq!(*log.lock().unwrap(), vec!["before"]);
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        assert!(bus.publish(EventType::GameStart, Payload::new()).is_ok());
    }

    #[test]
    fn clear_drops_every_subscription() {
        let bus = LocalBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventType::Step, recorder(&log, "a"));
        bus.subscribe(EventType::BattleEnd, recorder(&log, "b"));

        bus.clear();
        bus.publish(EventType::Step, Payload::new()).unwrap();
        bus.publish(EventType::BattleEnd, Payload::new()).unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn handler_receives_payload() {
        let bus = LocalBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventType::CommandExecuted,
            handler(move |payload| {
                *sink.lock().unwrap() = payload.get("command").cloned();
                Ok(())
            }),
        );

        let mut payload = Payload::new();
        payload.insert("command".to_owned(), serde_json::json!("a"));
        bus.publish(EventType::CommandExecuted, payload).unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!("a")));
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = Arc::new(LocalBus::new());
        let inner_bus = Arc::clone(&bus);
        bus.subscribe(
            EventType::GameStart,
            handler(move |_| {
                inner_bus.subscribe(EventType::GameEnd, handler(|_| Ok(())));
                Ok(())
            }),
        );

        bus.publish(EventType::GameStart, Payload::new()).unwrap();

        assert_eq!(bus.subscriber_count(EventType::GameEnd), 1);
    }
}
