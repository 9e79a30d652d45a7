//! Per-event-type delivery counters.
//!
//! Both binaries use an [`EventTally`] as their demonstration subscriber:
//! it counts every delivery, remembers the latest payload, and prints a
//! summary at shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tickwatch_bus::{EventBus, Handler, handler};
use tickwatch_types::{EventType, Payload};
use tracing::{debug, info};

/// What has been seen for one event type.
#[derive(Debug, Clone, PartialEq)]
pub struct TallyEntry {
    /// Deliveries received.
    pub count: u64,
    /// Payload of the most recent delivery.
    pub last_payload: Payload,
    /// When the most recent delivery arrived.
    pub last_seen: DateTime<Utc>,
}

/// Thread-safe event counters, keyed by event type.
#[derive(Debug, Default)]
pub struct EventTally {
    entries: Mutex<BTreeMap<EventType, TallyEntry>>,
}

impl EventTally {
    /// Create an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one delivery of `event_type`.
    pub fn record(&self, event_type: EventType, payload: &Payload) {
        let mut entries = self.entries.lock();
        let now = Utc::now();
        let entry = entries.entry(event_type).or_insert_with(|| TallyEntry {
            count: 0,
            last_payload: Payload::new(),
            last_seen: now,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last_payload.clone_from(payload);
        entry.last_seen = now;
        debug!(event_type = %event_type, count = entry.count, "event tallied");
    }

    /// A handler that records deliveries of `event_type` into this tally.
    pub fn handler_for(self: &Arc<Self>, event_type: EventType) -> Handler {
        let tally = Arc::clone(self);
        handler(move |payload| {
            tally.record(event_type, payload);
            Ok(())
        })
    }

    /// Subscribe this tally to every type in `event_types`.
    pub fn subscribe_all<B: EventBus + ?Sized>(self: &Arc<Self>, bus: &B, event_types: &[EventType]) {
        for &event_type in event_types {
            bus.subscribe(event_type, self.handler_for(event_type));
        }
    }

    /// Deliveries seen for `event_type`.
    pub fn count(&self, event_type: EventType) -> u64 {
        self.entries.lock().get(&event_type).map_or(0, |e| e.count)
    }

    /// Deliveries seen across all types.
    pub fn total(&self) -> u64 {
        self.entries
            .lock()
            .values()
            .fold(0_u64, |acc, e| acc.saturating_add(e.count))
    }

    /// Copy of every entry, ordered by event type.
    pub fn snapshot(&self) -> BTreeMap<EventType, TallyEntry> {
        self.entries.lock().clone()
    }

    /// Log one line per event type seen.
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            info!("No events received");
            return;
        }
        for (event_type, entry) in &snapshot {
            info!(
                event_type = %event_type,
                count = entry.count,
                last_seen = %entry.last_seen.to_rfc3339(),
                last_payload = %serde_json::Value::Object(entry.last_payload.clone()),
                "Event tally"
            );
        }
    }
}
