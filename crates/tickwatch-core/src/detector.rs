//! Edge-triggered state-change detection.
//!
//! [`StateChangeDetector::update`] is called once per console tick. It
//! samples console memory, compares each tracked value against the last
//! value it latched, and publishes an event for every transition:
//!
//! | Transition | Event |
//! |------------|-------|
//! | position differs from a previous position | `step` |
//! | position differs from the latch (first read included) | `position_change` |
//! | battle flag false -> true | `battle_start` |
//! | battle flag true -> false | `battle_end` |
//! | HP pair differs and current HP > 0 (every Nth tick) | `health_change` |
//!
//! An unreadable position skips the rest of the tick. There are no retries:
//! a failed read is "no data this tick", never an error.

use std::sync::Arc;

use tickwatch_bus::{BusError, EventBus, publish_event};
use tickwatch_types::{
    BattleEndEvent, BattleStartEvent, HealthChangeEvent, HpPair, Position, PositionChangeEvent,
    StepEvent,
};
use tracing::debug;

use crate::config::DetectorConfig;
use crate::console::Console;
use crate::memory_map::MemoryMap;

/// Last observed value of each tracked dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LatchedState {
    position: Option<Position>,
    in_battle: bool,
    hp: Option<HpPair>,
}

/// Turns polled console memory into edge-triggered events.
pub struct StateChangeDetector {
    bus: Arc<dyn EventBus>,
    memory: MemoryMap,
    hp_poll_interval: u64,
    debug_log_interval: Option<u64>,
    tick: u64,
    latch: LatchedState,
}

impl StateChangeDetector {
    /// Create a detector with Pokemon Red addresses and default polling.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_config(bus, MemoryMap::default(), &DetectorConfig::default())
    }

    /// Create a detector with explicit addresses and polling settings.
    pub fn with_config(bus: Arc<dyn EventBus>, memory: MemoryMap, config: &DetectorConfig) -> Self {
        Self {
            bus,
            memory,
            hp_poll_interval: config.hp_poll_interval,
            debug_log_interval: config.debug.then_some(config.debug_log_interval),
            tick: 0,
            latch: LatchedState::default(),
        }
    }

    /// Number of times [`update`](Self::update) has been called.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Sample the console once and publish any transitions.
    ///
    /// Returns how many events were published this tick.
    ///
    /// # Errors
    ///
    /// Propagates the first [`BusError`] from the bus. With the in-process
    /// bus this means a subscriber failed; latches already updated this
    /// tick stay updated.
    pub fn update<C: Console + ?Sized>(&mut self, console: &C) -> Result<usize, BusError> {
        self.tick = self.tick.saturating_add(1);

        let Some(position) = self.memory.position(console) else {
            return Ok(0);
        };

        if self.is_due(self.debug_log_interval) {
            debug!(tick = self.tick, x = position.x, y = position.y, "player position");
        }

        let mut published = 0_usize;
        published = published.saturating_add(self.check_position(console, position)?);
        published = published.saturating_add(self.check_battle(console, position)?);
        if self.is_due(Some(self.hp_poll_interval)) {
            published = published.saturating_add(self.check_health(console)?);
        }
        Ok(published)
    }

    fn check_position<C: Console + ?Sized>(
        &mut self,
        console: &C,
        position: Position,
    ) -> Result<usize, BusError> {
        if self.latch.position == Some(position) {
            return Ok(0);
        }

        let mut published = 0_usize;
        if let Some(previous_position) = self.latch.position {
            debug!(
                tick = self.tick,
                from = ?previous_position,
                to = ?position,
                "step detected"
            );
            publish_event(
                &*self.bus,
                &StepEvent {
                    position,
                    previous_position,
                    direction: self.memory.facing_direction(console),
                },
            )?;
            published = published.saturating_add(1);
        }

        publish_event(
            &*self.bus,
            &PositionChangeEvent {
                position,
                map_id: self.memory.map_id(console),
            },
        )?;
        self.latch.position = Some(position);
        Ok(published.saturating_add(1))
    }

    fn check_battle<C: Console + ?Sized>(
        &mut self,
        console: &C,
        position: Position,
    ) -> Result<usize, BusError> {
        let in_battle = self.memory.in_battle(console);
        let was_in_battle = self.latch.in_battle;
        self.latch.in_battle = in_battle;

        match (was_in_battle, in_battle) {
            (false, true) => {
                debug!(tick = self.tick, "battle started");
                publish_event(
                    &*self.bus,
                    &BattleStartEvent {
                        position,
                        map_id: self.memory.map_id(console),
                    },
                )?;
                Ok(1)
            }
            (true, false) => {
                debug!(tick = self.tick, "battle ended");
                publish_event(&*self.bus, &BattleEndEvent { position })?;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn check_health<C: Console + ?Sized>(&mut self, console: &C) -> Result<usize, BusError> {
        let Some(hp) = self.memory.hp(console) else {
            return Ok(0);
        };
        // Zero HP shows up transiently while party data is being rewritten.
        if self.latch.hp == Some(hp) || hp.current == 0 {
            return Ok(0);
        }

        debug!(
            tick = self.tick,
            current_hp = hp.current,
            max_hp = hp.max,
            "health changed"
        );
        publish_event(
            &*self.bus,
            &HealthChangeEvent {
                current_hp: hp.current,
                max_hp: hp.max,
                previous_hp: self.latch.hp.map(|previous| previous.current),
            },
        )?;
        self.latch.hp = Some(hp);
        Ok(1)
    }

    fn is_due(&self, interval: Option<u64>) -> bool {
        interval
            .and_then(|every| self.tick.checked_rem(every))
            .is_some_and(|remainder| remainder == 0)
    }
}

impl std::fmt::Debug for StateChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChangeDetector")
            .field("tick", &self.tick)
            .field("hp_poll_interval", &self.hp_poll_interval)
            .field("latch", &self.latch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use tickwatch_bus::{LocalBus, handler};
    use tickwatch_types::{EventType, Payload};

    use super::*;
    use crate::console::ScriptedConsole;

    const MAP: MemoryMap = MemoryMap::POKEMON_RED;

    type Log = Arc<Mutex<Vec<(EventType, Payload)>>>;

    fn recording_bus() -> (Arc<LocalBus>, Log) {
        let bus = Arc::new(LocalBus::new());
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        for event_type in EventType::ALL {
            let sink = Arc::clone(&log);
            bus.subscribe(
                event_type,
                handler(move |payload| {
                    sink.lock().unwrap().push((event_type, payload.clone()));
                    Ok(())
                }),
            );
        }
        (bus, log)
    }

    fn types(log: &Log) -> Vec<EventType> {
        log.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    fn place(console: &mut ScriptedConsole, x: u8, y: u8) {
        console.set_byte(MAP.player_x, x);
        console.set_byte(MAP.player_y, y);
    }

    fn set_hp(console: &mut ScriptedConsole, current: u16, max: u16) {
        let [ch, cl] = current.to_be_bytes();
        let [mh, ml] = max.to_be_bytes();
        console.set_byte(MAP.hp_current_high, ch);
        console.set_byte(MAP.hp_current_low, cl);
        console.set_byte(MAP.hp_max_high, mh);
        console.set_byte(MAP.hp_max_low, ml);
    }

    #[test]
    fn first_read_publishes_position_change_without_step() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 3, 4);
        console.set_byte(MAP.map_id, 12);

        assert_eq!(detector.update(&console).unwrap(), 1);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let (event_type, payload) = &log[0];
        assert_eq!(*event_type, EventType::PositionChange);
        assert_eq!(payload.get("position"), Some(&serde_json::json!([3, 4])));
        assert_eq!(payload.get("map_id"), Some(&serde_json::json!(12)));
    }

    #[test]
    fn movement_publishes_step_then_position_change() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 3, 4);
        detector.update(&console).unwrap();

        place(&mut console, 3, 5);
        console.set_byte(MAP.facing_direction, 0);
        detector.update(&console).unwrap();

        assert_eq!(
            types(&log),
            vec![
                EventType::PositionChange,
                EventType::Step,
                EventType::PositionChange
            ]
        );
        let log = log.lock().unwrap();
        let step = &log[1].1;
        assert_eq!(step.get("position"), Some(&serde_json::json!([3, 5])));
        assert_eq!(step.get("previous_position"), Some(&serde_json::json!([3, 4])));
        assert_eq!(step.get("direction"), Some(&serde_json::json!(0)));
    }

    #[test]
    fn unchanged_position_publishes_nothing() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 1, 1);

        for _ in 0..5 {
            detector.update(&console).unwrap();
        }

        assert_eq!(types(&log), vec![EventType::PositionChange]);
    }

    #[test]
    fn unreadable_position_skips_the_whole_tick() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        console.set_byte(MAP.in_battle, 1);

        assert_eq!(detector.update(&console).unwrap(), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(detector.tick(), 1);
    }

    #[test]
    fn battle_edges_fire_once_each() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 2, 2);

        for flag in [0_u8, 1, 1, 1, 0, 0, 1, 0] {
            console.set_byte(MAP.in_battle, flag);
            detector.update(&console).unwrap();
        }

        let battles: Vec<EventType> = types(&log)
            .into_iter()
            .filter(|t| matches!(t, EventType::BattleStart | EventType::BattleEnd))
            .collect();
        assert_eq!(
            battles,
            vec![
                EventType::BattleStart,
                EventType::BattleEnd,
                EventType::BattleStart,
                EventType::BattleEnd
            ]
        );
    }

    #[test]
    fn battle_start_carries_position_and_map() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 8, 9);
        console.set_byte(MAP.map_id, 1);
        console.set_byte(MAP.in_battle, 1);

        detector.update(&console).unwrap();

        let log = log.lock().unwrap();
        let (event_type, payload) = &log[1];
        assert_eq!(*event_type, EventType::BattleStart);
        assert_eq!(payload.get("position"), Some(&serde_json::json!([8, 9])));
        assert_eq!(payload.get("map_id"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn health_is_polled_only_on_interval_ticks() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 0, 0);
        set_hp(&mut console, 20, 25);

        for _ in 0..29 {
            detector.update(&console).unwrap();
        }
        assert!(!types(&log).contains(&EventType::HealthChange));

        detector.update(&console).unwrap();
        let health: Vec<Payload> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == EventType::HealthChange)
            .map(|(_, p)| p.clone())
            .collect();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].get("current_hp"), Some(&serde_json::json!(20)));
        assert_eq!(health[0].get("max_hp"), Some(&serde_json::json!(25)));
        assert_eq!(health[0].get("previous_hp"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn health_reports_previous_current_hp() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 0, 0);
        set_hp(&mut console, 20, 25);
        for _ in 0..30 {
            detector.update(&console).unwrap();
        }

        set_hp(&mut console, 14, 25);
        for _ in 0..30 {
            detector.update(&console).unwrap();
        }

        let log = log.lock().unwrap();
        let last = log
            .iter()
            .rev()
            .find(|(t, _)| *t == EventType::HealthChange)
            .map(|(_, p)| p.clone())
            .unwrap();
        assert_eq!(last.get("current_hp"), Some(&serde_json::json!(14)));
        assert_eq!(last.get("previous_hp"), Some(&serde_json::json!(20)));
    }

    #[test]
    fn zero_hp_is_suppressed_and_not_latched() {
        let (bus, log) = recording_bus();
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 0, 0);
        set_hp(&mut console, 20, 25);
        for _ in 0..30 {
            detector.update(&console).unwrap();
        }

        set_hp(&mut console, 0, 25);
        for _ in 0..30 {
            detector.update(&console).unwrap();
        }
        // Back to the latched value: nothing changed from the detector's view.
        set_hp(&mut console, 20, 25);
        for _ in 0..30 {
            detector.update(&console).unwrap();
        }

        let health_count = types(&log)
            .into_iter()
            .filter(|t| *t == EventType::HealthChange)
            .count();
        assert_eq!(health_count, 1);
    }

    #[test]
    fn bus_failure_propagates_out_of_update() {
        let bus = Arc::new(LocalBus::new());
        bus.subscribe(
            EventType::PositionChange,
            handler(|_| Err(tickwatch_bus::HandlerError::new("subscriber down"))),
        );
        let mut detector = StateChangeDetector::new(bus);
        let mut console = ScriptedConsole::default();
        place(&mut console, 1, 1);

        let err = detector.update(&console).unwrap_err();
        assert!(matches!(err, BusError::Handler { .. }));
    }

    #[test]
    fn custom_poll_interval_is_respected() {
        let (bus, log) = recording_bus();
        let config = DetectorConfig {
            hp_poll_interval: 2,
            ..DetectorConfig::default()
        };
        let mut detector = StateChangeDetector::with_config(bus, MAP, &config);
        let mut console = ScriptedConsole::default();
        place(&mut console, 0, 0);
        set_hp(&mut console, 9, 9);

        detector.update(&console).unwrap();
        assert!(!types(&log).contains(&EventType::HealthChange));
        detector.update(&console).unwrap();
        assert!(types(&log).contains(&EventType::HealthChange));
    }
}
