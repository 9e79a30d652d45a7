//! End-to-end tests: scripted console -> detector -> `LocalBus` -> tally.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use tickwatch_bus::{EventBus, LocalBus, handler};
use tickwatch_core::command_fifo::CommandFifo;
use tickwatch_core::config::{CommandConfig, SessionConfig};
use tickwatch_core::console::ScriptedConsole;
use tickwatch_core::detector::StateChangeDetector;
use tickwatch_core::operator::{OperatorState, SessionEndReason};
use tickwatch_core::session::Session;
use tickwatch_core::tally::EventTally;
use tickwatch_types::{EventPayload, EventType, HealthChangeEvent, Payload, StepEvent};

/// A short walk: spawn, two steps, a battle that costs HP, then idle.
const WALK: &str = r#"
frames:
  - set: { "D362": 5, "D361": 5, "D35E": 0, "D52A": 0, "D015": 0, "D016": 20, "D018": 0, "D019": 20 }
    repeat: 10
  - set: { "D361": 6 }
    repeat: 10
  - set: { "D361": 7 }
    repeat: 10
  - set: { "D057": 1 }
    repeat: 10
  - set: { "D016": 12 }
    repeat: 20
  - set: { "D057": 0 }
    repeat: 5
"#;

fn local_bus() -> Arc<LocalBus> {
    Arc::new(LocalBus::new())
}

fn run_walk(bus: &Arc<LocalBus>) -> tickwatch_core::session::SessionSummary {
    let operator = Arc::new(OperatorState::new(&SessionConfig::default()));
    let detector = StateChangeDetector::new(Arc::clone(bus) as Arc<dyn EventBus>);
    let mut session = Session::new(Arc::clone(bus) as Arc<dyn EventBus>, detector, operator);
    let mut console = ScriptedConsole::from_yaml(WALK).unwrap();
    session.run(&mut console).unwrap()
}

#[test]
fn walk_produces_expected_event_counts() {
    let bus = local_bus();
    let tally = Arc::new(EventTally::new());
    tally.subscribe_all(&*bus, &EventType::ALL);

    let summary = run_walk(&bus);

    assert_eq!(summary.end_reason, SessionEndReason::ConsoleFinished);
    assert_eq!(summary.total_ticks, 65);
    assert_eq!(tally.count(EventType::GameStart), 1);
    assert_eq!(tally.count(EventType::GameEnd), 1);
    assert_eq!(tally.count(EventType::PositionChange), 3);
    assert_eq!(tally.count(EventType::Step), 2);
    assert_eq!(tally.count(EventType::BattleStart), 1);
    assert_eq!(tally.count(EventType::BattleEnd), 1);
    // HP polled at ticks 30 and 60: 20/20 first, then 12/20.
    assert_eq!(tally.count(EventType::HealthChange), 2);
}

#[test]
fn step_payloads_decode_into_typed_events() {
    let bus = local_bus();
    let steps = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&steps);
    bus.subscribe(
        EventType::Step,
        handler(move |payload| {
            sink.lock().unwrap().push(StepEvent::from_payload(payload)?);
            Ok(())
        }),
    );

    run_walk(&bus);

    let steps = steps.lock().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].previous_position.y, 5);
    assert_eq!(steps[0].position.y, 6);
    assert_eq!(steps[1].previous_position.y, 6);
    assert_eq!(steps[1].position.y, 7);
    assert_eq!(steps[1].direction, Some(0));
}

#[test]
fn health_change_reports_damage() {
    let bus = local_bus();
    let health = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&health);
    bus.subscribe(
        EventType::HealthChange,
        handler(move |payload| {
            sink.lock().unwrap().push(HealthChangeEvent::from_payload(payload)?);
            Ok(())
        }),
    );

    run_walk(&bus);

    let health = health.lock().unwrap();
    let last = health.last().unwrap();
    assert_eq!(last.current_hp, 12);
    assert_eq!(last.max_hp, 20);
    assert_eq!(last.previous_hp, Some(20));
}

#[test]
fn queued_commands_reach_console_in_order() {
    let bus = local_bus();
    let executed = Arc::new(Mutex::new(Vec::<Payload>::new()));
    let sink = Arc::clone(&executed);
    bus.subscribe(
        EventType::CommandExecuted,
        handler(move |payload| {
            sink.lock().unwrap().push(payload.clone());
            Ok(())
        }),
    );

    let fifo = Arc::new(CommandFifo::new(3));
    for token in ["down", "A", "start", "b"] {
        // The fourth token overflows capacity 3.
        let _ = fifo.add(token);
    }
    assert_eq!(fifo.accepted_total(), 3);

    let operator = Arc::new(OperatorState::new(&SessionConfig::default()));
    let detector = StateChangeDetector::new(Arc::clone(&bus) as Arc<dyn EventBus>);
    let mut session = Session::new(Arc::clone(&bus) as Arc<dyn EventBus>, detector, operator)
        .with_commands(Arc::clone(&fifo), &CommandConfig::default());
    let mut console = ScriptedConsole::from_yaml(WALK).unwrap();

    let summary = session.run(&mut console).unwrap();

    // Cadence of 15 over 65 ticks: ticks 15, 30, 45 inject.
    assert_eq!(summary.commands_executed, 3);
    let commands: Vec<String> = console
        .injected()
        .iter()
        .map(|(button, _)| button.to_string())
        .collect();
    assert_eq!(commands, vec!["down", "a", "start"]);
    let executed = executed.lock().unwrap();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[2].get("queue_size"), Some(&serde_json::json!(0)));
}

#[test]
fn operator_stop_from_another_thread_ends_session() {
    let bus = local_bus();
    let operator = Arc::new(OperatorState::new(&SessionConfig::default()));
    let stopper = Arc::clone(&operator);
    // Stop as soon as the player first appears.
    bus.subscribe(
        EventType::PositionChange,
        handler(move |_| {
            let stopper = Arc::clone(&stopper);
            std::thread::spawn(move || stopper.request_stop()).join().ok();
            Ok(())
        }),
    );
    let detector = StateChangeDetector::new(Arc::clone(&bus) as Arc<dyn EventBus>);
    let mut session = Session::new(Arc::clone(&bus) as Arc<dyn EventBus>, detector, Arc::clone(&operator));
    let mut console = ScriptedConsole::from_yaml(WALK).unwrap();

    let summary = session.run(&mut console).unwrap();

    assert_eq!(summary.end_reason, SessionEndReason::OperatorStop);
    assert_eq!(summary.total_ticks, 1);
    assert_eq!(operator.end_reason(), Some(SessionEndReason::OperatorStop));
}
