//! Tickwatch engine binary.
//!
//! Replays a console trace through the state-change detector and publishes
//! the resulting events on the configured bus, optionally relaying
//! operator commands typed on stdin back into the console.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tickwatch-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Load the console trace
//! 4. Create the event bus (local or NATS)
//! 5. Assemble detector, operator state, and session
//! 6. Start the stdin command reader if commands are enabled
//! 7. Run the session until the trace ends, the operator stops it, or the
//!    tick bound is reached
//! 8. Log the result and close the bus

mod config;
mod error;
mod input;

use std::sync::Arc;

use tickwatch_broker::NatsBus;
use tickwatch_bus::{EventBus, LocalBus};
use tickwatch_core::command_fifo::CommandFifo;
use tickwatch_core::console::ScriptedConsole;
use tickwatch_core::detector::StateChangeDetector;
use tickwatch_core::memory_map::MemoryMap;
use tickwatch_core::operator::OperatorState;
use tickwatch_core::session::{self, Session};
use tickwatch_core::tally::EventTally;
use tickwatch_types::EventType;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{BusKind, EngineConfig};
use crate::error::EngineError;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, trace loading, broker connection,
/// or the session itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration (the log level comes from it).
    let (config, from_file) = config::load_config()?;

    // 2. Initialize structured logging.
    let level = config.logging.level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(true)
        .init();

    info!("tickwatch-engine starting");
    if !from_file {
        info!("Config file not found, using defaults");
    }
    config.validate()?;
    info!(
        bus = ?config.bus.kind,
        trace = %config.trace.path.display(),
        max_ticks = config.session.max_ticks,
        commands = config.commands.enabled,
        "Configuration loaded"
    );

    run(config).await?;

    info!("tickwatch-engine shutdown complete");
    Ok(())
}

async fn run(config: EngineConfig) -> Result<(), EngineError> {
    // 3. Load the console trace.
    let mut console = ScriptedConsole::from_file(&config.trace.path)?;
    info!(frames = console.remaining_frames(), "Console trace loaded");

    // 4. Create the event bus.
    let (bus, nats): (Arc<dyn EventBus>, Option<Arc<NatsBus>>) = match config.bus.kind {
        BusKind::Local => (Arc::new(LocalBus::new()) as Arc<dyn EventBus>, None),
        BusKind::Nats => {
            info!(nats_url = %config.broker.nats_url, stream = %config.broker.stream, "Connecting to NATS");
            let nats = Arc::new(NatsBus::connect(config.broker.clone()).await?);
            (Arc::clone(&nats) as Arc<dyn EventBus>, Some(nats))
        }
    };

    // In-process subscribers only make sense on the local bus; with NATS
    // the processors are the subscribers.
    let tally = Arc::new(EventTally::new());
    if nats.is_none() {
        tally.subscribe_all(&*bus, &EventType::ALL);
    }

    // 5. Assemble the session.
    let operator = Arc::new(OperatorState::new(&config.session));
    let detector =
        StateChangeDetector::with_config(Arc::clone(&bus), MemoryMap::default(), &config.detector);
    let mut session = Session::new(Arc::clone(&bus), detector, Arc::clone(&operator));

    // 6. Command relay.
    if config.commands.enabled {
        let fifo = Arc::new(CommandFifo::new(config.commands.capacity));
        input::spawn_stdin_reader(Arc::clone(&fifo), Arc::clone(&operator));
        session = session.with_commands(fifo, &config.commands);
        info!(
            capacity = config.commands.capacity,
            "Command input enabled (up/down/left/right/a/b/start/select, status, clear, quit)"
        );
    }

    {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping session");
                operator.request_stop();
            }
        });
    }

    // 7. Run the session.
    let result = session.run(&mut console);

    // 8. Log results and close the bus, even if the session failed.
    if let Ok(summary) = &result {
        session::log_session_end(summary, &operator);
    }
    if nats.is_none() {
        tally.log_summary();
    }
    if let Some(nats) = nats {
        nats.close().await;
    }

    result?;
    Ok(())
}
