//! Event processor entry point for Tickwatch.
//!
//! The processor is the out-of-process subscriber side of the NATS bus. It
//! binds a `JetStream` consumer for each configured event type, counts what
//! it receives, and logs a running summary until interrupted.
//!
//! # Architecture
//!
//! ```text
//! tickwatch-engine --> NATS (tickwatch.events.<type>) --> processor --> tally
//! ```
//!
//! Run several processors with `TICKWATCH_BINDING=shared` and the same
//! `TICKWATCH_GROUP` to split each event stream between them; with the
//! default broadcast binding every processor sees every event.
//!
//! Failing to bind any consumer at startup is fatal, and so is a consumer
//! that stops while the processor runs.

mod config;
mod error;

use std::sync::Arc;
use std::time::Duration;

use tickwatch_broker::NatsBus;
use tickwatch_core::tally::EventTally;
use tickwatch_types::EventType;
use tokio::time::Interval;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ProcessorConfig;
use crate::error::ProcessorError;

/// Application entry point.
///
/// Initializes logging, loads configuration from environment variables,
/// connects to NATS, subscribes the tally, and runs until Ctrl-C.
///
/// # Errors
///
/// Returns an error if configuration or the broker connection fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("tickwatch-processor starting");

    // Load configuration from environment
    let config = ProcessorConfig::from_env()?;
    info!(
        nats_url = %config.broker.nats_url,
        binding = ?config.broker.binding,
        group = %config.broker.group,
        event_types = config.event_types.len(),
        "configuration loaded"
    );

    run(config).await?;

    info!("tickwatch-processor shutdown complete");
    Ok(())
}

/// How often to check that every consumer is still alive.
const CONSUMER_CHECK_INTERVAL: Duration = Duration::from_secs(5);

async fn run(config: ProcessorConfig) -> Result<(), ProcessorError> {
    let bus = NatsBus::connect(config.broker.clone()).await?;

    let tally = Arc::new(EventTally::new());
    for &event_type in &config.event_types {
        bus.try_subscribe(event_type, tally.handler_for(event_type))
            .await?;
    }
    info!(consuming = ?bus.consuming(), "subscriptions bound, waiting for events");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut health = tokio::time::interval(CONSUMER_CHECK_INTERVAL);
    let mut summary = config.summary_interval.map(tokio::time::interval);
    // The first tick of an interval completes immediately.
    health.tick().await;
    if let Some(ticker) = summary.as_mut() {
        ticker.tick().await;
    }

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
            _ = health.tick() => {
                let lost = lost_consumers(&config.event_types, &bus.consuming());
                if !lost.is_empty() {
                    error!(lost = ?lost, "consumers stopped, shutting down");
                    break Err(ProcessorError::ConsumerLost { event_types: lost });
                }
            }
            () = next_tick(summary.as_mut()) => {
                info!(total = tally.total(), "running tally");
                tally.log_summary();
            }
        }
    };

    bus.close().await;
    info!(total = tally.total(), "final tally");
    tally.log_summary();
    outcome
}

/// Wait for the next summary tick, or forever when summaries are off.
async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Subscribed event types that no longer have a live consumer.
fn lost_consumers(expected: &[EventType], consuming: &[EventType]) -> Vec<EventType> {
    expected
        .iter()
        .copied()
        .filter(|event_type| !consuming.contains(event_type))
        .collect()
}
