//! Broker-backed event distribution for Tickwatch.
//!
//! [`NatsBus`] implements [`tickwatch_bus::EventBus`] on top of a NATS
//! `JetStream` stream so that events detected in the engine process can be
//! consumed by any number of processor processes.
//!
//! | Concept | `JetStream` realization |
//! |---------|------------------------|
//! | Durable topic exchange | One file-backed stream capturing `<prefix>.>` |
//! | Routing key | Subject `<prefix>.<event type>` |
//! | Queue per event type | Pull consumer filtered to that subject, new messages only |
//! | Prefetch of one | `max_ack_pending = 1` |
//! | Redelivery bound | `max_deliver`, then the message is terminated |
//!
//! # Modules
//!
//! - [`config`] -- [`BrokerConfig`] and the [`QueueBinding`] strategy.
//! - [`error`] -- [`BrokerError`].
//! - [`wire`] -- Subject names and body encoding.
//! - [`nats_bus`] -- The [`NatsBus`] itself.

pub mod config;
mod consumer;
pub mod error;
pub mod nats_bus;
pub mod wire;

pub use config::{BindingMode, BrokerConfig, QueueBinding};
pub use error::BrokerError;
pub use nats_bus::NatsBus;
