#![deny(unsafe_code)]

//! MQTT v3.1 / v3.1.1 broker engine
//!
//! ## Features:
//! - **QoS 0/1/2 delivery**: a per-connection inflight state machine with retransmission,
//!   DUP marking and bounded retry attempts
//! - **Topic matching**: exact and `+`/`#` wildcard subscriptions, `$`-topics kept out of
//!   wildcard filters starting at the first level
//! - **Persistent sessions**: subscriptions, unacknowledged messages and an offline outbox
//!   survive a disconnect and are resumed on reconnect
//! - **Retained messages**: stored in a topic trie and replayed to new subscribers
//! - **Worker loops**: every connection is pinned to one of a fixed set of workers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tmqtt::{Broker, BrokerSettings, DefaultSecurity};
//! use tmqtt_net::Builder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = Broker::new(BrokerSettings::default(), Arc::new(DefaultSecurity));
//!     broker.start();
//!     let listener = Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 1883).into()).bind()?;
//!     broker.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod inflight;
pub mod logger;
pub mod registry;
pub mod retain;
pub mod router;
pub mod security;
pub mod server;
pub mod session;
pub mod stats;
pub mod subscription;
pub mod topic;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use crate::connection::Connection;
pub use crate::context::{BrokerContext, BrokerSettings};
pub use crate::error::MqttError;
pub use crate::security::{DefaultSecurity, Security};
pub use crate::server::Broker;

pub type Result<T, E = MqttError> = std::result::Result<T, E>;
