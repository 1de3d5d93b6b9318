#![deny(unsafe_code)]

//! MQTT v3.1 / v3.1.1 packet codec
//!
//! ## Features:
//! - **Both 3.x levels**: `MQIsdp`/3 and `MQTT`/4 handshakes, with strict fixed-header flag
//!   validation once the peer is known to speak 3.1.1
//! - **Incremental decoding**: partial frames return `Ok(None)` and stay buffered until the
//!   remaining length has arrived
//! - **Tokio Integration**: implements `tokio_util::codec::{Decoder, Encoder}`
//! - **Broker side only**: packets that only a broker may send are rejected on the way in
//!

#[macro_use]
mod utils;

/// Error types for encoding/decoding operations
pub mod error;

/// Shared types and constants for MQTT protocol
pub mod types;

/// MQTT v3.1 / v3.1.1 packets and codec
pub mod v3;

pub use error::{DecodeError, EncodeError};
pub use types::{Protocol, Publish, QoS, TimestampMillis, MQTT_LEVEL_31, MQTT_LEVEL_311};
