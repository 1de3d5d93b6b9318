//! MQTT v3.1 / v3.1.1 Protocol codec

#[allow(clippy::module_inception)]
mod codec;
mod decode;
mod encode;
mod packet;

pub use self::codec::Codec;
pub use self::packet::{Connect, ConnectAck, ConnectAckReason, LastWill, Packet, SubscribeReturnCode};
pub use crate::types::{ConnectFlags, Publish, QoS};
