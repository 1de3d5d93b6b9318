use std::fmt;
use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

pub(crate) const MQTT: &[u8] = b"MQTT";
pub(crate) const MQISDP: &[u8] = b"MQIsdp";
pub const MQTT_LEVEL_31: u8 = 3;
pub const MQTT_LEVEL_311: u8 = 4;
pub(crate) const WILL_QOS_SHIFT: u8 = 3;

/// Max value the remaining length field can carry
pub(crate) const MAX_PACKET_SIZE: u32 = 0xF_FF_FF_FF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Protocol(pub u8);

impl Protocol {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Protocol(MQTT_LEVEL_31) => "MQIsdp",
            Protocol(_) => "MQTT",
        }
    }

    #[inline]
    pub fn level(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_v31(self) -> bool {
        self.0 == MQTT_LEVEL_31
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol(MQTT_LEVEL_311)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            MQTT_LEVEL_31 => write!(f, "v3.1"),
            MQTT_LEVEL_311 => write!(f, "v3.1.1"),
            level => write!(f, "level({})", level),
        }
    }
}

prim_enum! {
    /// Delivery guarantee of a message
    #[derive(serde::Serialize, serde::Deserialize, PartialOrd, Ord, Hash)]
    pub enum QoS {
        /// Fire and forget
        AtMostOnce = 0,
        /// Acknowledged by PUBACK, may arrive more than once
        AtLeastOnce = 1,
        /// PUBREC / PUBREL / PUBCOMP handshake
        ExactlyOnce = 2
    }
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// The weaker of the two levels, used to downgrade a delivery to the granted QoS.
    #[inline]
    pub fn less_value(&self, qos: QoS) -> QoS {
        (*self).min(qos)
    }
}

impl From<QoS> for u8 {
    fn from(v: QoS) -> Self {
        v.value()
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ConnectFlags: u8 {
        const USERNAME    = 0b1000_0000;
        const PASSWORD    = 0b0100_0000;
        const WILL_RETAIN = 0b0010_0000;
        const WILL_QOS    = 0b0001_1000;
        const WILL        = 0b0000_0100;
        const CLEAN_START = 0b0000_0010;
    }
}

/// Fixed header first bytes with their mandatory flag bits.
pub(crate) mod packet_type {
    pub(crate) const TYPE_MASK: u8 = 0b1111_0000;
    pub(crate) const DUP: u8 = 0b0000_1000;

    pub(crate) const CONNECT: u8 = 0b0001_0000;
    pub(crate) const CONNACK: u8 = 0b0010_0000;
    pub(crate) const PUBLISH_START: u8 = 0b0011_0000;
    pub(crate) const PUBACK: u8 = 0b0100_0000;
    pub(crate) const PUBREC: u8 = 0b0101_0000;
    pub(crate) const PUBREL: u8 = 0b0110_0010;
    pub(crate) const PUBCOMP: u8 = 0b0111_0000;
    pub(crate) const SUBSCRIBE: u8 = 0b1000_0010;
    pub(crate) const SUBACK: u8 = 0b1001_0000;
    pub(crate) const UNSUBSCRIBE: u8 = 0b1010_0010;
    pub(crate) const UNSUBACK: u8 = 0b1011_0000;
    pub(crate) const PINGREQ: u8 = 0b1100_0000;
    pub(crate) const PINGRESP: u8 = 0b1101_0000;
    pub(crate) const DISCONNECT: u8 = 0b1110_0000;

    /// Expected first byte for a packet type with fixed flags, `None` for reserved types.
    #[inline]
    pub(crate) fn fixed_first_byte(kind: u8) -> Option<u8> {
        match kind {
            0b0000_0000 | 0b1111_0000 => None,
            0b0110_0000 => Some(PUBREL),
            0b1000_0000 => Some(SUBSCRIBE),
            0b1010_0000 => Some(UNSUBSCRIBE),
            _ => Some(kind),
        }
    }
}

/// Application message as carried by PUBLISH.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Publish {
    pub dup: bool,
    pub retain: bool,
    pub qos: QoS,
    pub topic: ByteString,
    /// `None` exactly when `qos` is 0
    pub packet_id: Option<NonZeroU16>,
    pub payload: Bytes,
}

impl Publish {
    /// Copy addressed to another receiver, flags reset and packet id cleared.
    #[inline]
    pub fn forward(&self, qos: QoS, retain: bool) -> Publish {
        Publish {
            dup: false,
            retain,
            qos,
            topic: self.topic.clone(),
            packet_id: None,
            payload: self.payload.clone(),
        }
    }
}

impl fmt::Debug for Publish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publish")
            .field("packet_id", &self.packet_id)
            .field("topic", &self.topic)
            .field("dup", &self.dup)
            .field("retain", &self.retain)
            .field("qos", &self.qos)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

pub type TimestampMillis = i64;
