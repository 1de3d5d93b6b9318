use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

pub(crate) use crate::types::Publish;
use crate::types::{Protocol, QoS};

prim_enum! {
    /// CONNACK return code
    #[derive(Deserialize, Serialize)]
    pub enum ConnectAckReason {
        ConnectionAccepted = 0,
        UnacceptableProtocolVersion = 1,
        IdentifierRejected = 2,
        ServiceUnavailable = 3,
        BadUserNameOrPassword = 4,
        NotAuthorized = 5
    }
}

impl From<ConnectAckReason> for u8 {
    fn from(v: ConnectAckReason) -> Self {
        v as u8
    }
}

impl ConnectAckReason {
    /// Text for logs.
    pub fn reason(self) -> &'static str {
        match self {
            ConnectAckReason::ConnectionAccepted => "accepted",
            ConnectAckReason::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectAckReason::IdentifierRejected => "identifier rejected",
            ConnectAckReason::ServiceUnavailable => "server unavailable",
            ConnectAckReason::BadUserNameOrPassword => "bad username or password",
            ConnectAckReason::NotAuthorized => "not authorized",
        }
    }
}

/// Will registered by CONNECT, published when the connection drops without DISCONNECT.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: ByteString,
    pub message: Bytes,
}

#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Connect {
    pub protocol: Protocol,
    pub clean_session: bool,
    /// Seconds, 0 disables the keep-alive check
    pub keep_alive: u16,
    pub last_will: Option<LastWill>,
    /// May be empty with `clean_session` set, the broker then assigns one
    pub client_id: ByteString,
    pub username: Option<ByteString>,
    pub password: Option<Bytes>,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
pub struct ConnectAck {
    pub return_code: ConnectAckReason,
    /// Always false for v3.1 peers, the flag does not exist there
    pub session_present: bool,
}

/// Per-filter SUBACK result
#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

/// MQTT v3.1 / v3.1.1 control packets
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnectAck(ConnectAck),
    Publish(Publish),
    PublishAck {
        packet_id: NonZeroU16,
    },
    PublishReceived {
        packet_id: NonZeroU16,
    },
    PublishRelease {
        packet_id: NonZeroU16,
        /// Retransmission marker, only ever set towards v3.1 peers
        dup: bool,
    },
    PublishComplete {
        packet_id: NonZeroU16,
    },
    Subscribe {
        packet_id: NonZeroU16,
        topic_filters: Vec<(ByteString, QoS)>,
    },
    SubscribeAck {
        packet_id: NonZeroU16,
        /// One entry per filter of the SUBSCRIBE, in order
        status: Vec<SubscribeReturnCode>,
    },
    Unsubscribe {
        packet_id: NonZeroU16,
        topic_filters: Vec<ByteString>,
    },
    UnsubscribeAck {
        packet_id: NonZeroU16,
    },
    PingRequest,
    PingResponse,
    Disconnect,
}

impl From<Connect> for Packet {
    fn from(val: Connect) -> Packet {
        Packet::Connect(Box::new(val))
    }
}

impl From<Publish> for Packet {
    fn from(val: Publish) -> Packet {
        Packet::Publish(val)
    }
}

impl Packet {
    /// Packet identifier carried in the variable header, if any.
    pub fn packet_id(&self) -> Option<NonZeroU16> {
        match self {
            Packet::Publish(publish) => publish.packet_id,
            Packet::PublishAck { packet_id }
            | Packet::PublishReceived { packet_id }
            | Packet::PublishRelease { packet_id, .. }
            | Packet::PublishComplete { packet_id }
            | Packet::Subscribe { packet_id, .. }
            | Packet::SubscribeAck { packet_id, .. }
            | Packet::Unsubscribe { packet_id, .. }
            | Packet::UnsubscribeAck { packet_id } => Some(*packet_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnectAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PublishAck { .. } => "PUBACK",
            Packet::PublishReceived { .. } => "PUBREC",
            Packet::PublishRelease { .. } => "PUBREL",
            Packet::PublishComplete { .. } => "PUBCOMP",
            Packet::Subscribe { .. } => "SUBSCRIBE",
            Packet::SubscribeAck { .. } => "SUBACK",
            Packet::Unsubscribe { .. } => "UNSUBSCRIBE",
            Packet::UnsubscribeAck { .. } => "UNSUBACK",
            Packet::PingRequest => "PINGREQ",
            Packet::PingResponse => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}
