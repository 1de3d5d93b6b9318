use std::io;

/// Reasons a byte stream can not be turned into a [`Packet`](crate::v3::Packet).
///
/// Any of these is fatal for the connection that produced the bytes.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("protocol name is neither MQTT nor MQIsdp")]
    InvalidProtocol,
    #[error("length field out of range")]
    InvalidLength,
    #[error("malformed packet")]
    MalformedPacket,
    #[error("protocol level not supported")]
    UnsupportedProtocolLevel,
    #[error("reserved CONNECT flag set")]
    ConnectReservedFlagSet,
    #[error("client id rejected")]
    InvalidClientId,
    #[error("bad fixed header flags {0:#04x}")]
    InvalidFlagBits(u8),
    #[error("packet type {0} is broker to client only")]
    WrongBrokerMessage(u8),
    #[error("unknown packet type")]
    UnsupportedPacketType,
    #[error("packet id missing")]
    PacketIdRequired,
    #[error("packet larger than allowed")]
    MaxSizeExceeded,
    #[error("string is not utf-8")]
    Utf8Error,
    #[error("io, {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("length does not fit its field")]
    InvalidLength,
    #[error("malformed packet")]
    MalformedPacket,
    #[error("packet id missing")]
    PacketIdRequired,
    #[error("io, {0}")]
    Io(#[from] io::Error),
}
