use tmqtt_codec::{DecodeError, EncodeError};

use crate::topic::TopicError;

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("decode, {0}")]
    Decode(#[from] DecodeError),
    #[error("encode, {0}")]
    Encode(#[from] EncodeError),
    #[error("topic, {0}")]
    Topic(#[from] TopicError),
    /// No worker left or `max_connections` reached
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("protocol violation, {0}")]
    Protocol(&'static str),
    #[error("unexpected packet, {0}")]
    UnexpectedPacket(&'static str),
    /// Transport failures
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl MqttError {
    /// Errors after which the peer can no longer be trusted to speak MQTT.
    #[inline]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, MqttError::Decode(_) | MqttError::Protocol(_) | MqttError::UnexpectedPacket(_))
    }
}
