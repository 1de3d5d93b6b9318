use std::num::NonZeroU16;

use bytes::{Buf, Bytes};
use bytestring::ByteString;

use crate::error::DecodeError;
use crate::types::{packet_type, ConnectFlags, Protocol, QoS, MQISDP, MQTT, MQTT_LEVEL_31, MQTT_LEVEL_311, WILL_QOS_SHIFT};
use crate::utils::Decode;

use super::packet::{Connect, LastWill, Packet, Publish};

/// Decodes one complete packet body.
///
/// With `strict` set (peer speaks v3.1.1) every packet type except PUBLISH must carry exactly
/// its mandated flag bits. CONNECT is always checked since the level is not known before it.
pub(crate) fn decode_packet(mut src: Bytes, first_byte: u8, strict: bool) -> Result<Packet, DecodeError> {
    let kind = first_byte & packet_type::TYPE_MASK;
    if kind == packet_type::PUBLISH_START {
        return decode_publish_packet(&mut src, first_byte & 0b0000_1111);
    }

    let expected = packet_type::fixed_first_byte(kind).ok_or(DecodeError::UnsupportedPacketType)?;
    if matches!(
        expected,
        packet_type::CONNACK | packet_type::SUBACK | packet_type::UNSUBACK | packet_type::PINGRESP
    ) {
        return Err(DecodeError::WrongBrokerMessage(kind >> 4));
    }
    ensure!(
        first_byte == expected || !(strict || expected == packet_type::CONNECT),
        DecodeError::InvalidFlagBits(first_byte)
    );

    match expected {
        packet_type::CONNECT => decode_connect_packet(&mut src),
        packet_type::PUBACK => decode_ack(src, |packet_id| Packet::PublishAck { packet_id }),
        packet_type::PUBREC => decode_ack(src, |packet_id| Packet::PublishReceived { packet_id }),
        packet_type::PUBREL => decode_ack(src, |packet_id| Packet::PublishRelease {
            packet_id,
            dup: first_byte & packet_type::DUP != 0,
        }),
        packet_type::PUBCOMP => decode_ack(src, |packet_id| Packet::PublishComplete { packet_id }),
        packet_type::SUBSCRIBE => decode_subscribe_packet(&mut src),
        packet_type::UNSUBSCRIBE => decode_unsubscribe_packet(&mut src),
        packet_type::PINGREQ => Ok(Packet::PingRequest),
        packet_type::DISCONNECT => Ok(Packet::Disconnect),
        _ => Err(DecodeError::UnsupportedPacketType),
    }
}

#[inline]
fn decode_ack(mut src: Bytes, f: impl Fn(NonZeroU16) -> Packet) -> Result<Packet, DecodeError> {
    let packet_id = NonZeroU16::decode(&mut src)?;
    ensure!(!src.has_remaining(), DecodeError::InvalidLength);
    Ok(f(packet_id))
}

fn decode_connect_packet(src: &mut Bytes) -> Result<Packet, DecodeError> {
    ensure!(src.remaining() >= 10, DecodeError::InvalidLength);
    let name = Bytes::decode(src)?;
    ensure!(name == MQTT || name == MQISDP, DecodeError::InvalidProtocol);

    ensure!(src.remaining() >= 4, DecodeError::InvalidLength);
    let protocol = Protocol(src.get_u8());
    ensure!(
        matches!(protocol.level(), MQTT_LEVEL_31 | MQTT_LEVEL_311),
        DecodeError::UnsupportedProtocolLevel
    );
    let flags = ConnectFlags::from_bits(src.get_u8()).ok_or(DecodeError::ConnectReservedFlagSet)?;
    let keep_alive = src.get_u16();

    let clean_session = flags.contains(ConnectFlags::CLEAN_START);
    let client_id = ByteString::decode(src)?;
    ensure!(clean_session || !client_id.is_empty(), DecodeError::InvalidClientId);

    let mut last_will = None;
    if flags.contains(ConnectFlags::WILL) {
        let qos = QoS::try_from((flags & ConnectFlags::WILL_QOS).bits() >> WILL_QOS_SHIFT)?;
        let topic = ByteString::decode(src)?;
        let message = Bytes::decode(src)?;
        last_will = Some(LastWill { qos, retain: flags.contains(ConnectFlags::WILL_RETAIN), topic, message });
    }
    let username = flags.contains(ConnectFlags::USERNAME).then(|| ByteString::decode(src)).transpose()?;
    let password = flags.contains(ConnectFlags::PASSWORD).then(|| Bytes::decode(src)).transpose()?;

    Ok(Connect { protocol, clean_session, keep_alive, last_will, client_id, username, password }.into())
}

fn decode_publish_packet(src: &mut Bytes, packet_flags: u8) -> Result<Packet, DecodeError> {
    let topic = ByteString::decode(src)?;
    let qos = QoS::try_from((packet_flags & 0b0110) >> 1)?;
    let packet_id = if qos == QoS::AtMostOnce { None } else { Some(NonZeroU16::decode(src)?) };

    Ok(Packet::Publish(Publish {
        dup: (packet_flags & 0b1000) == 0b1000,
        qos,
        retain: (packet_flags & 0b0001) == 0b0001,
        topic,
        packet_id,
        payload: src.split_off(0),
    }))
}

fn decode_subscribe_packet(src: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = NonZeroU16::decode(src)?;
    let mut topic_filters = Vec::new();
    while src.has_remaining() {
        let topic = ByteString::decode(src)?;
        ensure!(src.remaining() >= 1, DecodeError::InvalidLength);
        let qos = (src.get_u8() & 0b0000_0011).try_into()?;
        topic_filters.push((topic, qos));
    }
    ensure!(!topic_filters.is_empty(), DecodeError::MalformedPacket);

    Ok(Packet::Subscribe { packet_id, topic_filters })
}

fn decode_unsubscribe_packet(src: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = NonZeroU16::decode(src)?;
    let mut topic_filters = Vec::new();
    while src.remaining() > 0 {
        topic_filters.push(ByteString::decode(src)?);
    }
    ensure!(!topic_filters.is_empty(), DecodeError::MalformedPacket);
    Ok(Packet::Unsubscribe { packet_id, topic_filters })
}
