use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::types::{packet_type, ConnectFlags, QoS, WILL_QOS_SHIFT};
use crate::utils::{write_variable_length, Encode};

use super::packet::*;

/// Size of everything that follows the fixed header.
pub(crate) fn get_encoded_size(packet: &Packet) -> usize {
    match packet {
        Packet::Connect(connect) => connect_size(connect),
        Packet::Publish(publish) => publish_size(publish),
        Packet::Subscribe { topic_filters, .. } => {
            2 + topic_filters.iter().map(|(filter, _)| 2 + filter.len() + 1).sum::<usize>()
        }
        Packet::SubscribeAck { status, .. } => 2 + status.len(),
        Packet::Unsubscribe { topic_filters, .. } => {
            2 + topic_filters.iter().map(|filter| 2 + filter.len()).sum::<usize>()
        }
        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => 0,
        //CONNACK flags + code, or a bare packet id
        _ => 2,
    }
}

fn connect_size(connect: &Connect) -> usize {
    let header = 2 + connect.protocol.name().len() + 1 + 1 + 2;
    let will = connect.last_will.as_ref().map_or(0, |w| 2 + w.topic.len() + 2 + w.message.len());
    let username = connect.username.as_ref().map_or(0, |u| 2 + u.len());
    let password = connect.password.as_ref().map_or(0, |p| 2 + p.len());
    header + 2 + connect.client_id.len() + will + username + password
}

fn publish_size(publish: &Publish) -> usize {
    let packet_id = if publish.qos == QoS::AtMostOnce { 0 } else { 2 };
    2 + publish.topic.len() + packet_id + publish.payload.len()
}

fn first_byte(packet: &Packet) -> u8 {
    match packet {
        Packet::Connect(_) => packet_type::CONNECT,
        Packet::ConnectAck(_) => packet_type::CONNACK,
        Packet::Publish(p) => {
            packet_type::PUBLISH_START | (u8::from(p.dup) << 3) | (p.qos.value() << 1) | u8::from(p.retain)
        }
        Packet::PublishAck { .. } => packet_type::PUBACK,
        Packet::PublishReceived { .. } => packet_type::PUBREC,
        Packet::PublishRelease { dup: true, .. } => packet_type::PUBREL | packet_type::DUP,
        Packet::PublishRelease { dup: false, .. } => packet_type::PUBREL,
        Packet::PublishComplete { .. } => packet_type::PUBCOMP,
        Packet::Subscribe { .. } => packet_type::SUBSCRIBE,
        Packet::SubscribeAck { .. } => packet_type::SUBACK,
        Packet::Unsubscribe { .. } => packet_type::UNSUBSCRIBE,
        Packet::UnsubscribeAck { .. } => packet_type::UNSUBACK,
        Packet::PingRequest => packet_type::PINGREQ,
        Packet::PingResponse => packet_type::PINGRESP,
        Packet::Disconnect => packet_type::DISCONNECT,
    }
}

/// Writes the fixed header followed by the `content_size` bytes of variable header and payload.
pub(crate) fn encode(packet: &Packet, dst: &mut BytesMut, content_size: u32) -> Result<(), EncodeError> {
    dst.put_u8(first_byte(packet));
    write_variable_length(content_size, dst)?;

    match packet {
        Packet::Connect(connect) => encode_connect(connect, dst),
        Packet::ConnectAck(ack) => {
            dst.put_u8(u8::from(ack.session_present));
            dst.put_u8(ack.return_code.into());
            Ok(())
        }
        Packet::Publish(publish) => encode_publish(publish, dst),
        Packet::PublishAck { packet_id }
        | Packet::PublishReceived { packet_id }
        | Packet::PublishRelease { packet_id, .. }
        | Packet::PublishComplete { packet_id }
        | Packet::UnsubscribeAck { packet_id } => packet_id.encode(dst),
        Packet::Subscribe { packet_id, topic_filters } => {
            packet_id.encode(dst)?;
            for (filter, qos) in topic_filters {
                filter.encode(dst)?;
                dst.put_u8(qos.value());
            }
            Ok(())
        }
        Packet::SubscribeAck { packet_id, status } => {
            packet_id.encode(dst)?;
            dst.extend(status.iter().map(|s| match s {
                SubscribeReturnCode::Success(qos) => qos.value(),
                SubscribeReturnCode::Failure => 0x80,
            }));
            Ok(())
        }
        Packet::Unsubscribe { packet_id, topic_filters } => {
            packet_id.encode(dst)?;
            topic_filters.iter().try_for_each(|filter| filter.encode(dst))
        }
        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => Ok(()),
    }
}

fn encode_publish(publish: &Publish, dst: &mut BytesMut) -> Result<(), EncodeError> {
    publish.topic.encode(dst)?;
    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, None) => {}
        //QoS 0 never carries an id
        (QoS::AtMostOnce, Some(_)) => return Err(EncodeError::MalformedPacket),
        (_, Some(packet_id)) => packet_id.encode(dst)?,
        (_, None) => return Err(EncodeError::PacketIdRequired),
    }
    dst.put_slice(&publish.payload);
    Ok(())
}

fn encode_connect(connect: &Connect, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let mut flags = ConnectFlags::empty();
    flags.set(ConnectFlags::USERNAME, connect.username.is_some());
    flags.set(ConnectFlags::PASSWORD, connect.password.is_some());
    flags.set(ConnectFlags::CLEAN_START, connect.clean_session);
    if let Some(will) = &connect.last_will {
        flags |= ConnectFlags::WILL | ConnectFlags::from_bits_truncate(will.qos.value() << WILL_QOS_SHIFT);
        flags.set(ConnectFlags::WILL_RETAIN, will.retain);
    }

    connect.protocol.name().as_bytes().encode(dst)?;
    dst.put_u8(connect.protocol.level());
    dst.put_u8(flags.bits());
    dst.put_u16(connect.keep_alive);
    connect.client_id.encode(dst)?;

    if let Some(will) = &connect.last_will {
        will.topic.encode(dst)?;
        will.message.encode(dst)?;
    }
    if let Some(username) = &connect.username {
        username.encode(dst)?;
    }
    if let Some(password) = &connect.password {
        password.encode(dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use bytes::Bytes;
    use bytestring::ByteString;

    use super::*;
    use crate::types::{Protocol, MQTT_LEVEL_31};

    fn pid(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    fn encoded(packet: &Packet) -> BytesMut {
        let mut v = BytesMut::new();
        encode(packet, &mut v, get_encoded_size(packet) as u32).unwrap();
        v
    }

    #[test]
    fn test_acks_and_pings() {
        let cases = [
            (Packet::PublishAck { packet_id: pid(0x4321) }, &b"\x40\x02\x43\x21"[..]),
            (Packet::PublishReceived { packet_id: pid(0x4321) }, &b"\x50\x02\x43\x21"[..]),
            (Packet::PublishRelease { packet_id: pid(0x4321), dup: false }, &b"\x62\x02\x43\x21"[..]),
            (Packet::PublishRelease { packet_id: pid(0x4321), dup: true }, &b"\x6a\x02\x43\x21"[..]),
            (Packet::PublishComplete { packet_id: pid(0x4321) }, &b"\x70\x02\x43\x21"[..]),
            (Packet::UnsubscribeAck { packet_id: pid(0x4321) }, &b"\xb0\x02\x43\x21"[..]),
            (Packet::PingResponse, &b"\xd0\x00"[..]),
            (Packet::Disconnect, &b"\xe0\x00"[..]),
        ];
        for (packet, expected) in cases.iter() {
            assert_eq!(&encoded(packet)[..], *expected, "{}", packet.name());
        }
    }

    #[test]
    fn test_connack() {
        let ack = |session_present, return_code| Packet::ConnectAck(ConnectAck { session_present, return_code });
        assert_eq!(&encoded(&ack(true, ConnectAckReason::ConnectionAccepted))[..], b"\x20\x02\x01\x00");
        assert_eq!(&encoded(&ack(false, ConnectAckReason::IdentifierRejected))[..], b"\x20\x02\x00\x02");
    }

    #[test]
    fn test_connect() {
        let connect = Connect {
            protocol: Protocol::default(),
            clean_session: false,
            keep_alive: 60,
            client_id: ByteString::from_static("12345"),
            last_will: None,
            username: Some(ByteString::from_static("user")),
            password: Some(Bytes::from_static(b"pass")),
        };
        assert_eq!(
            &encoded(&Packet::Connect(Box::new(connect)))[..],
            &b"\x10\x1D\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass"[..]
        );

        let connect = Connect {
            protocol: Protocol(MQTT_LEVEL_31),
            clean_session: true,
            client_id: ByteString::from_static("c"),
            last_will: Some(LastWill {
                qos: QoS::AtLeastOnce,
                retain: true,
                topic: ByteString::from_static("w"),
                message: Bytes::from_static(b"x"),
            }),
            ..Connect::default()
        };
        assert_eq!(
            &encoded(&Packet::Connect(Box::new(connect)))[..],
            &b"\x10\x15\x00\x06MQIsdp\x03\x2e\x00\x00\x00\x01c\x00\x01w\x00\x01x"[..]
        );
    }

    #[test]
    fn test_publish() {
        let publish = Publish {
            dup: true,
            retain: true,
            qos: QoS::ExactlyOnce,
            topic: ByteString::from_static("topic"),
            packet_id: Some(pid(0x4321)),
            payload: Bytes::from_static(b"data"),
        };
        assert_eq!(&encoded(&Packet::Publish(publish.clone()))[..], b"\x3d\x0D\x00\x05topic\x43\x21data");

        let qos0 = Publish { dup: false, retain: false, qos: QoS::AtMostOnce, packet_id: None, ..publish.clone() };
        assert_eq!(&encoded(&Packet::Publish(qos0.clone()))[..], b"\x30\x0b\x00\x05topicdata");

        //two byte remaining length
        let large = Publish { payload: (0..255).collect::<Vec<u8>>().into(), ..publish.clone() };
        assert_eq!(get_encoded_size(&Packet::Publish(large.clone())), 264);
        assert_eq!(&encoded(&Packet::Publish(large))[0..3], b"\x3d\x88\x02");

        let mut v = BytesMut::new();
        let missing_id = Packet::Publish(Publish { packet_id: None, ..publish });
        assert!(matches!(encode(&missing_id, &mut v, 0), Err(EncodeError::PacketIdRequired)));
        let with_id = Packet::Publish(Publish { packet_id: Some(pid(1)), ..qos0 });
        assert!(matches!(encode(&with_id, &mut v, 0), Err(EncodeError::MalformedPacket)));
    }

    #[test]
    fn test_subscribe() {
        let suback = Packet::SubscribeAck {
            packet_id: pid(0x1234),
            status: vec![
                SubscribeReturnCode::Success(QoS::AtLeastOnce),
                SubscribeReturnCode::Failure,
                SubscribeReturnCode::Success(QoS::ExactlyOnce),
            ],
        };
        assert_eq!(&encoded(&suback)[..], b"\x90\x05\x12\x34\x01\x80\x02");

        let subscribe = Packet::Subscribe {
            packet_id: pid(0x1234),
            topic_filters: vec![(ByteString::from_static("a/+"), QoS::AtLeastOnce)],
        };
        assert_eq!(&encoded(&subscribe)[..], b"\x82\x08\x12\x34\x00\x03a/+\x01");

        let unsubscribe =
            Packet::Unsubscribe { packet_id: pid(0x1234), topic_filters: vec![ByteString::from_static("a/#")] };
        assert_eq!(&encoded(&unsubscribe)[..], b"\xa2\x07\x12\x34\x00\x03a/#");
    }
}
