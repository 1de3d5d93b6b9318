use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{decode, encode, Packet};
use crate::error::{DecodeError, EncodeError};
use crate::types::{Protocol, MQTT_LEVEL_311};
use crate::utils::decode_variable_length;

/// Broker side MQTT v3.1 / v3.1.1 codec.
///
/// Frames are only taken out of the buffer once complete, a partial frame stays where it is
/// until more bytes arrive. Decoded items carry the remaining length of their frame.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    /// Max remaining length accepted, 0 for no limit
    max_size: u32,
    /// Set once a v3.1.1 CONNECT went through
    strict: bool,
}

impl Codec {
    pub fn new(max_size: u32) -> Self {
        Codec { max_size, strict: false }
    }

    /// v3.1.1 peers get their fixed header flags checked, v3.1 peers do not.
    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.strict = protocol.level() == MQTT_LEVEL_311;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Decoder for Codec {
    type Item = (Packet, u32);
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        let Some(&first_byte) = src.first() else {
            return Ok(None);
        };
        let Some((remaining_length, header_len)) = decode_variable_length(&src[1..])? else {
            return Ok(None);
        };
        if self.max_size != 0 && remaining_length > self.max_size {
            return Err(DecodeError::MaxSizeExceeded);
        }

        let frame_len = 1 + header_len + remaining_length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        src.advance(1 + header_len);
        let body = src.split_to(remaining_length as usize).freeze();

        let packet = decode::decode_packet(body, first_byte, self.strict)?;
        if let Packet::Connect(connect) = &packet {
            self.set_protocol(connect.protocol);
        }
        Ok(Some((packet, remaining_length)))
    }
}

impl Encoder<Packet> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let content_size = encode::get_encoded_size(&item);
        //first byte plus at most four length bytes
        dst.reserve(content_size + 5);
        encode::encode(&item, dst, content_size as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Publish, QoS};
    use bytes::Bytes;
    use bytestring::ByteString;
    use std::num::NonZeroU16;

    #[test]
    fn test_max_size() {
        let mut codec = Codec::new(5);

        let mut buf = BytesMut::from(&b"\x30\x09"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxSizeExceeded)));

        //the limit itself is allowed
        let mut buf = BytesMut::from(&b"\x30\x05\x00\x01abc"[..]);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some((Packet::Publish(_), 5))));
    }

    #[test]
    fn test_large_publish() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();

        let pkt = Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic: ByteString::from_static("/test"),
            packet_id: None,
            payload: Bytes::from(Vec::from("a".repeat(260 * 1024))),
        };
        codec.encode(Packet::Publish(pkt.clone()), &mut buf).unwrap();

        let pkt2 =
            if let (Packet::Publish(v), _) = codec.decode(&mut buf).unwrap().unwrap() { v } else { panic!() };
        assert_eq!(pkt, pkt2);
    }

    #[test]
    fn test_partial_frames() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();

        // a PUBACK split across three reads, followed by the start of a PINGREQ
        buf.extend_from_slice(b"\x40");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);

        buf.extend_from_slice(b"\x02\x43");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\x21\xc0");
        let (p, len) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(p, Packet::PublishAck { packet_id: NonZeroU16::new(0x4321).unwrap() });
        assert_eq!(len, 2);
        assert_eq!(&buf[..], b"\xc0");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\x00");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().0, Packet::PingRequest);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_strict_after_connect() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x10\x0c\x00\x04MQTT\x04\x02\x00\x3c\x00\x00");
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some((Packet::Connect(_), _))));
        assert!(codec.is_strict());

        buf.extend_from_slice(b"\x60\x02\x00\x01");
        assert_eq!(
            codec.decode(&mut buf).map_err(|e| matches!(e, DecodeError::InvalidFlagBits(0x60))),
            Err(true)
        );

        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x10\x0e\x00\x06MQIsdp\x03\x02\x00\x3c\x00\x00");
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some((Packet::Connect(_), _))));
        assert!(!codec.is_strict());

        buf.extend_from_slice(b"\x60\x02\x00\x01");
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap().0,
            Packet::PublishRelease { packet_id: NonZeroU16::new(1).unwrap(), dup: false }
        );
    }
}
