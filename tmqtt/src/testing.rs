use std::num::NonZeroU16;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use bytestring::ByteString;
use parking_lot::Mutex;
use tokio_util::codec::Encoder;

use tmqtt_codec::v3::Codec;
use tmqtt_net::Transport;

use crate::connection::Connection;
use crate::context::{BrokerContext, BrokerSettings};
use crate::security::DefaultSecurity;
use crate::server::Broker;
use crate::types::{Connect, ConnectAck, ConnectAckReason, Packet, Protocol, Publish, QoS};

/// Transport that records every frame the broker writes.
#[derive(Default)]
pub(crate) struct MockTransport {
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl Transport for MockTransport {
    fn send(&self, data: Bytes) -> tmqtt_net::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("closed"));
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn frames(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
    }

    /// How many frames were exactly `packet`.
    pub(crate) fn count(&self, packet: Packet) -> usize {
        let expected = encode(packet);
        self.sent.lock().iter().filter(|f| **f == expected).count()
    }

    /// Frames whose fixed header type nibble is `packet_type`.
    pub(crate) fn count_type(&self, packet_type: u8) -> usize {
        self.sent.lock().iter().filter(|f| f.first().map(|b| b >> 4) == Some(packet_type)).count()
    }

    /// First bytes of the PUBLISH frames, in send order.
    pub(crate) fn publish_headers(&self) -> Vec<u8> {
        self.sent.lock().iter().filter_map(|f| f.first().copied()).filter(|b| b >> 4 == 3).collect()
    }
}

pub(crate) const PUBREL: u8 = 6;
pub(crate) const DUP: u8 = 0b0000_1000;

pub(crate) fn encode(packet: Packet) -> Bytes {
    let mut buf = BytesMut::new();
    Codec::default().encode(packet, &mut buf).unwrap();
    buf.freeze()
}

#[inline]
pub(crate) fn pid(id: u16) -> NonZeroU16 {
    NonZeroU16::new(id).unwrap()
}

pub(crate) fn publish(topic: &'static str, qos: QoS, id: u16, payload: &'static [u8]) -> Publish {
    Publish {
        dup: false,
        retain: false,
        qos,
        topic: ByteString::from_static(topic),
        packet_id: NonZeroU16::new(id),
        payload: Bytes::from_static(payload),
    }
}

pub(crate) fn connect_packet(client_id: &'static str, clean_session: bool) -> Packet {
    Packet::Connect(Box::new(Connect {
        protocol: Protocol::default(),
        clean_session,
        keep_alive: 0,
        last_will: None,
        client_id: ByteString::from_static(client_id),
        username: None,
        password: None,
    }))
}

pub(crate) fn connack(session_present: bool) -> Packet {
    Packet::ConnectAck(ConnectAck { return_code: ConnectAckReason::ConnectionAccepted, session_present })
}

pub(crate) fn broker_with(retry_delay: Duration, retry_attempts: u32) -> Broker {
    let settings = BrokerSettings { workers: 2, retry_delay, retry_attempts, ..BrokerSettings::default() };
    let broker = Broker::new(settings, Arc::new(DefaultSecurity));
    broker.context().set_running(true);
    broker
}

pub(crate) fn broker() -> Broker {
    broker_with(Duration::from_secs(10), 3)
}

/// Polls every worker until all queues are empty.
pub(crate) async fn drain(ctx: &BrokerContext) {
    for _ in 0..10_000 {
        let mut busy = false;
        for worker in ctx.workers.iter() {
            busy |= worker.poll_once(ctx).await;
        }
        if !busy {
            return;
        }
    }
    panic!("workers never went idle");
}

/// A client connection that has been accepted and admitted.
pub(crate) struct Client {
    pub(crate) conn: Arc<Connection>,
    pub(crate) transport: Arc<MockTransport>,
}

impl Client {
    pub(crate) async fn send(&self, broker: &Broker, packet: Packet) {
        broker.received(&self.conn, &encode(packet));
        drain(broker.context()).await;
    }
}

pub(crate) async fn accept(broker: &Broker) -> Client {
    let transport = Arc::new(MockTransport::default());
    let conn = broker.accept(transport.clone()).unwrap();
    Client { conn, transport }
}

pub(crate) async fn connect(broker: &Broker, client_id: &'static str, clean_session: bool) -> Client {
    let client = accept(broker).await;
    client.send(broker, connect_packet(client_id, clean_session)).await;
    assert!(client.conn.is_connected());
    client
}
