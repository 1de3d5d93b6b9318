//! Per-connection delivery state machine for QoS 1/2 publishes and acknowledged requests.
//!
//! Every connection owns a FIFO of [`InflightEntry`]. One [`process`] call walks the entries
//! that were queued when it started, advances each by at most one transition and puts the
//! unfinished ones back. Acknowledgements from the client wait in a separate queue and are
//! consumed by the entry they belong to. A retry wake is armed for the earliest deadline.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tmqtt_utils::timestamp_millis;

use crate::connection::Connection;
use crate::context::BrokerSettings;
use crate::dispatcher::Event;
use crate::error::MqttError;
use crate::types::{Packet, PacketId, Publish, QoS, TimestampMillis};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InflightState {
    QueuedQos0,
    QueuedQos1,
    QueuedQos2,
    SendSubscribe,
    SendUnsubscribe,
    WaitForPuback,
    WaitForSuback,
    WaitForUnsuback,
    WaitForPubrec,
    WaitForPubrel,
    WaitForPubcomp,
    SendPubrel,
}

impl InflightState {
    /// State an outgoing entry restarts from after the client reconnects.
    #[inline]
    pub fn resumed(self) -> Self {
        match self {
            InflightState::WaitForPuback => InflightState::QueuedQos1,
            InflightState::WaitForPubrec => InflightState::QueuedQos2,
            InflightState::WaitForPubcomp => InflightState::SendPubrel,
            s => s,
        }
    }

    /// State an outgoing entry goes back to when its acknowledgement timed out.
    #[inline]
    fn reverted(self) -> Self {
        match self {
            InflightState::WaitForPuback => InflightState::QueuedQos1,
            InflightState::WaitForSuback => InflightState::SendSubscribe,
            InflightState::WaitForUnsuback => InflightState::SendUnsubscribe,
            InflightState::WaitForPubrec => InflightState::QueuedQos2,
            InflightState::WaitForPubcomp => InflightState::SendPubrel,
            s => s,
        }
    }

    #[inline]
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            InflightState::WaitForPuback
                | InflightState::WaitForSuback
                | InflightState::WaitForUnsuback
                | InflightState::WaitForPubrec
                | InflightState::WaitForPubrel
                | InflightState::WaitForPubcomp
        )
    }

    /// Whether an entry in this state consumes `ack`.
    #[inline]
    fn accepts(self, ack: &Packet) -> bool {
        matches!(
            (self, ack),
            (InflightState::WaitForPuback, Packet::PublishAck { .. })
                | (InflightState::WaitForSuback, Packet::SubscribeAck { .. })
                | (InflightState::WaitForUnsuback, Packet::UnsubscribeAck { .. })
                | (InflightState::WaitForPubrec, Packet::PublishReceived { .. })
                | (InflightState::WaitForPubcomp, Packet::PublishComplete { .. } | Packet::PublishReceived { .. })
                | (InflightState::WaitForPubrel, Packet::PublishRelease { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flow {
    /// broker to client
    ToPublish,
    /// client to broker
    ToAcknowledge,
}

impl Flow {
    /// Direction of the entry an inbound acknowledgement belongs to.
    #[inline]
    pub fn of_ack(ack: &Packet) -> Flow {
        if matches!(ack, Packet::PublishRelease { .. }) {
            Flow::ToAcknowledge
        } else {
            Flow::ToPublish
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InflightKey {
    pub flow: Flow,
    pub packet_id: PacketId,
}

impl InflightKey {
    #[inline]
    pub fn of_ack(ack: &Packet) -> Option<InflightKey> {
        ack.packet_id().map(|packet_id| InflightKey { flow: Flow::of_ack(ack), packet_id })
    }
}

#[derive(Debug, Clone)]
pub struct InflightEntry {
    pub packet: Packet,
    pub state: InflightState,
    pub flow: Flow,
    /// last send, milliseconds
    pub timestamp: TimestampMillis,
    pub attempt: u32,
}

impl InflightEntry {
    pub fn new(packet: Packet, flow: Flow) -> Result<Self> {
        let state = match &packet {
            Packet::Publish(p) => Self::queued(p.qos),
            Packet::Subscribe { .. } if flow == Flow::ToPublish => InflightState::SendSubscribe,
            Packet::Unsubscribe { .. } if flow == Flow::ToPublish => InflightState::SendUnsubscribe,
            _ => return Err(MqttError::UnexpectedPacket(packet.name())),
        };
        Ok(Self { packet, state, flow, timestamp: 0, attempt: 0 })
    }

    #[inline]
    pub fn from_publish(publish: Publish, flow: Flow) -> Self {
        let state = Self::queued(publish.qos);
        Self { packet: Packet::Publish(publish), state, flow, timestamp: 0, attempt: 0 }
    }

    #[inline]
    fn queued(qos: QoS) -> InflightState {
        match qos {
            QoS::AtMostOnce => InflightState::QueuedQos0,
            QoS::AtLeastOnce => InflightState::QueuedQos1,
            QoS::ExactlyOnce => InflightState::QueuedQos2,
        }
    }

    #[inline]
    pub fn packet_id(&self) -> Option<PacketId> {
        self.packet.packet_id()
    }

    #[inline]
    pub fn key(&self) -> Option<InflightKey> {
        self.packet_id().map(|packet_id| InflightKey { flow: self.flow, packet_id })
    }

    #[inline]
    pub fn publish(&self) -> Option<&Publish> {
        if let Packet::Publish(p) = &self.packet {
            Some(p)
        } else {
            None
        }
    }

    /// Kept in the durable map of a persistent session.
    #[inline]
    pub fn is_durable(&self) -> bool {
        match (self.publish(), self.flow) {
            (Some(p), Flow::ToPublish) => p.qos != QoS::AtMostOnce,
            (Some(p), Flow::ToAcknowledge) => p.qos == QoS::ExactlyOnce,
            (None, _) => false,
        }
    }

    #[inline]
    pub(crate) fn consumes(&self, ack: &Packet) -> bool {
        self.key() == InflightKey::of_ack(ack) && self.state.accepts(ack)
    }

    /// An ack is kept while some entry with its key still waits for it or is about to.
    #[inline]
    pub(crate) fn may_consume(&self, ack: &Packet) -> bool {
        self.key() == InflightKey::of_ack(ack) && (!self.state.is_waiting() || self.state.accepts(ack))
    }

    #[inline]
    fn outgoing(&self) -> Packet {
        match &self.packet {
            Packet::Publish(p) => Packet::Publish(Publish { dup: self.attempt > 1, ..p.clone() }),
            other => other.clone(),
        }
    }
}

struct Pass<'a> {
    settings: &'a BrokerSettings,
    now: TimestampMillis,
    //earliest pending deadline, milliseconds from now
    wake: Option<i64>,
    immediate: bool,
    //first send failure, reported once the pass is complete
    failed: Option<MqttError>,
}

impl Pass<'_> {
    #[inline]
    fn retry_delay(&self) -> i64 {
        self.settings.retry_delay.as_millis() as i64
    }

    #[inline]
    fn wake_in(&mut self, millis: i64) {
        self.wake = Some(self.wake.map_or(millis, |w| w.min(millis)));
    }

    /// Sends `packet`. A failure is kept for the caller and the entry still advances, so the
    /// rest of the queue is processed and the entry is retried like a lost packet.
    fn send(&mut self, conn: &Connection, packet: Packet) {
        if let Err(e) = conn.send(packet) {
            log::debug!("{:?} inflight send failed, {}", conn, e);
            self.failed.get_or_insert(e);
        }
    }
}

/// Runs one bounded pass over the connection's inflight queue.
pub(crate) fn process(settings: &BrokerSettings, conn: &Arc<Connection>) -> Result<()> {
    if !conn.is_running() {
        return Ok(());
    }

    let mut pass = Pass { settings, now: timestamp_millis(), wake: None, immediate: false, failed: None };
    let count = conn.inflight_len();
    for _ in 0..count {
        let Some(entry) = conn.pop_inflight() else {
            break;
        };
        step(conn, entry, &mut pass);
    }

    conn.discard_orphan_acks();
    if conn.has_pending_acks() {
        pass.immediate = true;
    }

    //entries only waiting on the client need no wake, their ack signals the worker
    let delay = match (conn.inflight_len(), pass.immediate, pass.wake) {
        (0, _, _) => None,
        (_, true, _) => Some(Duration::ZERO),
        (_, false, Some(millis)) => Some(Duration::from_millis(millis.max(0) as u64)),
        (_, false, None) => None,
    };
    conn.rearm_retry(delay);
    pass.failed.map_or(Ok(()), Err)
}

fn step(conn: &Arc<Connection>, mut entry: InflightEntry, pass: &mut Pass<'_>) {
    use InflightState::*;

    match (entry.state, entry.flow) {
        (QueuedQos0, Flow::ToPublish) => {
            pass.send(conn, entry.packet);
        }
        (QueuedQos0, Flow::ToAcknowledge) => {
            if let Packet::Publish(p) = entry.packet {
                conn.push_event(Event::Deliver(p));
            }
        }
        (QueuedQos1 | QueuedQos2 | SendSubscribe | SendUnsubscribe, Flow::ToPublish) => {
            entry.attempt += 1;
            entry.timestamp = pass.now;
            pass.send(conn, entry.outgoing());
            entry.state = match entry.state {
                QueuedQos1 => WaitForPuback,
                QueuedQos2 => WaitForPubrec,
                SendSubscribe => WaitForSuback,
                _ => WaitForUnsuback,
            };
            conn.requeue_inflight(entry);
            pass.wake_in(pass.retry_delay());
        }
        (QueuedQos1, Flow::ToAcknowledge) => {
            if let Packet::Publish(p) = entry.packet {
                if let Some(packet_id) = p.packet_id {
                    pass.send(conn, Packet::PublishAck { packet_id });
                }
                conn.push_event(Event::Deliver(p));
            }
        }
        (QueuedQos2, Flow::ToAcknowledge) => {
            if let Some(packet_id) = entry.packet_id() {
                pass.send(conn, Packet::PublishReceived { packet_id });
            }
            entry.state = WaitForPubrel;
            conn.requeue_inflight(entry);
        }
        (WaitForPuback | WaitForSuback | WaitForUnsuback, Flow::ToPublish) => {
            match conn.take_ack_if(|ack| entry.consumes(ack)) {
                Some(ack) => {
                    conn.untrack_inflight(&entry);
                    let event = match ack {
                        Packet::PublishAck { packet_id } => Event::Published { packet_id, published: true },
                        Packet::SubscribeAck { packet_id, .. } => Event::Subscribed { packet_id },
                        Packet::UnsubscribeAck { packet_id } => Event::Unsubscribed { packet_id },
                        _ => return,
                    };
                    conn.push_event(event);
                }
                None => on_pending(conn, entry, pass),
            }
        }
        (WaitForPubrec, Flow::ToPublish) => match conn.take_ack_if(|ack| entry.consumes(ack)) {
            Some(_) => {
                if let Some(packet_id) = entry.packet_id() {
                    pass.send(conn, Packet::PublishRelease { packet_id, dup: false });
                }
                entry.attempt = 1;
                entry.timestamp = pass.now;
                entry.state = WaitForPubcomp;
                conn.requeue_inflight(entry);
                pass.wake_in(pass.retry_delay());
            }
            None => on_pending(conn, entry, pass),
        },
        (WaitForPubrel, Flow::ToAcknowledge) => match conn.take_ack_if(|ack| entry.consumes(ack)) {
            Some(_) => {
                conn.untrack_inflight(&entry);
                if let Packet::Publish(p) = entry.packet {
                    if let Some(packet_id) = p.packet_id {
                        pass.send(conn, Packet::PublishComplete { packet_id });
                    }
                    conn.push_event(Event::Deliver(p));
                }
            }
            None => {
                //the client drives this exchange, nothing to retransmit
                conn.requeue_inflight(entry);
            }
        },
        (SendPubrel, Flow::ToPublish) => {
            entry.attempt += 1;
            entry.timestamp = pass.now;
            let dup = conn.protocol().is_v31() && entry.attempt > 1;
            if let Some(packet_id) = entry.packet_id() {
                pass.send(conn, Packet::PublishRelease { packet_id, dup });
            }
            entry.state = WaitForPubcomp;
            conn.requeue_inflight(entry);
            pass.wake_in(pass.retry_delay());
        }
        (WaitForPubcomp, Flow::ToPublish) => match conn.take_ack_if(|ack| entry.consumes(ack)) {
            Some(Packet::PublishComplete { packet_id }) => {
                conn.untrack_inflight(&entry);
                conn.push_event(Event::Published { packet_id, published: true });
            }
            Some(_) => {
                //late duplicate PUBREC
                pass.wake_in((pass.retry_delay() - (pass.now - entry.timestamp)).max(0));
                conn.requeue_inflight(entry);
            }
            None => on_pending(conn, entry, pass),
        },
        (state, flow) => {
            log::warn!("{:?} unexpected inflight entry, state: {:?}, flow: {:?}, dropped", conn, state, flow);
            conn.untrack_inflight(&entry);
        }
    }
}

/// Nothing to consume yet, either wait on or give up.
fn on_pending(conn: &Arc<Connection>, mut entry: InflightEntry, pass: &mut Pass<'_>) {
    let retry_delay = pass.retry_delay();
    let elapsed = pass.now - entry.timestamp;
    if elapsed < retry_delay {
        pass.wake_in(retry_delay - elapsed);
        conn.requeue_inflight(entry);
    } else if entry.attempt < pass.settings.retry_attempts {
        entry.state = entry.state.reverted();
        pass.immediate = true;
        conn.requeue_inflight(entry);
    } else {
        conn.untrack_inflight(&entry);
        log::debug!("{:?} retries exhausted, state: {:?}, attempt: {}", conn, entry.state, entry.attempt);
        if let (Some(_), Some(packet_id)) = (entry.publish(), entry.packet_id()) {
            conn.push_event(Event::Published { packet_id, published: false });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytestring::ByteString;

    use super::*;
    use crate::testing::*;
    use crate::types::{Connect, Protocol, MQTT_LEVEL_31, MQTT_LEVEL_311};
    use tmqtt_net::Transport;

    #[test]
    fn test_resumed_and_reverted() {
        assert_eq!(InflightState::WaitForPuback.resumed(), InflightState::QueuedQos1);
        assert_eq!(InflightState::WaitForPubrec.resumed(), InflightState::QueuedQos2);
        assert_eq!(InflightState::WaitForPubcomp.resumed(), InflightState::SendPubrel);
        assert_eq!(InflightState::WaitForPubrel.resumed(), InflightState::WaitForPubrel);
        assert_eq!(InflightState::WaitForSuback.reverted(), InflightState::SendSubscribe);
        assert_eq!(InflightState::WaitForUnsuback.reverted(), InflightState::SendUnsubscribe);
        assert_eq!(InflightState::WaitForPubcomp.reverted(), InflightState::SendPubrel);
    }

    #[test]
    fn test_initial_state() {
        let entry = InflightEntry::from_publish(publish("a", QoS::ExactlyOnce, 3, b"x"), Flow::ToAcknowledge);
        assert_eq!(entry.state, InflightState::QueuedQos2);
        assert!(entry.is_durable());
        assert_eq!(entry.key(), Some(InflightKey { flow: Flow::ToAcknowledge, packet_id: pid(3) }));

        let entry = InflightEntry::from_publish(publish("a", QoS::AtLeastOnce, 3, b"x"), Flow::ToAcknowledge);
        assert!(!entry.is_durable());
        let entry = InflightEntry::from_publish(publish("a", QoS::AtMostOnce, 0, b"x"), Flow::ToPublish);
        assert_eq!(entry.key(), None);

        let sub = Packet::Subscribe {
            packet_id: pid(1),
            topic_filters: vec![(ByteString::from_static("a/+"), QoS::AtLeastOnce)],
        };
        assert_eq!(InflightEntry::new(sub, Flow::ToPublish).unwrap().state, InflightState::SendSubscribe);
        assert!(InflightEntry::new(Packet::PingRequest, Flow::ToPublish).is_err());
    }

    #[test]
    fn test_ack_matching() {
        let mut entry = InflightEntry::from_publish(publish("a", QoS::ExactlyOnce, 9, b"x"), Flow::ToPublish);
        entry.state = InflightState::WaitForPubcomp;
        assert!(entry.consumes(&Packet::PublishComplete { packet_id: pid(9) }));
        assert!(entry.consumes(&Packet::PublishReceived { packet_id: pid(9) }));
        assert!(!entry.consumes(&Packet::PublishComplete { packet_id: pid(8) }));
        assert!(!entry.consumes(&Packet::PublishAck { packet_id: pid(9) }));
        assert!(!entry.may_consume(&Packet::PublishAck { packet_id: pid(9) }));

        entry.state = InflightState::SendPubrel;
        assert!(entry.may_consume(&Packet::PublishAck { packet_id: pid(9) }));
    }

    #[tokio::test]
    async fn test_qos1_acked_before_retry() {
        let broker = broker();
        let ctx = broker.context();
        let client = connect(&broker, "c1", false).await;
        client.transport.clear();

        client.conn.deliver(publish("a/b", QoS::AtLeastOnce, 0, b"x"));
        drain(ctx).await;
        assert_eq!(client.transport.publish_headers(), vec![0x32]);
        let session = client.conn.client_session().unwrap();
        assert_eq!(session.len(), 1);

        client.send(&broker, Packet::PublishAck { packet_id: pid(1) }).await;
        assert!(session.is_empty());
        assert_eq!(client.conn.inflight_len(), 0);
        assert_eq!(ctx.stats.ackeds.count(), 1);
        assert_eq!(ctx.stats.publish_failures.count(), 0);
        assert_eq!(client.transport.publish_headers().len(), 1);
    }

    #[tokio::test]
    async fn test_qos1_retries_exhausted() {
        let broker = broker_with(Duration::ZERO, 3);
        let ctx = broker.context();
        let client = connect(&broker, "c1", false).await;
        client.transport.clear();

        client.conn.deliver(publish("a/b", QoS::AtLeastOnce, 0, b"x"));
        drain(ctx).await;
        assert_eq!(client.transport.publish_headers(), vec![0x32, 0x32 | DUP, 0x32 | DUP]);
        assert_eq!(client.conn.inflight_len(), 0);
        assert!(client.conn.client_session().unwrap().is_empty());
        assert_eq!(ctx.stats.publish_failures.count(), 1);
        assert_eq!(ctx.stats.ackeds.count(), 0);

        //a late PUBACK is an orphan
        client.send(&broker, Packet::PublishAck { packet_id: pid(1) }).await;
        assert_eq!(ctx.stats.ackeds.count(), 0);
        assert!(!client.conn.has_pending_acks());
    }

    #[tokio::test]
    async fn test_qos2_send_with_duplicate_pubrec() {
        let broker = broker();
        let ctx = broker.context();
        let client = connect(&broker, "c1", false).await;
        client.transport.clear();

        client.conn.deliver(publish("a/b", QoS::ExactlyOnce, 0, b"x"));
        drain(ctx).await;
        assert_eq!(client.transport.publish_headers(), vec![0x34]);

        client.send(&broker, Packet::PublishReceived { packet_id: pid(1) }).await;
        let pubrel = Packet::PublishRelease { packet_id: pid(1), dup: false };
        assert_eq!(client.transport.count(pubrel.clone()), 1);

        client.send(&broker, Packet::PublishReceived { packet_id: pid(1) }).await;
        assert_eq!(client.transport.count(pubrel), 1);
        assert_eq!(client.conn.inflight_len(), 1);
        assert_eq!(ctx.stats.ackeds.count(), 0);

        client.send(&broker, Packet::PublishComplete { packet_id: pid(1) }).await;
        assert_eq!(ctx.stats.ackeds.count(), 1);
        assert_eq!(client.conn.inflight_len(), 0);
        assert!(client.conn.client_session().unwrap().is_empty());

        client.send(&broker, Packet::PublishComplete { packet_id: pid(1) }).await;
        assert_eq!(ctx.stats.ackeds.count(), 1);
    }

    async fn pubrel_retries(protocol: Protocol) -> (usize, usize) {
        let broker = broker_with(Duration::ZERO, 2);
        let client = accept(&broker).await;
        let connect = Connect { protocol, clean_session: true, client_id: ByteString::from_static("c1"), ..Connect::default() };
        client.send(&broker, Packet::Connect(Box::new(connect))).await;
        client.transport.clear();

        //PUBREC is already buffered when the PUBLISH goes out, so only PUBREL is retried
        client.conn.deliver(publish("a/b", QoS::ExactlyOnce, 0, b"x"));
        broker.received(&client.conn, &encode(Packet::PublishReceived { packet_id: pid(1) }));
        drain(broker.context()).await;

        assert_eq!(client.transport.publish_headers().len(), 1);
        assert_eq!(client.transport.count_type(PUBREL), 2);
        assert_eq!(broker.context().stats.publish_failures.count(), 1);
        (
            client.transport.count(Packet::PublishRelease { packet_id: pid(1), dup: false }),
            client.transport.count(Packet::PublishRelease { packet_id: pid(1), dup: true }),
        )
    }

    #[tokio::test]
    async fn test_pubrel_retry_dup() {
        assert_eq!(pubrel_retries(Protocol(MQTT_LEVEL_311)).await, (2, 0));
        assert_eq!(pubrel_retries(Protocol(MQTT_LEVEL_31)).await, (1, 1));
    }

    #[tokio::test]
    async fn test_qos2_receive_with_duplicates() {
        let broker = broker();
        let subscriber = connect(&broker, "s1", true).await;
        let sub = Packet::Subscribe {
            packet_id: pid(1),
            topic_filters: vec![(ByteString::from_static("a/b"), QoS::AtMostOnce)],
        };
        subscriber.send(&broker, sub).await;
        subscriber.transport.clear();

        let publisher = connect(&broker, "p1", true).await;
        let incoming = publish("a/b", QoS::ExactlyOnce, 5, b"x");
        publisher.send(&broker, Packet::Publish(incoming.clone())).await;
        assert_eq!(publisher.transport.count(Packet::PublishReceived { packet_id: pid(5) }), 1);

        publisher.send(&broker, Packet::Publish(Publish { dup: true, ..incoming })).await;
        assert_eq!(publisher.transport.count(Packet::PublishReceived { packet_id: pid(5) }), 2);
        assert!(subscriber.transport.publish_headers().is_empty());

        let pubrel = Packet::PublishRelease { packet_id: pid(5), dup: false };
        publisher.send(&broker, pubrel.clone()).await;
        assert_eq!(publisher.transport.count(Packet::PublishComplete { packet_id: pid(5) }), 1);
        assert_eq!(subscriber.transport.publish_headers(), vec![0x30]);

        publisher.send(&broker, pubrel).await;
        assert_eq!(publisher.transport.count(Packet::PublishComplete { packet_id: pid(5) }), 2);
        assert_eq!(subscriber.transport.publish_headers().len(), 1);
        assert_eq!(publisher.conn.inflight_len(), 0);
    }

    #[tokio::test]
    async fn test_retry_timer_with_running_workers() {
        let broker = broker_with(Duration::from_millis(40), 3);
        let ctx = broker.context();
        let client = connect(&broker, "c1", false).await;
        client.transport.clear();
        broker.start();

        client.conn.deliver(publish("a/b", QoS::AtLeastOnce, 0, b"x"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(client.transport.publish_headers(), vec![0x32, 0x32 | DUP, 0x32 | DUP]);
        assert_eq!(ctx.stats.publish_failures.count(), 1);
        assert_eq!(client.conn.inflight_len(), 0);
        broker.shutdown();
    }

    #[tokio::test]
    async fn test_send_failure_keeps_entries() {
        let broker = broker();
        let ctx = broker.context();
        let client = connect(&broker, "c1", false).await;
        client.transport.close();

        client.conn.deliver(publish("a/b", QoS::AtLeastOnce, 0, b"x"));
        client.conn.deliver(publish("a/c", QoS::AtLeastOnce, 0, b"y"));
        assert!(process(&ctx.settings, &client.conn).is_err());
        //both were attempted and now wait for PUBACK like any lost packet
        assert_eq!(client.conn.inflight_len(), 2);
        assert_eq!(client.conn.client_session().unwrap().len(), 2);
        assert_eq!(ctx.stats.publish_failures.count(), 0);
        assert!(!client.conn.is_closing());
    }
}
