use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::num::NonZeroU16;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};

use tmqtt_codec::v3::Codec;
use tmqtt_net::Transport;
use tmqtt_utils::timestamp_millis;

use crate::dispatcher::Event;
use crate::error::MqttError;
use crate::inflight::{Flow, InflightEntry, InflightState};
use crate::session::ClientSession;
use crate::subscription::Subscription;
use crate::types::{
    ClientId, ConnectionId, LastWill, Packet, PacketId, Protocol, Publish, QoS, TimestampMillis, TopicFilter,
    UserName,
};
use crate::worker::Worker;
use crate::Result;

/// What the client told us in CONNECT, plus what we keep on its behalf.
#[derive(Default)]
pub struct ConnectionState {
    pub client_id: ClientId,
    pub protocol: Protocol,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<UserName>,
    pub will: Option<LastWill>,
    pub subscriptions: BTreeMap<TopicFilter, Subscription>,
    pub session: Option<Arc<ClientSession>>,
}

struct Decoding {
    codec: Codec,
    buf: BytesMut,
}

#[derive(Default)]
struct RetryTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// One live transport connection.
///
/// All processing of a connection happens on the worker it was pinned to at accept time.
/// Other workers only enqueue into it, so every queue here is safe to share.
pub struct Connection {
    pub id: ConnectionId,
    pub worker: Arc<Worker>,
    transport: Arc<dyn Transport>,
    pub created_at: TimestampMillis,

    connect_received: AtomicBool,
    connected: AtomicBool,
    running: AtomicBool,
    closing: AtomicBool,
    closed: AtomicBool,
    last_communication: AtomicI64,

    pub(crate) state: RwLock<ConnectionState>,
    decoding: Mutex<Decoding>,
    inflights: Mutex<VecDeque<InflightEntry>>,
    acks: Mutex<VecDeque<Packet>>,
    events: SegQueue<Event>,
    message_id: AtomicU16,
    retry: Mutex<RetryTimer>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        worker: Arc<Worker>,
        transport: Arc<dyn Transport>,
        max_packet_size: u32,
    ) -> Arc<Self> {
        let now = timestamp_millis();
        Arc::new(Self {
            id,
            worker,
            transport,
            created_at: now,
            connect_received: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_communication: AtomicI64::new(now),
            state: RwLock::new(ConnectionState::default()),
            decoding: Mutex::new(Decoding { codec: Codec::new(max_packet_size), buf: BytesMut::new() }),
            inflights: Mutex::new(VecDeque::new()),
            acks: Mutex::new(VecDeque::new()),
            events: SegQueue::new(),
            message_id: AtomicU16::new(0),
            retry: Mutex::new(RetryTimer::default()),
        })
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn connect_received(&self) -> bool {
        self.connect_received.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_connect_received(&self) {
        self.connect_received.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn set_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    /// True exactly once, for the caller that finalizes the teardown.
    #[inline]
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.state.read().client_id.clone()
    }

    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.state.read().protocol
    }

    #[inline]
    pub fn clean_session(&self) -> bool {
        self.state.read().clean_session
    }

    #[inline]
    pub fn keep_alive(&self) -> u16 {
        self.state.read().keep_alive
    }

    #[inline]
    pub fn username(&self) -> Option<UserName> {
        self.state.read().username.clone()
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<std::net::SocketAddr> {
        self.transport.remote_addr()
    }

    #[inline]
    pub fn client_session(&self) -> Option<Arc<ClientSession>> {
        self.state.read().session.clone()
    }

    #[inline]
    pub(crate) fn attach_session(&self) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new());
        self.state.write().session = Some(session.clone());
        session
    }

    #[inline]
    pub(crate) fn take_will(&self) -> Option<LastWill> {
        self.state.write().will.take()
    }

    #[inline]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.read().subscriptions.values().cloned().collect()
    }

    #[inline]
    pub fn last_communication(&self) -> TimestampMillis {
        self.last_communication.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn touch(&self) {
        self.last_communication.store(timestamp_millis(), Ordering::SeqCst);
    }

    /// Encodes `packet` and hands it to the transport.
    pub fn send(&self, packet: Packet) -> Result<()> {
        let mut buf = BytesMut::new();
        Codec::default().encode(packet, &mut buf)?;
        self.transport.send(buf.freeze()).map_err(MqttError::from)
    }

    #[inline]
    pub(crate) fn close_transport(&self) {
        self.transport.close();
    }

    /// Buffers received bytes until a worker decodes them.
    #[inline]
    pub(crate) fn feed(&self, data: &[u8]) {
        self.decoding.lock().buf.extend_from_slice(data);
    }

    /// Next complete packet in the decode buffer, `None` while a frame is still partial.
    #[inline]
    pub(crate) fn next_packet(&self) -> Result<Option<Packet>> {
        let mut decoding = self.decoding.lock();
        let Decoding { codec, buf } = &mut *decoding;
        Ok(codec.decode(buf)?.map(|(packet, _)| packet))
    }

    /// Starts closing: teardown runs once the pending events are handled.
    #[inline]
    pub fn request_close(self: &Arc<Self>) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            log::debug!("{:?} close requested", self);
        }
        self.worker.signal_events(self.clone());
    }

    #[inline]
    pub(crate) fn push_event(self: &Arc<Self>, event: Event) {
        self.events.push(event);
        self.worker.signal_events(self.clone());
    }

    #[inline]
    pub(crate) fn pop_event(&self) -> Option<Event> {
        self.events.pop()
    }

    /// Queues an entry for the inflight engine.
    ///
    /// A QoS 2 PUBLISH the client sends again while its exchange is still open restarts that
    /// exchange instead of being queued twice.
    pub fn enqueue_inflight(self: &Arc<Self>, entry: InflightEntry) {
        let session = self.client_session();
        {
            let mut inflights = self.inflights.lock();
            let resent_qos2 =
                entry.flow == Flow::ToAcknowledge && entry.publish().map(|p| p.qos == QoS::ExactlyOnce).unwrap_or(false);
            let existing = if resent_qos2 {
                let key = entry.key();
                inflights.iter_mut().find(|e| e.key() == key)
            } else {
                None
            };
            if let Some(existing) = existing {
                existing.state = InflightState::QueuedQos2;
                if let Some(s) = session.as_ref() {
                    s.update(existing);
                }
            } else {
                if let Some(s) = session.as_ref().filter(|_| entry.is_durable()) {
                    s.insert(&entry);
                }
                inflights.push_back(entry);
            }
        }
        self.worker.signal_inflights(self.clone());
    }

    /// Queues a message from the broker for delivery to this client.
    pub fn deliver(self: &Arc<Self>, mut publish: Publish) {
        if publish.qos != QoS::AtMostOnce {
            publish.packet_id = Some(self.next_packet_id());
        }
        self.enqueue_inflight(InflightEntry::from_publish(publish, Flow::ToPublish));
    }

    /// Next message id for a broker-initiated send, skipping ids still in flight.
    pub(crate) fn next_packet_id(&self) -> PacketId {
        #[inline]
        fn next(cur: u16) -> u16 {
            if cur == u16::MAX {
                1
            } else {
                cur + 1
            }
        }

        let inflights = self.inflights.lock();
        let mut candidate = next(self.message_id.load(Ordering::SeqCst));
        for _ in 0..u16::MAX {
            let in_use = inflights
                .iter()
                .any(|e| e.flow == Flow::ToPublish && e.packet_id().map(NonZeroU16::get) == Some(candidate));
            if !in_use {
                break;
            }
            candidate = next(candidate);
        }
        self.message_id.store(candidate, Ordering::SeqCst);
        NonZeroU16::new(candidate).unwrap_or(NonZeroU16::MIN)
    }

    #[inline]
    fn has_inflight(&self, flow: Flow, packet_id: PacketId) -> bool {
        self.inflights.lock().iter().any(|e| e.flow == flow && e.packet_id() == Some(packet_id))
    }

    /// Takes an acknowledgement received from the client.
    pub(crate) fn enqueue_ack(self: &Arc<Self>, ack: Packet) -> Result<()> {
        match ack {
            Packet::PublishRelease { packet_id, .. } if !self.has_inflight(Flow::ToAcknowledge, packet_id) => {
                //exchange already completed, the PUBCOMP got lost
                return self.send(Packet::PublishComplete { packet_id });
            }
            Packet::PublishReceived { packet_id } | Packet::PublishComplete { packet_id }
                if !self.has_inflight(Flow::ToPublish, packet_id) =>
            {
                log::debug!("{:?} ignore {}, packet_id: {}", self, ack.name(), packet_id);
                return Ok(());
            }
            _ => {}
        }
        self.acks.lock().push_back(ack);
        self.worker.signal_inflights(self.clone());
        Ok(())
    }

    #[inline]
    pub(crate) fn inflight_len(&self) -> usize {
        self.inflights.lock().len()
    }

    #[inline]
    pub(crate) fn pop_inflight(&self) -> Option<InflightEntry> {
        self.inflights.lock().pop_front()
    }

    #[inline]
    pub(crate) fn requeue_inflight(&self, entry: InflightEntry) {
        if let Some(s) = self.client_session() {
            s.update(&entry);
        }
        self.inflights.lock().push_back(entry);
    }

    #[inline]
    pub(crate) fn untrack_inflight(&self, entry: &InflightEntry) {
        if let (Some(s), Some(key)) = (self.client_session(), entry.key()) {
            s.remove(&key);
        }
    }

    #[inline]
    pub(crate) fn take_ack_if<F>(&self, f: F) -> Option<Packet>
    where
        F: Fn(&Packet) -> bool,
    {
        let mut acks = self.acks.lock();
        let pos = acks.iter().position(f)?;
        acks.remove(pos)
    }

    /// Drops acknowledgements at the head of the queue that no entry will ever consume.
    pub(crate) fn discard_orphan_acks(&self) {
        let inflights = self.inflights.lock();
        let mut acks = self.acks.lock();
        while let Some(ack) = acks.front() {
            if inflights.iter().any(|e| e.may_consume(ack)) {
                break;
            }
            log::debug!("{:?} orphan {} discarded, packet_id: {:?}", self, ack.name(), ack.packet_id());
            acks.pop_front();
        }
    }

    #[inline]
    pub(crate) fn has_pending_acks(&self) -> bool {
        !self.acks.lock().is_empty()
    }

    /// Replaces the pending retry wake. `None` disarms it, a zero delay reschedules right away.
    pub(crate) fn rearm_retry(self: &Arc<Self>, delay: Option<Duration>) {
        let mut retry = self.retry.lock();
        retry.generation = retry.generation.wrapping_add(1);
        if let Some(handle) = retry.handle.take() {
            handle.abort();
        }
        match delay {
            None => {}
            Some(delay) if delay.is_zero() => {
                drop(retry);
                self.worker.signal_inflights(self.clone());
            }
            Some(delay) => {
                let generation = retry.generation;
                let conn = Arc::downgrade(self);
                retry.handle = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(conn) = conn.upgrade() {
                        let current = conn.retry.lock().generation;
                        if conn.is_running() && current == generation {
                            conn.worker.signal_inflights(conn.clone());
                        }
                    }
                }));
            }
        }
    }

    #[inline]
    pub(crate) fn abort_retry(&self) {
        let mut retry = self.retry.lock();
        retry.generation = retry.generation.wrapping_add(1);
        if let Some(handle) = retry.handle.take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let client_id = self.state.try_read().map(|s| s.client_id.clone()).unwrap_or_default();
        match self.transport.remote_addr() {
            Some(addr) => write!(f, "{}@{}/{}", self.id, addr, client_id),
            None => write!(f, "{}/{}", self.id, client_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[tokio::test]
    async fn test_next_packet_id() {
        let broker = broker();
        let client = accept(&broker).await;
        let conn = &client.conn;
        assert_eq!(conn.next_packet_id().get(), 1);
        assert_eq!(conn.next_packet_id().get(), 2);

        conn.message_id.store(u16::MAX - 1, Ordering::SeqCst);
        conn.deliver(publish("a/b", QoS::AtLeastOnce, 0, b"x"));
        assert!(conn.has_inflight(Flow::ToPublish, pid(u16::MAX)));
        conn.deliver(publish("a/b", QoS::AtMostOnce, 0, b"x"));
        assert_eq!(conn.next_packet_id().get(), 1);

        //ids still waiting for an ack are skipped
        conn.message_id.store(u16::MAX - 1, Ordering::SeqCst);
        assert_eq!(conn.next_packet_id().get(), 1);
        conn.message_id.store(u16::MAX - 2, Ordering::SeqCst);
        assert_eq!(conn.next_packet_id().get(), u16::MAX - 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = broker();
        let client = accept(&broker).await;
        assert!(client.conn.mark_closed());
        assert!(!client.conn.mark_closed());
    }

    #[tokio::test]
    async fn test_rearm_retry_keeps_latest_wake() {
        let broker = broker();
        let client = accept(&broker).await;
        let conn = &client.conn;
        let worker = conn.worker.clone();

        conn.rearm_retry(Some(Duration::from_millis(20)));
        conn.rearm_retry(Some(Duration::from_millis(150)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(worker.queued_inflights(), 0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(worker.queued_inflights(), 1);

        conn.rearm_retry(Some(Duration::from_millis(20)));
        conn.rearm_retry(None);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(worker.queued_inflights(), 1);
    }

    #[tokio::test]
    async fn test_stale_wake_ignored() {
        let broker = broker();
        let client = accept(&broker).await;
        let conn = &client.conn;

        //a sleep that outlived its generation must not signal
        conn.rearm_retry(Some(Duration::from_millis(20)));
        conn.retry.lock().generation += 1;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(conn.worker.queued_inflights(), 0);

        conn.rearm_retry(Some(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(conn.worker.queued_inflights(), 1);
    }
}
