use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::context::BrokerContext;
use crate::inflight::{Flow, InflightEntry, InflightKey};
use crate::subscription::Subscription;
use crate::types::{ClientId, DashMap, Publish};
use crate::{router, Result};

/// Inflight entries of a live connection that must survive a disconnect.
///
/// Only attached to connections that asked for a persistent session.
#[derive(Default)]
pub struct ClientSession {
    inflights: Mutex<BTreeMap<InflightKey, InflightEntry>>,
}

impl ClientSession {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn insert(&self, entry: &InflightEntry) {
        if let Some(key) = entry.key() {
            self.inflights.lock().insert(key, entry.clone());
        }
    }

    /// Keeps the stored copy in step with the live entry, entries not tracked are ignored.
    #[inline]
    pub(crate) fn update(&self, entry: &InflightEntry) {
        if let Some(key) = entry.key() {
            if let Some(stored) = self.inflights.lock().get_mut(&key) {
                *stored = entry.clone();
            }
        }
    }

    #[inline]
    pub(crate) fn remove(&self, key: &InflightKey) -> Option<InflightEntry> {
        self.inflights.lock().remove(key)
    }

    #[inline]
    pub fn entries(&self) -> Vec<InflightEntry> {
        self.inflights.lock().values().cloned().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inflights.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Broker-side state of a persistent client, kept while it is offline.
pub struct Session {
    pub client_id: ClientId,
    pub subscriptions: Vec<Subscription>,
    pub inflights: Vec<InflightEntry>,
    pub outbox: VecDeque<Publish>,
    connection: Option<Weak<Connection>>,
}

impl Session {
    #[inline]
    fn new(client_id: ClientId) -> Self {
        Self { client_id, subscriptions: Vec::new(), inflights: Vec::new(), outbox: VecDeque::new(), connection: None }
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.connection.as_ref().and_then(Weak::upgrade).map(|c| c.is_running()).unwrap_or(false)
    }

    #[inline]
    pub fn matches(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|sub| sub.matches(topic))
    }

    /// First subscription matching `topic`, in subscription order.
    #[inline]
    pub fn first_match(&self, topic: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|sub| sub.matches(topic))
    }
}

pub type SessionRef = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<ClientId, SessionRef>,
}

impl SessionStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, client_id: &str) -> Option<SessionRef> {
        self.sessions.get(client_id).map(|s| s.value().clone())
    }

    /// Snapshots the state of a disconnecting client. The outbox of an existing session is kept.
    pub fn save(&self, client_id: ClientId, subscriptions: Vec<Subscription>, inflights: Vec<InflightEntry>) {
        let session =
            self.sessions.entry(client_id.clone()).or_insert_with(|| Arc::new(Mutex::new(Session::new(client_id)))).clone();
        let mut session = session.lock();
        session.connection = None;
        session.subscriptions = subscriptions.iter().map(Subscription::detached).collect();
        session.inflights = inflights;
    }

    #[inline]
    pub fn clear(&self, client_id: &str) -> Option<SessionRef> {
        self.sessions.remove(client_id).map(|(_, s)| s)
    }

    /// Offline sessions holding a subscription that matches `topic`.
    pub fn offline_matching(&self, topic: &str) -> Vec<SessionRef> {
        self.sessions
            .iter()
            .filter(|entry| {
                let session = entry.value().lock();
                !session.is_online() && session.matches(topic)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Moves a stored session onto a reconnecting client.
///
/// Outgoing inflight messages are queued again so the client sees them retransmitted,
/// subscriptions are restored with their retained messages, then the outbox is drained.
pub(crate) fn resume(ctx: &BrokerContext, conn: &Arc<Connection>, session: &SessionRef) -> Result<()> {
    let (subscriptions, inflights) = {
        let mut s = session.lock();
        s.connection = Some(Arc::downgrade(conn));
        (s.subscriptions.clone(), std::mem::take(&mut s.inflights))
    };

    log::debug!(
        "{:?} resume session, subscriptions: {}, inflights: {}",
        conn,
        subscriptions.len(),
        inflights.len()
    );

    for mut entry in inflights.into_iter().filter(|e| e.flow == Flow::ToPublish) {
        entry.state = entry.state.resumed();
        conn.enqueue_inflight(entry);
    }

    for sub in subscriptions {
        let sub = sub.attach(conn);
        router::subscribe(ctx, conn, sub.clone())?;
        router::deliver_retained(ctx, conn, &sub)?;
    }

    router::publish_session(conn, session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use bytes::Bytes;
    use bytestring::ByteString;

    use super::*;
    use crate::inflight::InflightState;
    use crate::types::{Packet, QoS, TopicFilter};

    fn publish(qos: QoS, id: u16) -> Publish {
        Publish {
            dup: false,
            retain: false,
            qos,
            topic: ByteString::from_static("a/b"),
            packet_id: NonZeroU16::new(id),
            payload: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn test_client_session_tracking() {
        let cs = ClientSession::new();
        let mut entry = InflightEntry::new(Packet::Publish(publish(QoS::AtLeastOnce, 7)), Flow::ToPublish).unwrap();
        cs.insert(&entry);
        assert_eq!(cs.len(), 1);

        entry.state = InflightState::WaitForPuback;
        cs.update(&entry);
        assert_eq!(cs.entries()[0].state, InflightState::WaitForPuback);

        let other = InflightEntry::new(Packet::Publish(publish(QoS::AtLeastOnce, 8)), Flow::ToPublish).unwrap();
        cs.update(&other);
        assert_eq!(cs.len(), 1);

        assert!(cs.remove(&entry.key().unwrap()).is_some());
        assert!(cs.is_empty());
    }

    #[test]
    fn test_save_keeps_outbox() {
        let store = SessionStore::new();
        let client_id = ClientId::from_static("c1");
        let sub = Subscription::new(client_id.clone(), TopicFilter::from_static("a/+"), QoS::AtLeastOnce, None)
            .unwrap();

        store.save(client_id.clone(), vec![sub.clone()], Vec::new());
        assert_eq!(store.offline_matching("a/b").len(), 1);
        assert!(store.offline_matching("b/a").is_empty());

        if let Some(s) = store.get("c1") {
            s.lock().outbox.push_back(publish(QoS::AtLeastOnce, 0));
        }
        store.save(client_id, vec![sub], Vec::new());
        assert_eq!(store.get("c1").map(|s| s.lock().outbox.len()), Some(1));

        assert!(store.clear("c1").is_some());
        assert!(store.get("c1").is_none());
        assert!(store.is_empty());
    }
}
