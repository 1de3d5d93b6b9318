use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use tmqtt_utils::Counter;

use crate::connection::Connection;
use crate::topic::{Topic, TopicError};
use crate::types::{ClientId, DashMap, HashMap, QoS, TopicFilter};
use crate::Result;

/// One client's interest in one topic filter.
#[derive(Clone)]
pub struct Subscription {
    pub client_id: ClientId,
    pub topic_filter: TopicFilter,
    pub qos: QoS,
    matcher: Arc<Topic>,
    connection: Option<Weak<Connection>>,
}

impl Subscription {
    pub fn new(
        client_id: ClientId,
        topic_filter: TopicFilter,
        qos: QoS,
        connection: Option<&Arc<Connection>>,
    ) -> std::result::Result<Self, TopicError> {
        let matcher = Arc::new(Topic::filter(&topic_filter)?);
        Ok(Self { client_id, topic_filter, qos, matcher, connection: connection.map(Arc::downgrade) })
    }

    #[inline]
    pub fn matches(&self, topic: &str) -> bool {
        self.matcher.matches_str(topic)
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.matcher.has_wildcards()
    }

    /// The live connection this subscription delivers to, if it is still around.
    #[inline]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.as_ref().and_then(Weak::upgrade)
    }

    #[inline]
    pub fn is_owned_by(&self, connection: &Connection) -> bool {
        self.connection.as_ref().map(|c| std::ptr::eq(c.as_ptr(), connection)).unwrap_or(false)
    }

    /// Copy without the connection reference, as kept by an offline session.
    #[inline]
    pub fn detached(&self) -> Self {
        Self { connection: None, ..self.clone() }
    }

    #[inline]
    pub(crate) fn attach(&self, connection: &Arc<Connection>) -> Self {
        Self { connection: Some(Arc::downgrade(connection)), ..self.clone() }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("client_id", &self.client_id)
            .field("topic_filter", &self.topic_filter)
            .field("qos", &self.qos)
            .field("online", &self.connection().is_some())
            .finish()
    }
}

struct Subscribers {
    matcher: Arc<Topic>,
    entries: RwLock<HashMap<ClientId, Subscription>>,
}

/// Topic filter to subscribers, split into exact filters (looked up by key) and
/// wildcard filters (scanned with their precompiled matcher).
#[derive(Default)]
pub struct SubscriptionRegistry {
    exact: DashMap<TopicFilter, Subscribers>,
    wildcard: DashMap<TopicFilter, Subscribers>,
    subscriptions: Counter,
}

impl SubscriptionRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn partition(&self, wildcard: bool) -> &DashMap<TopicFilter, Subscribers> {
        if wildcard {
            &self.wildcard
        } else {
            &self.exact
        }
    }

    /// Registers `sub`, replacing an earlier entry of the same client for the same filter.
    ///
    /// Returns true when the entry is new.
    pub fn subscribe(&self, sub: Subscription) -> Result<bool> {
        let map = self.partition(sub.is_wildcard());
        // the entry guard keeps the shard locked, so an empty list cannot be pruned under us
        let subscribers = map
            .entry(sub.topic_filter.clone())
            .or_insert_with(|| Subscribers { matcher: sub.matcher.clone(), entries: RwLock::default() });
        let is_new = subscribers.entries.write().insert(sub.client_id.clone(), sub).is_none();
        if is_new {
            self.subscriptions.inc();
        }
        Ok(is_new)
    }

    /// Removes the client's entry for `topic_filter`, a no-op when there is none.
    #[inline]
    pub fn unsubscribe(&self, client_id: &str, topic_filter: &str) -> bool {
        self.unsubscribe_if(client_id, topic_filter, |_| true)
    }

    fn unsubscribe_if<F>(&self, client_id: &str, topic_filter: &str, f: F) -> bool
    where
        F: Fn(&Subscription) -> bool,
    {
        let map = self.partition(crate::topic::is_wildcard_filter(topic_filter));
        let removed = map
            .get(topic_filter)
            .map(|subscribers| {
                let mut entries = subscribers.entries.write();
                if entries.get(client_id).map(&f).unwrap_or(false) {
                    entries.remove(client_id).is_some()
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if removed {
            self.subscriptions.dec();
            map.remove_if(topic_filter, |_, subscribers| subscribers.entries.read().is_empty());
        }
        removed
    }

    /// Drops the given filters of a connection, skipping entries that meanwhile belong to a
    /// newer connection of the same client.
    pub fn unsubscribe_all<'a, I>(&self, client_id: &str, connection: &Connection, topic_filters: I) -> usize
    where
        I: IntoIterator<Item = &'a TopicFilter>,
    {
        topic_filters
            .into_iter()
            .filter(|tf| self.unsubscribe_if(client_id, tf, |sub| sub.is_owned_by(connection)))
            .count()
    }

    /// Subscribers whose filter matches `topic`, one per client.
    ///
    /// A client matching through several filters is represented by the one with the highest
    /// QoS, ties going to the lexicographically smallest filter.
    pub fn subscribers(&self, topic: &str) -> Vec<Subscription> {
        let mut found: BTreeMap<ClientId, Subscription> = BTreeMap::new();
        let mut merge = |sub: &Subscription| match found.entry(sub.client_id.clone()) {
            Entry::Vacant(e) => {
                e.insert(sub.clone());
            }
            Entry::Occupied(mut e) => {
                let cur = e.get();
                if sub.qos > cur.qos || (sub.qos == cur.qos && sub.topic_filter < cur.topic_filter) {
                    e.insert(sub.clone());
                }
            }
        };

        if let Some(subscribers) = self.exact.get(topic) {
            subscribers.entries.read().values().for_each(&mut merge);
        }
        for item in self.wildcard.iter() {
            if item.matcher.matches_str(topic) {
                item.entries.read().values().for_each(&mut merge);
            }
        }
        found.into_values().collect()
    }

    #[inline]
    pub fn get(&self, client_id: &str, topic_filter: &str) -> Option<Subscription> {
        self.partition(crate::topic::is_wildcard_filter(topic_filter))
            .get(topic_filter)
            .and_then(|subscribers| subscribers.entries.read().get(client_id).cloned())
    }

    #[inline]
    pub fn count(&self) -> isize {
        self.subscriptions.count()
    }

    #[inline]
    pub fn filters_count(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(client_id: &'static str, filter: &'static str, qos: QoS) -> Subscription {
        Subscription::new(ClientId::from_static(client_id), TopicFilter::from_static(filter), qos, None).unwrap()
    }

    #[test]
    fn test_exact_and_wildcard() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(sub("c1", "sport/tennis/score", QoS::AtMostOnce)).unwrap());
        assert!(registry.subscribe(sub("c2", "sport/+/score", QoS::AtLeastOnce)).unwrap());
        assert!(registry.subscribe(sub("c3", "sport/#", QoS::ExactlyOnce)).unwrap());

        let found = registry.subscribers("sport/tennis/score");
        assert_eq!(found.iter().map(|s| &*s.client_id).collect::<Vec<_>>(), vec!["c1", "c2", "c3"]);

        let found = registry.subscribers("sport/tennis/live/score");
        assert_eq!(found.iter().map(|s| &*s.client_id).collect::<Vec<_>>(), vec!["c3"]);

        assert!(registry.subscribers("$SYS/sport").is_empty());
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.filters_count(), 3);
    }

    #[test]
    fn test_overlapping_subscriptions() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(sub("c1", "a/+", QoS::AtLeastOnce)).unwrap();
        registry.subscribe(sub("c1", "a/#", QoS::AtLeastOnce)).unwrap();
        registry.subscribe(sub("c1", "a/b", QoS::AtMostOnce)).unwrap();

        let found = registry.subscribers("a/b");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].qos, QoS::AtLeastOnce);
        assert_eq!(found[0].topic_filter, "a/#");

        registry.subscribe(sub("c1", "a/b", QoS::ExactlyOnce)).unwrap();
        let found = registry.subscribers("a/b");
        assert_eq!(found[0].qos, QoS::ExactlyOnce);
        assert_eq!(found[0].topic_filter, "a/b");
    }

    #[test]
    fn test_resubscribe_and_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(sub("c1", "a/b", QoS::AtMostOnce)).unwrap());
        assert!(!registry.subscribe(sub("c1", "a/b", QoS::AtLeastOnce)).unwrap());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("c1", "a/b").map(|s| s.qos), Some(QoS::AtLeastOnce));

        assert!(!registry.unsubscribe("c1", "x/y"));
        assert!(!registry.unsubscribe("c2", "a/b"));
        assert!(registry.unsubscribe("c1", "a/b"));
        assert!(!registry.unsubscribe("c1", "a/b"));
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.filters_count(), 0);
        assert!(registry.subscribers("a/b").is_empty());
    }

    #[test]
    fn test_invalid_filter() {
        let client_id = ClientId::from_static("c1");
        assert!(Subscription::new(client_id.clone(), TopicFilter::from_static("a/#/b"), QoS::AtMostOnce, None)
            .is_err());
        assert!(Subscription::new(client_id, TopicFilter::from_static(""), QoS::AtMostOnce, None).is_err());
    }
}
