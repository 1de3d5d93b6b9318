use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tmqtt_conf::{Listener, Mqtt, Settings};

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;
use crate::retain::RetainStore;
use crate::security::{DefaultSecurity, Security};
use crate::session::SessionStore;
use crate::stats::Stats;
use crate::subscription::SubscriptionRegistry;
use crate::types::{ConnectionId, DashMap};
use crate::worker::Worker;

/// Immutable engine settings, taken from the loaded configuration at construction.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub workers: usize,
    pub max_connections: usize,
    pub max_packet_size: u32,
    pub retry_delay: Duration,
    pub retry_attempts: u32,
    pub connect_timeout: Duration,
    pub keepalive_backoff: f32,
    pub sweep_interval: Duration,
    pub max_clientid_len_v31: usize,
    pub max_mqueue_len: usize,
}

impl BrokerSettings {
    pub fn new(listener: &Listener, mqtt: &Mqtt) -> Self {
        Self {
            workers: mqtt.workers.max(1),
            max_connections: mqtt.max_connections,
            max_packet_size: listener.max_packet_size,
            retry_delay: mqtt.retry_delay,
            retry_attempts: mqtt.retry_attempts,
            connect_timeout: mqtt.connect_timeout,
            keepalive_backoff: mqtt.keepalive_backoff,
            sweep_interval: mqtt.sweep_interval,
            max_clientid_len_v31: mqtt.max_clientid_len_v31,
            max_mqueue_len: mqtt.max_mqueue_len,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::new(&Listener::default(), &Mqtt::default())
    }
}

impl From<&Settings> for BrokerSettings {
    fn from(settings: &Settings) -> Self {
        Self::new(&settings.listener, &settings.mqtt)
    }
}

/// Every process-wide table of the broker, shared by the workers and the facade.
#[derive(Clone)]
pub struct BrokerContext(Arc<ContextInner>);

pub struct ContextInner {
    pub settings: BrokerSettings,
    pub security: Arc<dyn Security>,
    pub registry: ConnectionRegistry,
    pub subscriptions: SubscriptionRegistry,
    pub sessions: SessionStore,
    pub retains: RetainStore,
    pub workers: Vec<Arc<Worker>>,
    pub stats: Stats,
    ///accepted connections, connected or not
    pub connections: DashMap<ConnectionId, Arc<Connection>>,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl Deref for BrokerContext {
    type Target = ContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl BrokerContext {
    pub fn new(settings: BrokerSettings, security: Arc<dyn Security>) -> Self {
        let workers = (0..settings.workers.max(1)).map(|i| Arc::new(Worker::new(i))).collect();
        Self(Arc::new(ContextInner {
            settings,
            security,
            registry: ConnectionRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            sessions: SessionStore::new(),
            retains: RetainStore::new(),
            workers,
            stats: Stats::default(),
            connections: DashMap::default(),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The worker with the fewest connections pinned to it.
    #[inline]
    pub(crate) fn least_loaded_worker(&self) -> Option<Arc<Worker>> {
        self.workers.iter().min_by_key(|w| w.connections.count()).cloned()
    }
}

impl Default for BrokerContext {
    fn default() -> Self {
        Self::new(BrokerSettings::default(), Arc::new(DefaultSecurity))
    }
}
