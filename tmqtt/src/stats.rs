use serde::{Deserialize, Serialize};
use serde_json::json;

use tmqtt_utils::Counter;

use crate::context::BrokerContext;

/// Broker-wide counters, updated as connections and messages flow through.
#[derive(Debug, Default)]
pub struct Stats {
    pub connections: Counter,
    pub refused: Counter,
    pub publishes: Counter,
    pub delivers: Counter,
    pub ackeds: Counter,
    pub publish_failures: Counter,
    /// Messages dropped from full offline queues
    pub dropped: Counter,
    pub subscribes: Counter,
    pub unsubscribes: Counter,
}

impl Stats {
    #[inline]
    pub fn data(&self, ctx: &BrokerContext) -> State {
        State {
            connections_count: self.connections.count(),
            connections_max: self.connections.max(),
            refused: self.refused.count(),
            sessions_count: ctx.sessions.len(),
            subscriptions_count: ctx.subscriptions.count(),
            subscribed_topics_count: ctx.subscriptions.filters_count(),
            retained_count: ctx.retains.count(),
            retained_max: ctx.retains.max(),
            publishes: self.publishes.count(),
            delivers: self.delivers.count(),
            ackeds: self.ackeds.count(),
            publish_failures: self.publish_failures.count(),
            dropped: self.dropped.count(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct State {
    pub connections_count: isize,
    pub connections_max: isize,
    pub refused: isize,
    pub sessions_count: usize,
    pub subscriptions_count: isize,
    pub subscribed_topics_count: usize,
    pub retained_count: isize,
    pub retained_max: isize,
    pub publishes: isize,
    pub delivers: isize,
    pub ackeds: isize,
    pub publish_failures: isize,
    pub dropped: isize,
}

impl State {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "connections.count": self.connections_count,
            "connections.max": self.connections_max,
            "connections.refused": self.refused,
            "sessions.count": self.sessions_count,
            "subscriptions.count": self.subscriptions_count,
            "subscribed_topics.count": self.subscribed_topics_count,
            "retained.count": self.retained_count,
            "retained.max": self.retained_max,
            "messages.publishes": self.publishes,
            "messages.delivers": self.delivers,
            "messages.ackeds": self.ackeds,
            "messages.publish_failures": self.publish_failures,
            "messages.dropped": self.dropped,
        })
    }
}
