//! Fan-out of published messages to live subscribers and offline sessions.

use std::sync::Arc;

use crate::connection::Connection;
use crate::context::BrokerContext;
use crate::session::SessionRef;
use crate::subscription::Subscription;
use crate::types::{ClientId, HashSet, Publish};
use crate::Result;

/// Routes `publish` to every matching subscriber. Returns the number of live receivers.
///
/// Live subscribers get a copy at the lower of both QoS levels. Offline sessions holding a
/// matching subscription get it appended to their outbox, unless that client was just served
/// live through a newer connection.
pub fn publish(ctx: &BrokerContext, publish: Publish) -> Result<usize> {
    if publish.retain {
        ctx.retains.set(&publish)?;
    }

    let mut delivered: HashSet<ClientId> = HashSet::default();
    for sub in ctx.subscriptions.subscribers(&publish.topic) {
        if let Some(conn) = sub.connection().filter(|c| c.is_running()) {
            conn.deliver(publish.forward(sub.qos.less_value(publish.qos), false));
            delivered.insert(sub.client_id);
        }
    }

    let max_mqueue_len = ctx.settings.max_mqueue_len;
    let mut stored = 0;
    for session in ctx.sessions.offline_matching(&publish.topic) {
        let mut session = session.lock();
        if delivered.contains(&session.client_id) {
            continue;
        }
        if max_mqueue_len > 0 && session.outbox.len() >= max_mqueue_len {
            if let Some(dropped) = session.outbox.pop_front() {
                log::warn!("{} offline queue full, dropped {:?}", session.client_id, dropped);
                ctx.stats.dropped.inc();
            }
        }
        session.outbox.push_back(publish.forward(publish.qos, false));
        stored += 1;
    }

    log::debug!("routed {:?}, live: {}, stored: {}", publish, delivered.len(), stored);
    ctx.stats.delivers.incs(delivered.len() as isize);
    Ok(delivered.len())
}

/// Registers `sub` and mirrors it on the connection.
pub fn subscribe(ctx: &BrokerContext, conn: &Connection, sub: Subscription) -> Result<()> {
    let topic_filter = sub.topic_filter.clone();
    ctx.subscriptions.subscribe(sub.clone())?;
    conn.state.write().subscriptions.insert(topic_filter, sub);
    Ok(())
}

pub fn unsubscribe(ctx: &BrokerContext, conn: &Connection, client_id: &str, topic_filter: &str) -> bool {
    conn.state.write().subscriptions.remove(topic_filter);
    ctx.subscriptions.unsubscribe(client_id, topic_filter)
}

/// Replays the retained messages matching a new subscription, with RETAIN set.
pub fn deliver_retained(ctx: &BrokerContext, conn: &Arc<Connection>, sub: &Subscription) -> Result<usize> {
    let retaineds = ctx.retains.matches(&sub.topic_filter)?;
    let count = retaineds.len();
    for retained in retaineds {
        conn.deliver(retained.forward(sub.qos.less_value(retained.qos), true));
    }
    Ok(count)
}

/// Drains the offline outbox of `session` to its new connection.
pub fn publish_session(conn: &Arc<Connection>, session: &SessionRef) -> usize {
    let pending = {
        let mut session = session.lock();
        let outbox = std::mem::take(&mut session.outbox);
        outbox
            .into_iter()
            .filter_map(|p| {
                let qos = session.first_match(&p.topic)?.qos.less_value(p.qos);
                Some(Publish { qos, ..p })
            })
            .collect::<Vec<_>>()
    };
    let count = pending.len();
    for publish in pending {
        conn.deliver(publish);
    }
    count
}
