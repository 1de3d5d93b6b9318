use std::sync::Arc;

use crossbeam::queue::SegQueue;
use tokio::sync::Notify;

use tmqtt_utils::Counter;

use crate::connection::Connection;
use crate::context::BrokerContext;
use crate::{dispatcher, inflight, Result};

const YIELD_EVERY: usize = 64;

/// A worker loop with its ready-queues.
///
/// A connection pinned to this worker is pushed onto one of the queues whenever it has
/// received bytes to decode, inflight entries to advance or internal events to handle.
pub struct Worker {
    pub index: usize,
    frames: SegQueue<Arc<Connection>>,
    inflights: SegQueue<Arc<Connection>>,
    events: SegQueue<Arc<Connection>>,
    notify: Notify,
    pub connections: Counter,
}

impl Worker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            frames: SegQueue::new(),
            inflights: SegQueue::new(),
            events: SegQueue::new(),
            notify: Notify::new(),
            connections: Counter::new(),
        }
    }

    #[inline]
    pub fn signal_frames(&self, conn: Arc<Connection>) {
        self.frames.push(conn);
        self.notify.notify_one();
    }

    #[inline]
    pub fn signal_inflights(&self, conn: Arc<Connection>) {
        self.inflights.push(conn);
        self.notify.notify_one();
    }

    #[inline]
    pub fn signal_events(&self, conn: Arc<Connection>) {
        self.events.push(conn);
        self.notify.notify_one();
    }

    #[inline]
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn queued_inflights(&self) -> usize {
        self.inflights.len()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty() && self.inflights.is_empty() && self.events.is_empty()
    }

    /// Takes at most one connection from each queue and processes it.
    ///
    /// Returns false when every queue was empty.
    pub async fn poll_once(&self, ctx: &BrokerContext) -> bool {
        let mut busy = false;
        if let Some(conn) = self.frames.pop() {
            busy = true;
            self.check(&conn, dispatcher::process_frames(&conn));
        }
        if let Some(conn) = self.inflights.pop() {
            busy = true;
            self.check(&conn, inflight::process(&ctx.settings, &conn));
        }
        if let Some(conn) = self.events.pop() {
            busy = true;
            self.check(&conn, dispatcher::process_event(ctx, &conn).await);
        }
        busy
    }

    #[inline]
    fn check(&self, conn: &Arc<Connection>, res: Result<()>) {
        if let Err(e) = res {
            log::warn!("{:?} worker {} processing failed, {}", conn, self.index, e);
            if e.is_protocol_error() {
                conn.request_close();
            }
        }
    }

    pub(crate) async fn run(self: Arc<Self>, ctx: BrokerContext) {
        log::debug!("worker {} started", self.index);
        let mut polls = 0usize;
        while ctx.is_running() {
            if self.poll_once(&ctx).await {
                polls += 1;
                if polls % YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            } else {
                self.notify.notified().await;
            }
        }
        log::debug!("worker {} exited", self.index);
    }
}
