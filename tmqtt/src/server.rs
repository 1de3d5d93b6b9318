use std::sync::Arc;
use std::time::Duration;

use tmqtt_net::{Listener, Reader, Transport};
use tmqtt_utils::timestamp_millis;

use crate::connection::Connection;
use crate::context::{BrokerContext, BrokerSettings};
use crate::error::MqttError;
use crate::router;
use crate::security::Security;
use crate::types::{Publish, TimestampMillis};
use crate::Result;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Entry points of the broker engine for the transport side.
#[derive(Clone)]
pub struct Broker {
    ctx: BrokerContext,
}

impl Broker {
    pub fn new(settings: BrokerSettings, security: Arc<dyn Security>) -> Self {
        Self { ctx: BrokerContext::new(settings, security) }
    }

    #[inline]
    pub fn context(&self) -> &BrokerContext {
        &self.ctx
    }

    /// Spawns the worker loops and the keep-alive sweeper.
    pub fn start(&self) {
        self.ctx.set_running(true);
        for worker in self.ctx.workers.iter() {
            tokio::spawn(worker.clone().run(self.ctx.clone()));
        }
        tokio::spawn(sweep(self.ctx.clone()));
        log::info!("broker started, workers: {}", self.ctx.workers.len());
    }

    /// Takes a new transport connection and pins it to the least loaded worker.
    pub fn accept(&self, transport: Arc<dyn Transport>) -> Result<Arc<Connection>> {
        let max_connections = self.ctx.settings.max_connections;
        if self.ctx.connections.len() >= max_connections {
            log::warn!(
                "{:?} refused, maximum number of connections reached: {}",
                transport.remote_addr(),
                max_connections
            );
            self.ctx.stats.refused.inc();
            return Err(MqttError::ServiceUnavailable);
        }
        let worker = self.ctx.least_loaded_worker().ok_or(MqttError::ServiceUnavailable)?;
        worker.connections.inc();
        let conn =
            Connection::new(self.ctx.next_connection_id(), worker, transport, self.ctx.settings.max_packet_size);
        self.ctx.connections.insert(conn.id, conn.clone());
        self.ctx.stats.connections.inc();
        log::debug!("{:?} accepted", conn);
        Ok(conn)
    }

    /// Bytes read from the transport of `conn`.
    #[inline]
    pub fn received(&self, conn: &Arc<Connection>, data: &[u8]) {
        if conn.is_closing() || !conn.is_running() {
            return;
        }
        conn.feed(data);
        conn.worker.signal_frames(conn.clone());
    }

    /// The transport of `conn` went away.
    #[inline]
    pub fn closed(&self, conn: &Arc<Connection>) {
        conn.request_close();
    }

    /// Publishes a message originating from the broker itself.
    #[inline]
    pub fn publish(&self, publish: Publish) -> Result<usize> {
        router::publish(&self.ctx, publish)
    }

    pub fn shutdown(&self) {
        self.ctx.set_running(false);
        for conn in self.ctx.connections.iter() {
            conn.close_transport();
        }
        for worker in self.ctx.workers.iter() {
            worker.wake();
        }
        log::info!("broker shutdown");
    }

    /// Accepts connections from `listener` until the broker is shut down.
    pub async fn serve(&self, listener: Listener) -> Result<()> {
        while self.ctx.is_running() {
            let acceptor = match listener.accept().await {
                Ok(acceptor) => acceptor,
                Err(e) => {
                    log::warn!("accept failed, {:?}", e);
                    continue;
                }
            };
            let remote_addr = acceptor.remote_addr;
            let (transport, reader) = acceptor.tcp();
            let transport: Arc<dyn Transport> = Arc::new(transport);
            match self.accept(transport.clone()) {
                Ok(conn) => {
                    tokio::spawn(self.clone().read_loop(conn, reader));
                }
                Err(e) => {
                    log::info!("{} connection refused, {}", remote_addr, e);
                    transport.close();
                }
            }
        }
        Ok(())
    }

    async fn read_loop(self, conn: Arc<Connection>, mut reader: Reader) {
        loop {
            match reader.read().await {
                Ok(Some(data)) => self.received(&conn, &data),
                Ok(None) => break,
                Err(e) => {
                    log::debug!("{:?} read error, {:?}", conn, e);
                    break;
                }
            }
        }
        self.closed(&conn);
    }
}

async fn sweep(ctx: BrokerContext) {
    let mut interval = tokio::time::interval(ctx.settings.sweep_interval.max(MIN_SWEEP_INTERVAL));
    while ctx.is_running() {
        interval.tick().await;
        let now = timestamp_millis();
        let expired = ctx
            .connections
            .iter()
            .filter(|c| is_expired(&ctx.settings, c.value(), now))
            .map(|c| c.value().clone())
            .collect::<Vec<_>>();
        for conn in expired {
            log::info!("{:?} timed out, keep_alive: {}", conn, conn.keep_alive());
            conn.request_close();
        }
    }
}

/// A connection that never completed CONNECT, or that stayed silent past its keep-alive.
fn is_expired(settings: &BrokerSettings, conn: &Connection, now: TimestampMillis) -> bool {
    if conn.is_closing() {
        return false;
    }
    if !conn.is_connected() {
        return now - conn.created_at >= settings.connect_timeout.as_millis() as i64;
    }
    let keep_alive = conn.keep_alive();
    if keep_alive == 0 {
        return false;
    }
    let limit = f64::from(keep_alive) * 1000.0 * f64::from(settings.keepalive_backoff);
    (now - conn.last_communication()) as f64 >= limit
}
