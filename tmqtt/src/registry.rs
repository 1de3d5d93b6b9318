use std::sync::Arc;

use crate::connection::Connection;
use crate::types::{ClientId, DashMap};

/// Client id to the connection currently owning it. At most one per client id.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<ClientId, Arc<Connection>>,
}

impl ConnectionRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, client_id: &str) -> Option<Arc<Connection>> {
        self.conns.get(client_id).map(|c| c.value().clone())
    }

    /// Registers `conn` under `client_id`, returning the connection it displaced.
    #[inline]
    pub fn register(&self, client_id: ClientId, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.conns.insert(client_id, conn)
    }

    /// Removes the entry of `conn`'s client id, only while it still points at `conn`.
    #[inline]
    pub fn remove_if(&self, conn: &Arc<Connection>) -> bool {
        let client_id = conn.client_id();
        self.conns.remove_if(&client_id, |_, c| Arc::ptr_eq(c, conn)).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
