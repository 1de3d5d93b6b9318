use async_trait::async_trait;

use crate::connection::Connection;

/// Authentication and authorization hooks, consulted on CONNECT, PUBLISH and SUBSCRIBE.
///
/// Every method allows by default.
#[async_trait]
pub trait Security: Send + Sync + 'static {
    #[inline]
    async fn authenticate(&self, _username: Option<&str>, _password: Option<&[u8]>) -> bool {
        true
    }

    #[inline]
    async fn authorize_publish(&self, _conn: &Connection, _topic: &str) -> bool {
        true
    }

    #[inline]
    async fn authorize_subscribe(&self, _conn: &Connection, _topic_filter: &str) -> bool {
        true
    }
}

pub struct DefaultSecurity;

impl Security for DefaultSecurity {}
