use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::transport::{Reader, TcpTransport};
use crate::Result;

/// Listener options, consumed by [`Builder::bind`].
#[derive(Clone, Debug)]
pub struct Builder {
    /// Shown in logs, e.g. `external/tcp/0.0.0.0:1883`
    pub name: String,
    pub laddr: SocketAddr,
    /// Pending connection queue length
    pub backlog: i32,
    pub nodelay: bool,
    /// `None` leaves the OS default
    pub reuseaddr: Option<bool>,
    pub reuseport: Option<bool>,
    /// Bytes read from a socket at a time
    pub read_buffer_size: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            name: String::new(),
            laddr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 1883)),
            backlog: 512,
            nodelay: false,
            reuseaddr: None,
            reuseport: None,
            read_buffer_size: 4096,
        }
    }
}

impl Builder {
    pub fn new() -> Builder {
        Self::default()
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        Builder { name: name.into(), ..self }
    }

    pub fn laddr(self, laddr: SocketAddr) -> Self {
        Builder { laddr, ..self }
    }

    pub fn backlog(self, backlog: i32) -> Self {
        Builder { backlog, ..self }
    }

    pub fn nodelay(self, nodelay: bool) -> Self {
        Builder { nodelay, ..self }
    }

    pub fn reuseaddr(self, reuseaddr: Option<bool>) -> Self {
        Builder { reuseaddr, ..self }
    }

    pub fn reuseport(self, reuseport: Option<bool>) -> Self {
        Builder { reuseport, ..self }
    }

    pub fn read_buffer_size(self, read_buffer_size: usize) -> Self {
        Builder { read_buffer_size, ..self }
    }

    fn socket(&self) -> Result<Socket> {
        let socket = Socket::new(Domain::for_address(self.laddr), Type::STREAM, None)?;
        socket.set_linger(Some(Duration::from_secs(10)))?;
        socket.set_nonblocking(true)?;
        if let Some(on) = self.reuseaddr {
            socket.set_reuse_address(on)?;
        }
        #[cfg(not(windows))]
        if let Some(on) = self.reuseport {
            socket.set_reuse_port(on)?;
        }
        socket.bind(&self.laddr.into())?;
        socket.listen(self.backlog)?;
        Ok(socket)
    }

    /// Binds and starts listening. Must be called inside a tokio runtime.
    pub fn bind(self) -> Result<Listener> {
        let socket = self.socket().map_err(|e| anyhow!("{} bind {} failed, {}", self.name, self.laddr, e))?;
        let tcp_listener = TcpListener::from_std(socket.into())?;
        log::info!("{} listening on {}", self.name, tcp_listener.local_addr()?);
        Ok(Listener { cfg: Arc::new(self), tcp_listener })
    }
}

pub struct Listener {
    pub cfg: Arc<Builder>,
    tcp_listener: TcpListener,
}

impl Listener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp_listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<Acceptor> {
        let (socket, remote_addr) = self.tcp_listener.accept().await?;
        socket.set_nodelay(self.cfg.nodelay)?;
        Ok(Acceptor { socket, remote_addr, read_buffer_size: self.cfg.read_buffer_size })
    }
}

/// An accepted socket not yet handed to the broker.
pub struct Acceptor {
    socket: TcpStream,
    pub remote_addr: SocketAddr,
    read_buffer_size: usize,
}

impl Acceptor {
    /// Splits the socket into a write handle for the broker and a read side for the caller.
    #[inline]
    pub fn tcp(self) -> (TcpTransport, Reader) {
        TcpTransport::new(self.socket, self.remote_addr, self.read_buffer_size)
    }
}
