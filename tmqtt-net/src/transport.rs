use std::net::SocketAddr;

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Write side of a client connection as seen by the broker core.
pub trait Transport: Send + Sync + 'static {
    /// Queues encoded bytes for sending, never blocks.
    fn send(&self, data: Bytes) -> Result<()>;

    /// Flushes what was queued so far, then shuts the connection down.
    fn close(&self);

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub struct TcpTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
    remote_addr: SocketAddr,
}

impl TcpTransport {
    pub(crate) fn new(socket: TcpStream, remote_addr: SocketAddr, read_buffer_size: usize) -> (Self, Reader) {
        let (rd, wr) = socket.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        tokio::spawn(write_loop(wr, rx, closed.clone(), remote_addr));
        let reader = Reader { rd, buf: BytesMut::new(), closed: closed.clone(), read_buffer_size };
        (TcpTransport { tx, closed, remote_addr }, reader)
    }
}

impl Transport for TcpTransport {
    #[inline]
    fn send(&self, data: Bytes) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(anyhow!("connection {} is closed", self.remote_addr));
        }
        self.tx.send(data).map_err(|_| anyhow!("connection {} is closed", self.remote_addr))
    }

    #[inline]
    fn close(&self) {
        self.closed.cancel();
    }

    #[inline]
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }
}

async fn write_loop(
    mut wr: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    closed: CancellationToken,
    remote_addr: SocketAddr,
) {
    loop {
        tokio::select! {
            biased;
            data = rx.recv() => match data {
                Some(data) => {
                    if let Err(e) = wr.write_all(&data).await {
                        log::debug!("{} write error, {:?}", remote_addr, e);
                        break;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => {
                while let Ok(data) = rx.try_recv() {
                    if wr.write_all(&data).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    if let Err(e) = wr.shutdown().await {
        log::debug!("{} shutdown error, {:?}", remote_addr, e);
    }
    closed.cancel();
}

/// Read side of a client connection, owned by the task that feeds the broker.
pub struct Reader {
    rd: OwnedReadHalf,
    buf: BytesMut,
    closed: CancellationToken,
    read_buffer_size: usize,
}

impl Reader {
    /// Next chunk of received bytes, `None` once the peer or the broker closed the connection.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        self.buf.reserve(self.read_buffer_size);
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            n = self.rd.read_buf(&mut self.buf) => {
                if n? == 0 {
                    Ok(None)
                } else {
                    Ok(Some(self.buf.split().freeze()))
                }
            }
        }
    }
}
