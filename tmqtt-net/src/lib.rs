#![deny(unsafe_code)]

//! Transport plumbing for the broker core.
//!
//! The core never touches sockets. It receives raw bytes from a reader task and writes
//! through the [`Transport`] handle it was given at accept time.

mod server;
mod transport;

pub use server::{Acceptor, Builder, Listener};
pub use transport::{Reader, TcpTransport, Transport};

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;
