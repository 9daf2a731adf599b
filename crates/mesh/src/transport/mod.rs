//! Pluggable stream transports.
//!
//! The engine only needs a way to bind a listener on a port and to dial a
//! `host:port` target; everything above the byte stream (framing, signing,
//! dispatch) is transport-agnostic.  Implementations are registered on the
//! builder under a URL scheme.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

mod kcp;
mod tcp;

pub use kcp::KcpTransport;
pub use tcp::TcpTransport;

/// Byte stream capable of carrying framed envelopes.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// Boxed connection handed back by listeners and dialers.
pub type BoxedConn = Box<dyn Conn>;

/// Accept side of a bound transport.
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> io::Result<BoxedConn>;
}

/// A stream transport addressable by a URL scheme.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind a listener on the given local port.
    async fn listen(&self, port: u16) -> io::Result<Box<dyn Listener>>;

    /// Open a connection to a `host:port` target.
    async fn dial(&self, addr: &str) -> io::Result<BoxedConn>;
}
