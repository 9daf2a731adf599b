use std::io;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use super::{BoxedConn, Listener, Transport};

/// Reliable stream transport over TCP.
///
/// Nagle is disabled on both ends; the engine already batches small writes
/// through its buffered writers.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, port: u16) -> io::Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Box::new(TcpAcceptor { inner: listener }))
    }

    async fn dial(&self, addr: &str) -> io::Result<BoxedConn> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

struct TcpAcceptor {
    inner: TcpListener,
}

#[async_trait]
impl Listener for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<BoxedConn> {
        let (stream, _) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
