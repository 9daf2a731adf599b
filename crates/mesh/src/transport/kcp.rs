use std::io;

use async_trait::async_trait;
use tokio_kcp::{KcpConfig, KcpListener, KcpStream};

use super::{BoxedConn, Listener, Transport};

/// Reliable-UDP transport backed by KCP.
///
/// Send and receive window sizes are taken from the engine configuration.
#[derive(Clone, Copy, Debug)]
pub struct KcpTransport {
    pub send_window_size: u16,
    pub recv_window_size: u16,
}

impl KcpTransport {
    pub fn new(send_window_size: u16, recv_window_size: u16) -> Self {
        Self {
            send_window_size,
            recv_window_size,
        }
    }

    fn config(&self) -> KcpConfig {
        let mut config = KcpConfig::default();
        config.wnd_size = (self.send_window_size, self.recv_window_size);
        config
    }
}

impl Default for KcpTransport {
    fn default() -> Self {
        Self::new(4096, 4096)
    }
}

#[async_trait]
impl Transport for KcpTransport {
    async fn listen(&self, port: u16) -> io::Result<Box<dyn Listener>> {
        let listener = KcpListener::bind(self.config(), ("0.0.0.0", port))
            .await
            .map_err(io::Error::other)?;
        Ok(Box::new(KcpAcceptor { inner: listener }))
    }

    async fn dial(&self, addr: &str) -> io::Result<BoxedConn> {
        let target = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "unresolvable host"))?;
        let stream = KcpStream::connect(&self.config(), target)
            .await
            .map_err(io::Error::other)?;
        Ok(Box::new(stream))
    }
}

struct KcpAcceptor {
    inner: KcpListener,
}

#[async_trait]
impl Listener for KcpAcceptor {
    async fn accept(&mut self) -> io::Result<BoxedConn> {
        let (stream, _) = self.inner.accept().await.map_err(io::Error::other)?;
        Ok(Box::new(stream))
    }
}
