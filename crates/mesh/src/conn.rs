//! Per-connection write state.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWriteExt, BufWriter, WriteHalf};
use tokio::sync::Mutex;

use crate::envelope::Envelope;
use crate::error::NetError;
use crate::frame;
use crate::transport::BoxedConn;

/// Write side of one established session.
///
/// Application sends only append to the buffered writer under its mutex;
/// the engine's flush loop pushes buffered bytes onto the socket.  The
/// nonce counter makes outbound `message_nonce` values strictly increasing
/// per connection, starting at 1.
pub(crate) struct ConnState {
    writer: Mutex<BufWriter<WriteHalf<BoxedConn>>>,
    message_nonce: AtomicU64,
}

impl ConnState {
    pub(crate) fn new(write_half: WriteHalf<BoxedConn>, buffer_size: usize) -> Self {
        Self {
            writer: Mutex::new(BufWriter::with_capacity(buffer_size, write_half)),
            message_nonce: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_nonce(&self) -> u64 {
        self.message_nonce.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<(), NetError> {
        let mut writer = self.writer.lock().await;
        frame::write_envelope(&mut *writer, envelope).await
    }

    pub(crate) async fn flush(&self) -> io::Result<()> {
        self.writer.lock().await.flush().await
    }

    pub(crate) async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
