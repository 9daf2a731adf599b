//! Per-peer client: readiness gates, ordered dispatch, request correlation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::envelope::{NodeIdentity, Payload};
use crate::error::NetError;
use crate::gate::Gate;
use crate::network::Network;

/// Process-wide source of request correlation nonces; strictly monotonic so
/// concurrent requests from one node can never collide.
static NEXT_REQUEST_NONCE: AtomicU64 = AtomicU64::new(0);

const SUBMISSION_QUEUE_DEPTH: usize = 256;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Single-consumer FIFO executor.
///
/// Everything submitted runs on one worker task in submission order, which
/// is what keeps dispatch for a given peer ordered while distinct peers
/// proceed in parallel.
pub(crate) struct OrderedExecutor {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
}

impl OrderedExecutor {
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(SUBMISSION_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self {
            jobs: Mutex::new(Some(tx)),
        }
    }

    pub(crate) async fn submit(
        &self,
        fut: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), NetError> {
        let tx = self.jobs.lock().clone();
        let Some(tx) = tx else {
            return Err(NetError::Closed);
        };
        tx.send(Box::pin(fut)).await.map_err(|_| NetError::Closed)
    }

    /// Stop accepting work; the worker drains what was already queued and
    /// exits.
    pub(crate) fn close(&self) {
        self.jobs.lock().take();
    }
}

/// Local handle to a remote peer.
///
/// Obtained exclusively through [`Network::client`], which guarantees at
/// most one client per canonical address.
pub struct PeerClient {
    network: Network,
    address: String,
    id: RwLock<Option<NodeIdentity>>,
    incoming: Gate,
    outgoing: Gate,
    requests: Mutex<HashMap<u64, oneshot::Sender<Payload>>>,
    executor: OrderedExecutor,
    close_signal: CancellationToken,
    closed: AtomicBool,
    initialized: AtomicBool,
    bytes_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    bytes_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl PeerClient {
    pub(crate) fn spawn(network: Network, address: String) -> Arc<Self> {
        let (bytes_tx, bytes_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            network,
            address,
            id: RwLock::new(None),
            incoming: Gate::new(),
            outgoing: Gate::new(),
            requests: Mutex::new(HashMap::new()),
            executor: OrderedExecutor::spawn(),
            close_signal: CancellationToken::new(),
            closed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            bytes_tx: Mutex::new(Some(bytes_tx)),
            bytes_rx: Mutex::new(Some(bytes_rx)),
        })
    }

    /// Canonical address of the remote peer.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Identity learned from the peer's first authenticated message, if any.
    pub fn id(&self) -> Option<NodeIdentity> {
        self.id.read().clone()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_id(&self, id: NodeIdentity) {
        *self.id.write() = Some(id);
    }

    pub(crate) fn open_outgoing(&self) {
        self.outgoing.open();
    }

    pub(crate) fn outgoing_ready(&self) -> bool {
        self.outgoing.is_open()
    }

    pub(crate) async fn wait_outgoing(&self) {
        self.outgoing.wait().await;
    }

    pub(crate) fn open_incoming(&self) {
        self.incoming.open();
    }

    pub(crate) fn incoming_ready(&self) -> bool {
        self.incoming.is_open()
    }

    pub(crate) fn close_signal(&self) -> &CancellationToken {
        &self.close_signal
    }

    /// Run plugin connect hooks once the first session is established.
    pub(crate) async fn init(self: &Arc<Self>) {
        self.initialized.store(true, Ordering::SeqCst);
        for plugin in self.network.plugins().iter() {
            plugin.peer_connect(self).await;
        }
    }

    /// Enqueue work on this peer's ordered executor.
    ///
    /// Submissions run FIFO relative to each other; submissions for other
    /// peers are unaffected.
    pub async fn submit(
        &self,
        fut: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), NetError> {
        self.executor.submit(fut).await
    }

    /// Fire-and-forget send to this peer.
    pub async fn tell(&self, payload: Payload) -> Result<(), NetError> {
        self.ensure_open()?;
        if !self.outgoing.is_open() {
            return Err(NetError::NotReady);
        }
        let envelope = self.network.prepare_message(payload)?;
        self.network.write(&self.address, envelope).await
    }

    /// Send a request and wait for the correlated reply.
    ///
    /// The registration is removed on every outcome: reply, timeout, or
    /// client close.
    pub async fn request(&self, payload: Payload, timeout: Duration) -> Result<Payload, NetError> {
        self.ensure_open()?;
        if !self.outgoing.is_open() {
            return Err(NetError::NotReady);
        }
        let nonce = NEXT_REQUEST_NONCE.fetch_add(1, Ordering::Relaxed) + 1;
        let (slot, reply) = oneshot::channel();
        self.requests.lock().insert(nonce, slot);

        let mut envelope = match self.network.prepare_message(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.requests.lock().remove(&nonce);
                return Err(err);
            }
        };
        envelope.request_nonce = nonce;
        if let Err(err) = self.network.write(&self.address, envelope).await {
            self.requests.lock().remove(&nonce);
            return Err(err);
        }

        let outcome = tokio::select! {
            delivered = reply => delivered.map_err(|_| NetError::Closed),
            () = tokio::time::sleep(timeout) => Err(NetError::TimedOut),
            () = self.close_signal.cancelled() => Err(NetError::Closed),
        };
        self.requests.lock().remove(&nonce);
        outcome
    }

    /// Answer a request previously received from this peer.
    pub async fn reply(&self, request_nonce: u64, payload: Payload) -> Result<(), NetError> {
        self.ensure_open()?;
        if !self.outgoing.is_open() {
            return Err(NetError::NotReady);
        }
        let mut envelope = self.network.prepare_message(payload)?;
        envelope.request_nonce = request_nonce;
        envelope.reply_flag = true;
        self.network.write(&self.address, envelope).await
    }

    /// Hand a reply payload to whichever request registered `nonce`.
    ///
    /// Delivery into a removed slot is a no-op; if the close signal fired
    /// first the payload is dropped.
    pub(crate) fn deliver_reply(&self, nonce: u64, payload: Payload) {
        let slot = self.requests.lock().remove(&nonce);
        if let Some(slot) = slot {
            if self.close_signal.is_cancelled() {
                return;
            }
            let _ = slot.send(payload);
        }
    }

    pub(crate) fn handle_bytes(&self, data: Vec<u8>) {
        if let Some(tx) = self.bytes_tx.lock().as_ref() {
            let _ = tx.send(data);
        }
    }

    /// Take the receiver for in-band raw control bytes. Yields `None` after
    /// the first call.
    pub fn take_bytes_stream(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.bytes_rx.lock().take()
    }

    /// Close the client, releasing the peer registry entry and connection.
    ///
    /// Idempotent. Outstanding requests resolve with [`NetError::Closed`];
    /// subsequent operations fail the same way.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_signal.cancel();
        self.executor.close();
        self.network.remove_peer(&self.address).await;
        if self.initialized.load(Ordering::SeqCst) {
            for plugin in self.network.plugins().iter() {
                plugin.peer_disconnect(self).await;
            }
        }
    }

    fn ensure_open(&self) -> Result<(), NetError> {
        if self.is_closed() {
            Err(NetError::Closed)
        } else {
            Ok(())
        }
    }
}
