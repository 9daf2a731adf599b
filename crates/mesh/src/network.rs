//! The network engine: listeners, peer registry, write pipeline, dispatch.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crypto::{HashPolicy, Keypair, SignaturePolicy};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::io::BufReader;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::{Address, canonicalize, filter_self};
use crate::client::PeerClient;
use crate::config::NetOptions;
use crate::conn::ConnState;
use crate::envelope::{Envelope, NodeIdentity, Payload, Ping, RawBytes};
use crate::error::NetError;
use crate::frame::{self, Inbound};
use crate::gate::Gate;
use crate::plugin::{ContextPool, Plugin, PluginList};
use crate::transport::{BoxedConn, Transport};

/// Networking state for one node.
///
/// Cheap to clone; all clones share the same engine. The engine stays alive
/// until [`Network::close`] fires the kill signal, which stops the flush
/// loop and the accept loops and closes every peer client.
#[derive(Clone)]
pub struct Network {
    shared: Arc<Shared>,
}

struct Shared {
    options: NetOptions,
    keys: Keypair,
    id: NodeIdentity,
    address: Address,
    canonical: String,
    signature_policy: Arc<dyn SignaturePolicy>,
    hash_policy: Arc<dyn HashPolicy>,
    plugins: PluginList,
    peers: RwLock<HashMap<String, Arc<PeerClient>>>,
    connections: RwLock<HashMap<String, Arc<ConnState>>>,
    transports: HashMap<String, Arc<dyn Transport>>,
    listening: Gate,
    kill: CancellationToken,
    contexts: ContextPool,
}

impl Network {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        options: NetOptions,
        keys: Keypair,
        address: Address,
        signature_policy: Arc<dyn SignaturePolicy>,
        hash_policy: Arc<dyn HashPolicy>,
        plugins: PluginList,
        transports: HashMap<String, Arc<dyn Transport>>,
    ) -> Self {
        let canonical = address.to_string();
        let id = NodeIdentity {
            public_key: keys.public_key().to_vec(),
            address: canonical.clone(),
        };
        Self {
            shared: Arc::new(Shared {
                options,
                keys,
                id,
                address,
                canonical,
                signature_policy,
                hash_policy,
                plugins,
                peers: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
                transports,
                listening: Gate::new(),
                kill: CancellationToken::new(),
                contexts: ContextPool::new(),
            }),
        }
    }

    /// Start background workers. Called once by the builder.
    pub(crate) fn start(&self) {
        let net = self.clone();
        tokio::spawn(async move { net.flush_loop().await });
    }

    /// Canonical address this node advertises.
    pub fn address(&self) -> &str {
        &self.shared.canonical
    }

    /// This node's identity (public key + address).
    pub fn id(&self) -> &NodeIdentity {
        &self.shared.id
    }

    pub fn keys(&self) -> &Keypair {
        &self.shared.keys
    }

    pub fn options(&self) -> &NetOptions {
        &self.shared.options
    }

    /// Look up a registered plugin by its stable identifier.
    pub fn plugin(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.shared.plugins.get(id)
    }

    pub(crate) fn plugins(&self) -> &PluginList {
        &self.shared.plugins
    }

    pub(crate) fn contexts(&self) -> &ContextPool {
        &self.shared.contexts
    }

    /// Block until this node is accepting peers.
    pub async fn block_until_listening(&self) {
        self.shared.listening.wait().await;
    }

    /// Canonical addresses of every registered peer.
    pub fn peer_addresses(&self) -> Vec<String> {
        self.shared.peers.read().keys().cloned().collect()
    }

    /// The registered client for `address`, if one exists.
    pub fn peer(&self, address: &str) -> Option<Arc<PeerClient>> {
        let canonical = canonicalize(address).ok()?;
        self.shared.peers.read().get(&canonical).cloned()
    }

    async fn flush_loop(self) {
        let mut ticker = tokio::time::interval(self.shared.options.write_flush_latency);
        loop {
            tokio::select! {
                () = self.shared.kill.cancelled() => break,
                _ = ticker.tick() => {
                    let states: Vec<Arc<ConnState>> =
                        self.shared.connections.read().values().cloned().collect();
                    for state in states {
                        if let Err(err) = state.flush().await {
                            warn!(error = %err, "connection flush failed");
                        }
                    }
                }
            }
        }
    }

    /// Listen for peers until the engine closes.
    ///
    /// Runs plugin `startup` hooks, accepts connections, and runs `cleanup`
    /// hooks once the accept loop terminates. Callers normally spawn this.
    pub async fn listen(&self) -> Result<(), NetError> {
        for plugin in self.shared.plugins.iter() {
            plugin.startup(self).await;
        }

        let transport = self.transport(&self.shared.address.scheme)?;
        let mut listener = transport
            .listen(self.shared.address.port)
            .await
            .map_err(NetError::ListenFailed)?;

        self.shared.listening.open();
        info!(address = %self.shared.canonical, "listening for peers");

        loop {
            tokio::select! {
                () = self.shared.kill.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        let net = self.clone();
                        tokio::spawn(async move { net.accept(conn).await });
                    }
                    Err(err) => {
                        warn!(error = %err, "listener accept failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        drop(listener);
        info!(address = %self.shared.canonical, "listener shut down");

        for plugin in self.shared.plugins.iter() {
            plugin.cleanup(self).await;
        }
        Ok(())
    }

    /// Read loop for one inbound connection.
    ///
    /// The first verified envelope establishes the peer client and learns
    /// its identity; later envelopes signed by a different identity are
    /// dropped without touching the connection.
    pub(crate) async fn accept(&self, conn: BoxedConn) {
        let (read_half, _write_half) = tokio::io::split(conn);
        let mut reader = BufReader::new(read_half);
        let mut client: Option<Arc<PeerClient>> = None;

        loop {
            let frame = tokio::select! {
                () = self.shared.kill.cancelled() => break,
                frame = timeout(
                    self.shared.options.connection_timeout,
                    frame::read_envelope(
                        &mut reader,
                        self.shared.options.max_frame_bytes,
                        &*self.shared.hash_policy,
                        &*self.shared.signature_policy,
                    ),
                ) => frame,
            };

            let envelope = match frame {
                Err(_) => {
                    debug!("connection idle timeout");
                    break;
                }
                Ok(Ok(Inbound::Empty)) => continue,
                Ok(Ok(Inbound::Message(envelope))) => envelope,
                Ok(Err(NetError::InvalidSignature)) => continue,
                Ok(Err(err)) => {
                    debug!(error = %err, "read loop ending");
                    break;
                }
            };

            // Establish the session from the first verified envelope;
            // runs at most once per accepted connection.
            if client.is_none() {
                match self.client(&envelope.sender.address).await {
                    Ok(established) => {
                        established.set_id(envelope.sender.clone());
                        established.open_incoming();
                        client = Some(established);
                    }
                    Err(err) => {
                        warn!(
                            address = %envelope.sender.address,
                            error = %err,
                            "failed to establish peer session"
                        );
                        break;
                    }
                }
            }
            let Some(peer) = client.as_ref() else { break };

            if peer.id().map_or(true, |id| id != envelope.sender) {
                warn!(
                    address = %envelope.sender.address,
                    "dropping envelope signed by a different identity"
                );
                continue;
            }

            let net = self.clone();
            let target = peer.clone();
            let submitted = peer
                .submit(async move { net.dispatch_message(&target, envelope).await })
                .await;
            if submitted.is_err() {
                break;
            }
        }

        if let Some(client) = client {
            client.close().await;
        }
    }

    /// Route one received envelope: reply correlation first, then in-band
    /// control payloads, then plugin fan-out with a pooled context.
    pub(crate) async fn dispatch_message(&self, client: &Arc<PeerClient>, envelope: Envelope) {
        if !client.incoming_ready() {
            return;
        }
        let request_nonce = envelope.request_nonce;
        if request_nonce > 0 && envelope.reply_flag {
            client.deliver_reply(request_nonce, envelope.payload);
            return;
        }

        if envelope.payload.is::<RawBytes>() {
            match envelope.payload.decode::<RawBytes>() {
                Ok(bytes) => client.handle_bytes(bytes.0),
                Err(err) => debug!(error = %err, "malformed control payload"),
            }
            return;
        }

        let ctx = self
            .shared
            .contexts
            .acquire(client.clone(), envelope.payload, request_nonce);
        for plugin in self.shared.plugins.iter() {
            if let Err(err) = plugin.receive(&ctx).await {
                warn!(plugin = plugin.id(), error = %err, "plugin receive failed");
            }
        }
        self.shared.contexts.release(ctx);
    }

    /// The peer client for `address`, installing and dialing a new one if
    /// none exists. The only legal way to obtain a [`PeerClient`].
    pub async fn client(&self, address: &str) -> Result<Arc<PeerClient>, NetError> {
        let canonical = canonicalize(address)?;
        if canonical == self.shared.canonical {
            return Err(NetError::SelfDial);
        }

        let (client, installed) = {
            let mut peers = self.shared.peers.write();
            match peers.entry(canonical.clone()) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    let client = PeerClient::spawn(self.clone(), canonical.clone());
                    entry.insert(client.clone());
                    (client, true)
                }
            }
        };

        if !installed {
            // Another caller is (or was) responsible for the dial; wait for
            // its outcome rather than racing a second connection.
            tokio::select! {
                () = client.wait_outgoing() => {}
                () = client.close_signal().cancelled() => {}
            }
            if client.is_closed() || !client.outgoing_ready() {
                return Err(NetError::NotReady);
            }
            return Ok(client);
        }

        match self.dial(&canonical).await {
            Ok(conn) => {
                let (_read_half, write_half) = tokio::io::split(conn);
                let state = Arc::new(ConnState::new(
                    write_half,
                    self.shared.options.write_buffer_size,
                ));
                self.shared
                    .connections
                    .write()
                    .insert(canonical.clone(), state);
                client.init().await;
                client.open_outgoing();
                Ok(client)
            }
            Err(err) => {
                self.shared.peers.write().remove(&canonical);
                client.close().await;
                Err(err)
            }
        }
    }

    /// Open a raw connection to an address, applying the loopback rewrite.
    pub(crate) async fn dial(&self, address: &str) -> Result<BoxedConn, NetError> {
        let mut target = Address::parse(address)?;
        // A peer advertising our own host is reachable locally.
        if target.host != "127.0.0.1" && target.host == self.shared.address.host {
            target.host = "127.0.0.1".to_string();
        }
        let transport = self.transport(&target.scheme)?;
        transport
            .dial(&target.host_port())
            .await
            .map_err(NetError::DialFailed)
    }

    /// Sign a payload into an envelope ready for sending.
    pub fn prepare_message(&self, payload: Payload) -> Result<Envelope, NetError> {
        Envelope::signed(
            payload,
            self.shared.id.clone(),
            self.shared.keys.secret_key(),
            &*self.shared.hash_policy,
            &*self.shared.signature_policy,
        )
    }

    /// Send a prepared envelope to a connected address.
    ///
    /// Assigns the connection's next `message_nonce` and enforces the write
    /// deadline. A failure here does not close the peer.
    pub async fn write(&self, address: &str, mut envelope: Envelope) -> Result<(), NetError> {
        let state = self
            .shared
            .connections
            .read()
            .get(address)
            .cloned()
            .ok_or(NetError::NoConnection)?;
        envelope.message_nonce = state.next_nonce();
        match timeout(self.shared.options.write_timeout, state.send(&envelope)).await {
            Ok(result) => result,
            Err(_) => Err(NetError::WriteFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                "write deadline exceeded",
            ))),
        }
    }

    /// Connect to a set of known peers and probe their liveness.
    ///
    /// Blocks until this node is listening. Per-target failures are logged
    /// and skipped.
    pub async fn bootstrap(&self, addresses: &[String]) {
        self.block_until_listening().await;
        for address in filter_self(&self.shared.canonical, addresses) {
            let client = match self.client(&address).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(%address, error = %err, "bootstrap dial failed");
                    continue;
                }
            };
            let payload = match Payload::from_message(&Ping) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to encode ping");
                    return;
                }
            };
            if let Err(err) = client.tell(payload).await {
                debug!(%address, error = %err, "bootstrap ping failed");
            }
        }
    }

    /// Best-effort send to every registered peer.
    pub async fn broadcast(&self, payload: Payload) {
        let peers: Vec<Arc<PeerClient>> = self.shared.peers.read().values().cloned().collect();
        for client in peers {
            if let Err(err) = client.tell(payload.clone()).await {
                warn!(address = %client.address(), error = %err, "broadcast send failed");
            }
        }
    }

    /// Sign once and send to each listed address.
    pub async fn broadcast_by_addresses(&self, payload: Payload, addresses: &[String]) {
        let envelope = match self.prepare_message(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "broadcast signing failed");
                return;
            }
        };
        for address in addresses {
            let canonical = match canonicalize(address) {
                Ok(canonical) => canonical,
                Err(err) => {
                    debug!(%address, error = %err, "skipping unparseable broadcast target");
                    continue;
                }
            };
            if let Err(err) = self.write(&canonical, envelope.clone()).await {
                debug!(%address, error = %err, "targeted broadcast failed");
            }
        }
    }

    /// Sign once and send to the address of each listed identity.
    pub async fn broadcast_by_ids(&self, payload: Payload, ids: &[NodeIdentity]) {
        let addresses: Vec<String> = ids.iter().map(|id| id.address.clone()).collect();
        self.broadcast_by_addresses(payload, &addresses).await;
    }

    /// Send to up to `count` randomly selected peers.
    ///
    /// Samples at most `3 * count` addresses in registry iteration order
    /// before shuffling, so large registries are never fully materialized.
    pub async fn broadcast_randomly(&self, payload: Payload, count: usize) {
        let mut addresses: Vec<String> = Vec::new();
        {
            let peers = self.shared.peers.read();
            for address in peers.keys() {
                if addresses.len() >= count.saturating_mul(3) {
                    break;
                }
                addresses.push(address.clone());
            }
        }
        addresses.shuffle(&mut rand::thread_rng());
        addresses.truncate(count);
        self.broadcast_by_addresses(payload, &addresses).await;
    }

    /// Shut down the engine: stop the flush and accept loops, close every
    /// peer client.
    pub async fn close(&self) {
        self.shared.kill.cancel();
        let peers: Vec<Arc<PeerClient>> = self.shared.peers.read().values().cloned().collect();
        for client in peers {
            client.close().await;
        }
    }

    /// Drop the registry and connection entries for a closed peer.
    pub(crate) async fn remove_peer(&self, address: &str) {
        self.shared.peers.write().remove(address);
        let state = self.shared.connections.write().remove(address);
        if let Some(state) = state {
            state.shutdown().await;
        }
    }

    fn transport(&self, scheme: &str) -> Result<Arc<dyn Transport>, NetError> {
        self.shared
            .transports
            .get(scheme)
            .cloned()
            .ok_or_else(|| NetError::UnknownScheme(scheme.to_string()))
    }
}
