//! Extension modules and pooled receive-dispatch contexts.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::PeerClient;
use crate::envelope::Payload;
use crate::error::NetError;
use crate::network::Network;

/// Extension module receiving lifecycle and per-message callbacks.
///
/// Hooks run in registration order.  `receive` errors are logged by the
/// engine and never propagated to the peer.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier used for [`Network::plugin`] lookups.
    fn id(&self) -> &'static str;

    /// Called once before the engine starts accepting peers.
    async fn startup(&self, _net: &Network) {}

    /// Called for every dispatched inbound message.
    async fn receive(&self, _ctx: &PluginContext) -> Result<(), NetError> {
        Ok(())
    }

    /// Called once after the accept loop terminates.
    async fn cleanup(&self, _net: &Network) {}

    /// Called when a peer client finishes initialization.
    async fn peer_connect(&self, _client: &Arc<PeerClient>) {}

    /// Called when a peer client closes.
    async fn peer_disconnect(&self, _client: &Arc<PeerClient>) {}
}

/// Registration-ordered plugin collection. Read-only once the engine is
/// built.
#[derive(Default)]
pub struct PluginList {
    entries: Vec<Arc<dyn Plugin>>,
}

impl PluginList {
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.entries.push(plugin);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.entries.iter().find(|plugin| plugin.id() == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dispatch context borrowed from the engine pool for one inbound message.
///
/// Plugins must not retain a context, or anything borrowed from it, past
/// their `receive` call; the engine clears and reuses it afterwards.
pub struct PluginContext {
    client: Option<Arc<PeerClient>>,
    payload: Option<Payload>,
    request_nonce: u64,
}

impl PluginContext {
    fn empty() -> Self {
        Self {
            client: None,
            payload: None,
            request_nonce: 0,
        }
    }

    /// The peer client the message arrived from.
    pub fn client(&self) -> &Arc<PeerClient> {
        self.client.as_ref().expect("context not populated")
    }

    /// The decoded typed payload.
    pub fn payload(&self) -> &Payload {
        self.payload.as_ref().expect("context not populated")
    }

    /// Correlation nonce of the originating request, or 0.
    pub fn request_nonce(&self) -> u64 {
        self.request_nonce
    }

    fn populate(&mut self, client: Arc<PeerClient>, payload: Payload, request_nonce: u64) {
        self.client = Some(client);
        self.payload = Some(payload);
        self.request_nonce = request_nonce;
    }

    fn clear(&mut self) {
        self.client = None;
        self.payload = None;
        self.request_nonce = 0;
    }
}

/// Engine-owned free list of dispatch contexts.
///
/// Owning the pool per engine keeps multiple engines in one process
/// independent, which the tests rely on.
pub(crate) struct ContextPool {
    free: Mutex<Vec<Box<PluginContext>>>,
}

impl ContextPool {
    pub(crate) fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acquire(
        &self,
        client: Arc<PeerClient>,
        payload: Payload,
        request_nonce: u64,
    ) -> Box<PluginContext> {
        let mut ctx = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new(PluginContext::empty()));
        ctx.populate(client, payload, request_nonce);
        ctx
    }

    /// Clear borrowed state and return the context to the free list.
    pub(crate) fn release(&self, mut ctx: Box<PluginContext>) {
        ctx.clear();
        self.free.lock().push(ctx);
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
