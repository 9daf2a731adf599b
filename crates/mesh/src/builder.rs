//! Assembly of a network engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crypto::{Blake3, Ed25519, HashPolicy, Keypair, SignaturePolicy};

use crate::address::Address;
use crate::config::NetOptions;
use crate::error::NetError;
use crate::network::Network;
use crate::plugin::{Plugin, PluginList};
use crate::transport::{KcpTransport, TcpTransport, Transport};

/// Builds a [`Network`] from an address, keys, policies, plugins, and
/// transports.
///
/// `tcp` and `kcp` transports are registered by default; registering a
/// transport under either scheme replaces the built-in. Must be built from
/// within a Tokio runtime, since the engine's flush loop starts
/// immediately.
pub struct NetworkBuilder {
    address: Option<String>,
    keys: Option<Keypair>,
    options: NetOptions,
    signature_policy: Arc<dyn SignaturePolicy>,
    hash_policy: Arc<dyn HashPolicy>,
    plugins: PluginList,
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self {
            address: None,
            keys: None,
            options: NetOptions::default(),
            signature_policy: Arc::new(Ed25519),
            hash_policy: Arc::new(Blake3),
            plugins: PluginList::default(),
            transports: HashMap::new(),
        }
    }

    /// Full address to listen on, `scheme://host:port`. Required.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Node keypair. Generated from the signature policy when omitted.
    pub fn keys(mut self, keys: Keypair) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn options(mut self, options: NetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn connection_timeout(mut self, value: Duration) -> Self {
        self.options.connection_timeout = value;
        self
    }

    pub fn write_timeout(mut self, value: Duration) -> Self {
        self.options.write_timeout = value;
        self
    }

    pub fn write_flush_latency(mut self, value: Duration) -> Self {
        self.options.write_flush_latency = value;
        self
    }

    pub fn write_buffer_size(mut self, value: usize) -> Self {
        self.options.write_buffer_size = value;
        self
    }

    pub fn send_window_size(mut self, value: u16) -> Self {
        self.options.send_window_size = value;
        self
    }

    pub fn recv_window_size(mut self, value: u16) -> Self {
        self.options.recv_window_size = value;
        self
    }

    pub fn signature_policy(mut self, policy: Arc<dyn SignaturePolicy>) -> Self {
        self.signature_policy = policy;
        self
    }

    pub fn hash_policy(mut self, policy: Arc<dyn HashPolicy>) -> Self {
        self.hash_policy = policy;
        self
    }

    /// Register a plugin; dispatch order follows registration order.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Register a transport under a scheme.
    pub fn transport(mut self, scheme: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(scheme.into(), transport);
        self
    }

    /// Validate the configuration and assemble the engine.
    pub fn build(mut self) -> Result<Network, NetError> {
        let raw = self
            .address
            .ok_or_else(|| NetError::InvalidAddress("address is required".to_string()))?;
        let address = Address::parse(&raw)?;

        self.transports
            .entry("tcp".to_string())
            .or_insert_with(|| Arc::new(TcpTransport));
        self.transports.entry("kcp".to_string()).or_insert_with(|| {
            Arc::new(KcpTransport::new(
                self.options.send_window_size,
                self.options.recv_window_size,
            ))
        });
        if !self.transports.contains_key(&address.scheme) {
            return Err(NetError::UnknownScheme(address.scheme));
        }

        let keys = self
            .keys
            .unwrap_or_else(|| self.signature_policy.generate_keypair());

        let network = Network::assemble(
            self.options,
            keys,
            address,
            self.signature_policy,
            self.hash_policy,
            self.plugins,
            self.transports,
        );
        network.start();
        Ok(network)
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
