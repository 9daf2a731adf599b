//! Authenticated peer-to-peer messaging for decentralized nodes.
//!
//! A [`Network`] owns listener sockets over pluggable transports, a registry
//! of peer clients, per-connection buffered write pipelines, and ordered
//! dispatch of signed envelopes to registered [`Plugin`]s.  Each remote peer
//! is represented by a [`PeerClient`] carrying readiness gates, an ordered
//! submission queue, and request/reply correlation state.
//!
//! Messages travel as length-framed CBOR envelopes signed over the sender
//! identity and payload bytes; envelopes that fail verification never reach
//! dispatch.

mod address;
mod builder;
mod client;
mod config;
mod conn;
mod envelope;
mod error;
mod frame;
mod gate;
mod network;
mod plugin;
pub mod transport;

pub use address::{Address, canonicalize, format_address};
pub use builder::NetworkBuilder;
pub use client::PeerClient;
pub use config::NetOptions;
pub use envelope::{Envelope, NodeIdentity, Payload, Ping, Pong, RawBytes, WirePayload};
pub use error::NetError;
pub use network::Network;
pub use plugin::{Plugin, PluginContext, PluginList};
