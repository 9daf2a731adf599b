//! Peer address parsing and canonicalization.
//!
//! Every registry key in the engine is the canonical `scheme://host:port`
//! rendering of an [`Address`].  Hostnames are never resolved; host
//! comparison stays deterministic on both ends of a connection.

use std::fmt;

use crate::error::NetError;

/// Parsed `scheme://host:port` peer address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Address {
    /// Parse and normalize an address string.
    ///
    /// Scheme and host are lowercased so that spelling differences do not
    /// produce distinct registry entries.
    pub fn parse(raw: &str) -> Result<Self, NetError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| NetError::InvalidAddress(raw.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| NetError::InvalidAddress(raw.to_string()))?;
        if scheme.is_empty() || host.is_empty() {
            return Err(NetError::InvalidAddress(raw.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| NetError::InvalidAddress(raw.to_string()))?;
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// `host:port` form handed to transports.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Compose an address string from its parts.
pub fn format_address(scheme: &str, host: &str, port: u16) -> String {
    format!("{scheme}://{host}:{port}")
}

/// Canonical rendering of an address string.
pub fn canonicalize(raw: &str) -> Result<String, NetError> {
    Ok(Address::parse(raw)?.to_string())
}

/// Drop addresses that are unparseable or refer to the node itself.
pub(crate) fn filter_self(own_canonical: &str, addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .filter_map(|raw| canonicalize(raw).ok())
        .filter(|canonical| canonical != own_canonical)
        .collect()
}
