//! Signed wire envelopes and typed payloads.

use std::hash::{Hash, Hasher};
use std::io;

use crypto::{HashPolicy, SignaturePolicy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Identity advertised by a node: its public key and reachable address.
///
/// Two identities are equal iff their public keys are equal; the address is
/// advisory routing information.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeIdentity {
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    pub address: String,
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for NodeIdentity {}

impl Hash for NodeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.public_key.hash(state);
    }
}

/// Marker for types that can travel as an envelope payload.
///
/// `KIND` plays the role of a type URL: receivers route on it before
/// decoding the value bytes.
pub trait WirePayload: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

/// Opaque typed payload carried by an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

impl Payload {
    /// Encode a typed message into its wire payload.
    pub fn from_message<T: WirePayload>(message: &T) -> Result<Self, NetError> {
        Ok(Self {
            kind: T::KIND.to_string(),
            value: codec::encode(message).map_err(NetError::WriteFailed)?,
        })
    }

    /// Decode the payload as a specific message type.
    pub fn decode<T: WirePayload>(&self) -> Result<T, NetError> {
        codec::decode(&self.value).map_err(NetError::ReadFailed)
    }

    pub fn is<T: WirePayload>(&self) -> bool {
        self.kind == T::KIND
    }
}

/// Liveness probe sent to every bootstrap target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping;

impl WirePayload for Ping {
    const KIND: &'static str = "mesh.ping";
}

/// Answer to a [`Ping`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong;

impl WirePayload for Pong {
    const KIND: &'static str = "mesh.pong";
}

/// Raw control bytes consumed in-band by the peer client rather than being
/// fanned out to plugins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBytes(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl WirePayload for RawBytes {
    const KIND: &'static str = "mesh.bytes";
}

/// The signed wire unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Payload,
    pub sender: NodeIdentity,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// Strictly increasing per outgoing connection; assigned at send.
    pub message_nonce: u64,
    /// Correlation id; nonzero when part of a request/reply exchange.
    pub request_nonce: u64,
    /// True marks this envelope as the reply to `request_nonce`.
    pub reply_flag: bool,
}

impl Envelope {
    /// Sign `payload` on behalf of `sender`.
    ///
    /// The signature covers the digest of the canonical encoding of the
    /// sender identity together with the raw payload bytes.  Nonces start
    /// at zero; the send path assigns `message_nonce`.
    pub fn signed(
        payload: Payload,
        sender: NodeIdentity,
        secret_key: &[u8],
        hash: &dyn HashPolicy,
        signature: &dyn SignaturePolicy,
    ) -> Result<Self, NetError> {
        let preimage =
            signature_preimage(&sender, &payload.value).map_err(NetError::WriteFailed)?;
        let signature = signature.sign(secret_key, &hash.digest(&preimage))?;
        Ok(Self {
            payload,
            sender,
            signature,
            message_nonce: 0,
            request_nonce: 0,
            reply_flag: false,
        })
    }

    /// Verify the signature against the embedded sender key.
    pub fn verify(&self, hash: &dyn HashPolicy, signature: &dyn SignaturePolicy) -> bool {
        let Ok(preimage) = signature_preimage(&self.sender, &self.payload.value) else {
            return false;
        };
        signature.verify(
            &self.sender.public_key,
            &hash.digest(&preimage),
            &self.signature,
        )
    }
}

/// Bytes covered by the envelope signature: the CBOR encoding of the sender
/// identity and the raw payload value.
fn signature_preimage(sender: &NodeIdentity, value: &[u8]) -> io::Result<Vec<u8>> {
    codec::encode(&(sender, serde_bytes::Bytes::new(value)))
}
