//! Key material and pluggable signing for the mesh runtime.
//!
//! Signing and hashing are consumed through object-safe policy traits so
//! the envelope layer stays agnostic of the concrete scheme.  Ed25519 and
//! BLAKE3 are the defaults wired in by the network builder; swapping either
//! only requires handing the builder a different policy.

#![forbid(unsafe_code)]

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Length in bytes of Ed25519 seeds and public keys.
pub const KEY_LEN: usize = 32;

/// Errors emitted by signing and verification helpers.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed key material")]
    InvalidKey,
    #[error("malformed signature")]
    InvalidSignature,
    #[error("signing operation failed")]
    SigningFailed,
}

/// Public and secret key pair identifying one node.
///
/// The secret half is wiped on drop and redacted from `Debug` output.
/// Do not derive `Copy` or log this type.
#[derive(Clone, Serialize, Deserialize)]
pub struct Keypair {
    #[serde(with = "serde_bytes")]
    public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    secret_key: Vec<u8>,
}

impl Keypair {
    pub fn new(public_key: Vec<u8>, secret_key: Vec<u8>) -> Self {
        Self {
            public_key,
            secret_key,
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = hex::encode(&self.public_key[..self.public_key.len().min(8)]);
        f.debug_struct("Keypair")
            .field("public_key", &prefix)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Pluggable signature scheme.
///
/// Implementations sign and verify fixed-size digests produced by a
/// [`HashPolicy`]; they never see the original message.
pub trait SignaturePolicy: Send + Sync {
    /// Generate a fresh keypair from the operating system RNG.
    fn generate_keypair(&self) -> Keypair;

    /// Sign a digest with the secret key.
    fn sign(&self, secret_key: &[u8], digest: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a signature over a digest with the public key.
    fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool;
}

/// Pluggable message digest.
pub trait HashPolicy: Send + Sync {
    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

/// Ed25519 signature policy backed by `ed25519-dalek`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519;

impl SignaturePolicy for Ed25519 {
    fn generate_keypair(&self) -> Keypair {
        let mut seed = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut seed);
        let signing = SigningKey::from_bytes(&seed);
        let keypair = Keypair::new(signing.verifying_key().to_bytes().to_vec(), seed.to_vec());
        seed.zeroize();
        keypair
    }

    fn sign(&self, secret_key: &[u8], digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let seed: [u8; KEY_LEN] = secret_key.try_into().map_err(|_| CryptoError::InvalidKey)?;
        let signing = SigningKey::from_bytes(&seed);
        Ok(signing.sign(digest).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; KEY_LEN]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        key.verify(digest, &Signature::from_bytes(&sig_bytes)).is_ok()
    }
}

/// BLAKE3 hash policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3;

impl HashPolicy for Blake3 {
    fn digest(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}
