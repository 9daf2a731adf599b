use std::io;

use thiserror::Error;

/// Errors surfaced by the networking runtime.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("unknown transport scheme: {0}")]
    UnknownScheme(String),
    #[error("peer should not dial itself")]
    SelfDial,
    #[error("dial failed: {0}")]
    DialFailed(#[source] io::Error),
    #[error("listen failed: {0}")]
    ListenFailed(#[source] io::Error),
    #[error("peer is not ready")]
    NotReady,
    #[error("connection does not exist")]
    NoConnection,
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),
    #[error("frame exceeds maximum size")]
    FrameTooLarge,
    #[error("envelope signature is invalid")]
    InvalidSignature,
    #[error("envelope sender does not match the learned peer identity")]
    SenderMismatch,
    #[error("signing failed: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("request timed out")]
    TimedOut,
    #[error("peer client is closed")]
    Closed,
}
