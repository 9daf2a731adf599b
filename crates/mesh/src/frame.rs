//! Reading and writing of signed envelopes on a byte stream.
//!
//! The frame layout (length prefix + CBOR body) lives in the `codec` crate;
//! this module adds the streaming side: appending frames to a connection's
//! buffered writer and pulling them back off a reader with signature
//! verification.  The writer side never flushes here; socket sends happen
//! in the engine's flush loop.

use crypto::{HashPolicy, SignaturePolicy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::error::NetError;

/// One frame pulled off the wire.
pub(crate) enum Inbound {
    /// Zero-length keepalive frame; skipped by the receive loop.
    Empty,
    /// An envelope whose signature checked out.
    Message(Envelope),
}

pub(crate) async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), NetError>
where
    W: AsyncWriteExt + Unpin,
{
    let frame = codec::encode_framed(envelope).map_err(NetError::WriteFailed)?;
    writer.write_all(&frame).await.map_err(NetError::WriteFailed)
}

/// Read one frame and verify its signature against the declared sender key.
///
/// An envelope that fails verification yields [`NetError::InvalidSignature`];
/// the caller drops the frame and keeps the connection. I/O and decode
/// failures terminate the caller's read loop.
pub(crate) async fn read_envelope<R>(
    reader: &mut R,
    max_len: usize,
    hash: &dyn HashPolicy,
    signature: &dyn SignaturePolicy,
) -> Result<Inbound, NetError>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = codec::PrefixDecoder::new();
    let len = loop {
        let byte = reader.read_u8().await.map_err(NetError::ReadFailed)?;
        if let Some(len) = prefix.push(byte).map_err(NetError::ReadFailed)? {
            break len as usize;
        }
    };
    if len == 0 {
        return Ok(Inbound::Empty);
    }
    if len > max_len {
        return Err(NetError::FrameTooLarge);
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(NetError::ReadFailed)?;
    let envelope: Envelope = codec::decode(&buf).map_err(NetError::ReadFailed)?;
    if !envelope.verify(hash, signature) {
        return Err(NetError::InvalidSignature);
    }
    Ok(Inbound::Message(envelope))
}
