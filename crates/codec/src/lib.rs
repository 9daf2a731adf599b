//! Wire serialization for mesh frames and payloads.
//!
//! A frame on the wire is an unsigned varint byte length followed by a CBOR
//! body.  Plain (unframed) encoding is used for payload values and signature
//! preimages, so signers and verifiers hash identical bytes.  Keeping both
//! layers here means the framing codec, the envelope layer, and the test
//! harness cannot drift apart on the byte-level format.

use std::io::{self, Write};

use serde::{Serialize, de::DeserializeOwned};

/// Longest accepted varint length prefix; five 7-bit groups cover `u32`.
pub const MAX_PREFIX_BYTES: usize = 5;

/// Encode a value as plain CBOR.
pub fn encode<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(value, &mut body).map_err(encode_error)?;
    Ok(body)
}

/// Decode a value from plain CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> io::Result<T> {
    ciborium::de::from_reader(bytes).map_err(decode_error)
}

/// Encode a value as one wire frame: varint length prefix + CBOR body.
pub fn encode_framed<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let body = encode(value)?;
    if body.len() > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame body exceeds the u32 length prefix",
        ));
    }
    let mut frame = Vec::with_capacity(MAX_PREFIX_BYTES + body.len());
    put_uvarint(body.len() as u32, &mut frame);
    frame.write_all(&body)?;
    Ok(frame)
}

/// Append an unsigned varint, low 7-bit groups first.
pub fn put_uvarint(value: u32, buf: &mut Vec<u8>) {
    let mut rest = value;
    loop {
        let mut group = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest != 0 {
            group |= 0x80;
        }
        buf.push(group);
        if rest == 0 {
            break;
        }
    }
}

/// Incremental varint length-prefix decoder.
///
/// Stream readers feed it one byte at a time, so pulling a prefix off a
/// socket needs no lookahead or buffering.
#[derive(Debug, Default)]
pub struct PrefixDecoder {
    value: u32,
    consumed: usize,
}

impl PrefixDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next byte; yields the decoded length once complete.
    pub fn push(&mut self, byte: u8) -> io::Result<Option<u32>> {
        if self.consumed == MAX_PREFIX_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "length prefix does not terminate",
            ));
        }
        self.value |= ((byte & 0x7f) as u32) << (7 * self.consumed as u32);
        self.consumed += 1;
        if byte & 0x80 == 0 {
            Ok(Some(self.value))
        } else {
            Ok(None)
        }
    }
}

fn encode_error(err: ciborium::ser::Error<io::Error>) -> io::Error {
    match err {
        ciborium::ser::Error::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, format!("cbor encode: {other}")),
    }
}

fn decode_error(err: ciborium::de::Error<io::Error>) -> io::Error {
    match err {
        ciborium::de::Error::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, format!("cbor decode: {other}")),
    }
}
