//! # Envelope Codec
//!
//! The envelope is the structured unit carried in a frame payload. Its body
//! is the bincode encoding of the typed message, optionally zlib-compressed
//! and then optionally sealed into a [`Ciphertext`].
//!
//! Outbound order is compress then encrypt; inbound is decrypt then
//! decompress.

use std::io::{Read, Write};

use bincode::Options;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::EnvelopeError;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Ciphertext format version.
pub const CIPHER_VERSION: u8 = 1;

/// A message type that can travel in an envelope.
///
/// `TYPE_NAME` is the routing key and the AEAD associated data.
pub trait NetMessage: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_NAME: &'static str;
}

/// Frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub type_name: String,
    pub version: u32,
    pub compress_flag: bool,
    pub encrypt_flag: bool,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8], limit: usize) -> Result<Self, EnvelopeError> {
        decode(bytes, limit)
    }
}

/// 6-byte channel token on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireToken {
    pub salt: [u8; 3],
    pub hmac: [u8; 3],
}

/// Sealed envelope body.
///
/// `aes_iv` and `aes_tag` are variable-length on the wire so a malformed
/// peer produces a length error rather than a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub cipher_version: u8,
    pub aes_iv: Vec<u8>,
    pub aes_tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub token: WireToken,
}

fn options(limit: usize) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit as u64)
}

/// bincode-encode a value.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    bincode::serialize(value).map_err(|e| EnvelopeError::Encode(e.to_string()))
}

/// bincode-decode a value, refusing to allocate past `limit` bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], limit: usize) -> Result<T, EnvelopeError> {
    options(limit)
        .deserialize(bytes)
        .map_err(|e| EnvelopeError::Decode(e.to_string()))
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| EnvelopeError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EnvelopeError::Compression(e.to_string()))
}

/// Inflate at most `limit` bytes; larger outputs are rejected.
pub fn decompress(bytes: &[u8], limit: usize) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| EnvelopeError::Compression(e.to_string()))?;

    if out.len() > limit {
        return Err(EnvelopeError::TooLarge { limit });
    }
    Ok(out)
}
