//! Payload transforms
//!
//! Optional byte transforms applied to the field section of every frame:
//! compression with zlib and authenticated encryption with
//! XChaCha20-Poly1305. Transforms run in registration order when sending and
//! in reverse order when receiving.

use std::io::{Read, Write};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::ProtocolError;

/// Size of the XChaCha20 nonce prepended to each encrypted payload
pub const NONCE_SIZE: usize = 24;

/// Default ceiling on decompressed output (16 MiB)
pub const DEFAULT_DECOMPRESS_LIMIT: usize = 16 * 1024 * 1024;

/// A reversible transform over payload bytes
pub trait PayloadTransform: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Transform outbound bytes
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    /// Reverse [`encode`](Self::encode) on inbound bytes
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// zlib compression
#[derive(Debug, Clone)]
pub struct ZlibTransform {
    level: Compression,
    decompress_limit: usize,
}

impl ZlibTransform {
    pub fn new() -> Self {
        Self {
            level: Compression::fast(),
            decompress_limit: DEFAULT_DECOMPRESS_LIMIT,
        }
    }

    /// Reject payloads that inflate past `limit` bytes
    pub fn with_decompress_limit(mut self, limit: usize) -> Self {
        self.decompress_limit = limit;
        self
    }
}

impl Default for ZlibTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadTransform for ZlibTransform {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), self.level);
        encoder
            .write_all(data)
            .map_err(|e| ProtocolError::Transform(format!("zlib compress: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| ProtocolError::Transform(format!("zlib compress: {}", e)))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(data.len() * 2);
        ZlibDecoder::new(data)
            .take(self.decompress_limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| ProtocolError::Transform(format!("zlib decompress: {}", e)))?;

        if out.len() > self.decompress_limit {
            return Err(ProtocolError::PayloadTooLarge {
                size: out.len(),
                max: self.decompress_limit,
            });
        }
        Ok(out)
    }
}

/// XChaCha20-Poly1305 encryption with a random nonce per payload
pub struct ChaChaTransform {
    cipher: XChaCha20Poly1305,
}

impl ChaChaTransform {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }
}

impl PayloadTransform for ChaChaTransform {
    fn name(&self) -> &'static str {
        "xchacha20poly1305"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let nonce: [u8; NONCE_SIZE] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), data)
            .map_err(|_| ProtocolError::Transform("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if data.len() < NONCE_SIZE {
            return Err(ProtocolError::Transform(
                "encrypted payload shorter than nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::Transform("decryption failed".to_string()))
    }
}

impl std::fmt::Debug for ChaChaTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaChaTransform").finish_non_exhaustive()
    }
}
