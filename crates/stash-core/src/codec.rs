//! Codec pipeline for stored values.
//!
//! Encode order is serialize → compress → encrypt; decode reverses the
//! steps according to the flags stored with each record, so records written
//! under different configurations coexist in one store.
//!
//! - Serialization: JSON via `serde_json`
//! - Compression: zstd
//! - Encryption: ChaCha20-Poly1305, random 96-bit nonce prefixed to the
//!   ciphertext

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};

use crate::crypto::DataKey;
use crate::error::{CodecError, Result};

/// Nonce length for ChaCha20-Poly1305.
const NONCE_LENGTH: usize = 12;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Which transforms new writes go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub compress: bool,
    pub encrypt: bool,
    #[serde(default = "default_level")]
    pub compression_level: i32,
}

fn default_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compress: false,
            encrypt: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl CodecConfig {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }
}

/// Output of [`Codec::encode`].
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Transformed bytes as persisted
    pub bytes: Vec<u8>,
    /// Serialized length before compression/encryption
    pub size: u64,
    pub compressed: bool,
    pub encrypted: bool,
}

/// The value transform pipeline.
pub struct Codec {
    config: CodecConfig,
    key: Option<DataKey>,
}

impl Codec {
    pub fn new(config: CodecConfig, key: Option<DataKey>) -> Self {
        Self { config, key }
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    /// Whether a data key is loaded.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Serialize and transform a value according to the current config.
    pub fn encode(&self, value: &serde_json::Value) -> Result<Encoded> {
        let serialized = serde_json::to_vec(value)?;
        let size = serialized.len() as u64;
        let (bytes, compressed, encrypted) = self.seal(serialized)?;
        Ok(Encoded {
            bytes,
            size,
            compressed,
            encrypted,
        })
    }

    /// Reverse [`Codec::encode`] using the record's own flags.
    pub fn decode(
        &self,
        bytes: &[u8],
        compressed: bool,
        encrypted: bool,
    ) -> Result<serde_json::Value> {
        let plain = self.open(bytes, compressed, encrypted)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    /// Apply configured compression and encryption to raw bytes.
    ///
    /// Returns the transformed bytes and the `(compressed, encrypted)` flags.
    pub fn seal(&self, data: Vec<u8>) -> Result<(Vec<u8>, bool, bool)> {
        let bytes = self.seal_with(data, self.config.compress, self.config.encrypt)?;
        Ok((bytes, self.config.compress, self.config.encrypt))
    }

    /// Apply an explicit combination of transforms, independent of the
    /// item-level config. Backups use this with their own settings.
    pub fn seal_with(&self, data: Vec<u8>, compressed: bool, encrypted: bool) -> Result<Vec<u8>> {
        let mut bytes = data;
        if compressed {
            bytes = compress(&bytes, self.config.compression_level)?;
        }
        if encrypted {
            let key = self.key.as_ref().ok_or_else(|| {
                CodecError::EncryptionFailed("No data key loaded".to_string())
            })?;
            bytes = encrypt(key, &bytes)?;
        }
        Ok(bytes)
    }

    /// Reverse [`Codec::seal`] given the flags the bytes were sealed with.
    pub fn open(&self, bytes: &[u8], compressed: bool, encrypted: bool) -> Result<Vec<u8>> {
        let mut data = if encrypted {
            let key = self.key.as_ref().ok_or_else(|| {
                CodecError::DecryptionFailed("No data key available".to_string())
            })?;
            decrypt(key, bytes)?
        } else {
            bytes.to_vec()
        };
        if compressed {
            data = decompress(&data)?;
        }
        Ok(data)
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("config", &self.config)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

/// Compress bytes with zstd.
pub fn compress(data: &[u8], level: i32) -> std::result::Result<Vec<u8>, CodecError> {
    zstd::stream::encode_all(data, level).map_err(|e| CodecError::CompressionFailed(e.to_string()))
}

/// Decompress zstd bytes.
pub fn decompress(data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
    zstd::stream::decode_all(data).map_err(|e| CodecError::DecompressionFailed(e.to_string()))
}

/// Encrypt bytes with ChaCha20-Poly1305; output is `nonce || ciphertext`.
pub fn encrypt(key: &DataKey, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CodecError::EncryptionFailed(format!("Cipher creation failed: {}", e)))?;
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| CodecError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt bytes produced by [`encrypt`].
pub fn decrypt(key: &DataKey, data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
    if data.len() < NONCE_LENGTH {
        return Err(CodecError::DecryptionFailed(
            "Ciphertext shorter than nonce".to_string(),
        ));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CodecError::DecryptionFailed(format!("Cipher creation failed: {}", e)))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CodecError::DecryptionFailed("Authentication failed".to_string()))
}
