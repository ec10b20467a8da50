//! Data-encryption key material.
//!
//! The data key is a random 256-bit symmetric key generated once per store
//! and persisted only in a [`SecretStore`](crate::storage::SecretStore),
//! encoded as base64 text.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{KeyInit, OsRng};
use chacha20poly1305::ChaCha20Poly1305;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, StashError};

/// Length of the data key in bytes (32 bytes = 256 bits).
pub const KEY_LENGTH: usize = 32;

/// A symmetric data-encryption key.
///
/// Key bytes are zeroized from memory when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; KEY_LENGTH],
}

impl DataKey {
    /// Generate a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut generated = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(generated.as_slice());
        generated.as_mut_slice().zeroize();
        Self { key }
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// Get a reference to the raw key bytes.
    ///
    /// Avoid storing or logging this value.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Encode the key for storage in a secret keystore.
    pub fn to_encoded(&self) -> String {
        STANDARD.encode(self.key)
    }

    /// Decode a key previously produced by [`DataKey::to_encoded`].
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| StashError::Crypto(format!("Invalid data key encoding: {}", e)))?;
        if decoded.len() != KEY_LENGTH {
            let len = decoded.len();
            decoded.zeroize();
            return Err(StashError::Crypto(format!(
                "Data key must be {} bytes (got {})",
                KEY_LENGTH, len
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { key })
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
