//! Passphrase sealing for the file keystore.
//!
//! A sealed blob is an age file with a single scrypt stanza, so it can also
//! be opened with the `age` command-line tool.

use std::fmt;
use std::io::{Read, Write};

use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, StashError};

/// Minimum passphrase length in bytes.
pub const MIN_PASSPHRASE_LENGTH: usize = 8;

/// A validated passphrase that seals and unseals keystore contents.
pub struct PassphraseSeal {
    passphrase: SecretString,
}

impl PassphraseSeal {
    /// Rejects blank passphrases and ones shorter than
    /// [`MIN_PASSPHRASE_LENGTH`] with `StashError::InvalidInput`.
    pub fn new(passphrase: &str) -> Result<Self> {
        if passphrase.trim().is_empty() {
            return Err(StashError::InvalidInput(
                "Passphrase cannot be empty".to_string(),
            ));
        }
        if passphrase.len() < MIN_PASSPHRASE_LENGTH {
            return Err(StashError::InvalidInput(format!(
                "Passphrase must be at least {} characters (got {})",
                MIN_PASSPHRASE_LENGTH,
                passphrase.len()
            )));
        }
        Ok(Self {
            passphrase: SecretString::from(passphrase.to_string()),
        })
    }

    fn age_secret(&self) -> age::secrecy::SecretString {
        age::secrecy::SecretString::from(self.passphrase.expose_secret().to_string())
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut sealed = Vec::with_capacity(plaintext.len() + 256);
        let mut writer = age::Encryptor::with_user_passphrase(self.age_secret())
            .wrap_output(&mut sealed)
            .map_err(crypto_error("start sealing"))?;
        writer
            .write_all(plaintext)
            .map_err(crypto_error("write sealed data"))?;
        writer.finish().map_err(crypto_error("finish sealing"))?;
        Ok(sealed)
    }

    /// A passphrase that does not match yields
    /// `StashError::IncorrectPassphrase`; malformed input yields
    /// `StashError::Crypto`.
    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let decryptor = age::Decryptor::new(sealed).map_err(crypto_error("read sealed header"))?;
        let identity = age::scrypt::Identity::new(self.age_secret());
        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| match e {
                age::DecryptError::NoMatchingKeys
                | age::DecryptError::DecryptionFailed
                | age::DecryptError::KeyDecryptionFailed => StashError::IncorrectPassphrase,
                other => StashError::Crypto(format!("Failed to unseal: {}", other)),
            })?;

        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(crypto_error("read sealed data"))?;
        Ok(plaintext)
    }
}

impl fmt::Debug for PassphraseSeal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassphraseSeal([REDACTED])")
    }
}

fn crypto_error<E: fmt::Display>(step: &'static str) -> impl FnOnce(E) -> StashError {
    move |e| StashError::Crypto(format!("Failed to {}: {}", step, e))
}
