//! Secret keystore implementations.
//!
//! - [`MemoryKeystore`]: process-local, for tests and ephemeral stores
//! - [`FileKeystore`]: a JSON map of secrets sealed with an age passphrase
//!   and written atomically

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::SecretStore;
use crate::crypto::PassphraseSeal;
use crate::error::{Result, StashError};

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    secrets: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.secrets
            .lock()
            .map_err(|_| StashError::Storage("Keystore lock poisoned".to_string()))
    }
}

impl SecretStore for MemoryKeystore {
    fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        self.lock()?.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Passphrase-protected keystore file.
pub struct FileKeystore {
    path: PathBuf,
    seal: PassphraseSeal,
    secrets: Mutex<BTreeMap<String, String>>,
}

impl FileKeystore {
    /// Open the keystore at `path`, creating it lazily on first write.
    ///
    /// An existing file is decrypted immediately, so a wrong passphrase
    /// fails here with `StashError::IncorrectPassphrase`.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self> {
        let seal = PassphraseSeal::new(passphrase)?;

        let secrets = if path.exists() {
            let plaintext = seal.unseal(&fs::read(path)?)?;
            serde_json::from_slice(&plaintext)
                .map_err(|e| StashError::Storage(format!("Invalid keystore contents: {}", e)))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            seal,
            secrets: Mutex::new(secrets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        let plaintext = serde_json::to_vec(secrets)?;
        crate::fs::write_atomic(&self.path, &self.seal.seal(&plaintext)?)
    }
}

impl SecretStore for FileKeystore {
    fn get_secret(&self, name: &str) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|_| StashError::Storage("Keystore lock poisoned".to_string()))?;
        Ok(secrets.get(name).cloned())
    }

    fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| StashError::Storage("Keystore lock poisoned".to_string()))?;
        let previous = secrets.insert(name.to_string(), value.to_string());
        if let Err(err) = self.persist(&secrets) {
            match previous {
                Some(old) => secrets.insert(name.to_string(), old),
                None => secrets.remove(name),
            };
            return Err(err);
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeystore")
            .field("path", &self.path)
            .field("seal", &self.seal)
            .finish()
    }
}
