//! Collaborator interfaces consumed by the engine.
//!
//! The engine itself is concrete ([`Stash`](super::Stash)); these traits
//! describe the external systems it talks to, so tests and embedders can
//! swap implementations:
//!
//! - [`SecretStore`]: holds the data-encryption key outside the item database
//! - [`BlobStore`]: durable storage for backup payloads, keyed by id
//! - [`SyncTarget`]: the secondary store the sync coordinator mirrors into

use std::collections::HashMap;

use super::types::SyncRecord;
use crate::error::Result;

/// A keystore for small named secrets.
///
/// Implementations must never persist secrets next to item data.
pub trait SecretStore: Send + Sync {
    /// Get a secret by name, `Ok(None)` if it was never set.
    fn get_secret(&self, name: &str) -> Result<Option<String>>;

    /// Create or replace a secret.
    fn set_secret(&self, name: &str, value: &str) -> Result<()>;
}

/// Durable blob storage keyed by string id.
pub trait BlobStore: Send + Sync {
    /// Store a blob, replacing any existing blob with the same id.
    fn put(&self, id: &str, data: &[u8]) -> Result<()>;

    /// Fetch a blob, `Ok(None)` if absent.
    fn get(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a blob. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// List all blob ids.
    fn list(&self) -> Result<Vec<String>>;
}

/// A secondary store receiving `{value, metadata}` records keyed like the
/// primary store.
///
/// All failures should be reported as `StashError::Sync`; the coordinator
/// treats them as transient.
pub trait SyncTarget: Send + Sync {
    /// Fetch every record currently held by the target.
    fn fetch_all(&self) -> Result<HashMap<String, SyncRecord>>;

    /// Create or replace a record.
    fn put(&self, key: &str, record: &SyncRecord) -> Result<()>;

    /// Remove a record. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
