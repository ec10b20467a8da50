//! Storage layer for Stash.
//!
//! This module holds the SQLite engine and the collaborator interfaces
//! it talks to.
//!
//! ## Architecture
//!
//! - [`Stash`]: the item store and version ledger, backed by SQLite
//! - [`traits`]: secret store, blob store and sync target interfaces
//! - [`keystore`] / [`blob`]: in-memory and on-disk implementations of those
//!
//! ## Security
//!
//! - Item values are encrypted with a data key (ChaCha20-Poly1305) when
//!   enabled; the key itself lives in a [`SecretStore`], never in the
//!   item database
//! - [`keystore::FileKeystore`] seals secrets with an age passphrase
//! - Keystore and blob files are written atomically

pub mod blob;
pub mod keystore;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export public types
pub use blob::{FsBlobStore, MemoryBlobStore};
pub use keystore::{FileKeystore, MemoryKeystore};
pub use sqlite::{Stash, DATA_KEY_SECRET};
pub use traits::{BlobStore, SecretStore, SyncTarget};
pub use types::{
    AppliedMigrationRecord, BulkOp, BulkResult, ExportRecord, Item, ItemMetadata, StashStats,
    SyncRecord, VacuumReport, VersionRecord,
};
