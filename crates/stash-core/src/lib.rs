//! # Stash Core
//!
//! Core library for Stash - an embedded, versioned key-value store with
//! encryption, compression, migrations, backups and best-effort sync.
//!
//! This crate provides the storage engine and its coordinators,
//! independent of the CLI interface.
//!
//! ## Architecture
//!
//! - **codec**: serialize, compress (zstd) and encrypt (ChaCha20-Poly1305) values
//! - **storage**: the SQLite item store, version ledger and collaborator traits
//! - **query**: exact-match filter, sort, paginate and project
//! - **quota**: size accounting and write gating
//! - **sync**: mirroring into a secondary store
//! - **migration**: ordered, reversible schema migrations
//! - **backup**: full/incremental backups and conflict-aware restore
//! - **scheduler**: interval tasks with cancellation
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stash_core::{MemoryKeystore, Stash, StashConfig};
//!
//! # fn main() -> stash_core::Result<()> {
//! let keystore = MemoryKeystore::new();
//! let stash = Arc::new(Stash::open_in_memory(StashConfig::default(), &keystore)?);
//! stash.set("greeting", serde_json::json!({"text": "hello"}), &["demo"])?;
//! assert!(stash.get("greeting")?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
mod fs;
pub mod migration;
pub mod query;
pub mod quota;
pub mod scheduler;
pub mod storage;
pub mod sync;

pub use backup::{
    BackupConfig, BackupManager, BackupMetadata, ConflictResolution, RestoreFilter,
    RestoreOptions, RestoreReport, VerifyReport,
};
pub use cache::{CacheConfig, CacheEntry};
pub use codec::{Codec, CodecConfig};
pub use config::StashConfig;
pub use error::{CodecError, Result, StashError};
pub use events::{EventBus, MigrationDirection, StashEvent};
pub use migration::{
    MigrateOptions, Migration, MigrationManager, MigrationReport, MigrationStatus,
    RollbackOptions, ValidationReport,
};
pub use query::{Query, QueryResult};
pub use quota::{QuotaConfig, QuotaMonitor};
pub use scheduler::{Scheduler, TaskHandle};
pub use storage::{
    BlobStore, BulkOp, BulkResult, ExportRecord, FileKeystore, FsBlobStore, Item, ItemMetadata,
    MemoryBlobStore, MemoryKeystore, SecretStore, Stash, StashStats, SyncRecord, SyncTarget,
    VersionRecord,
};
pub use sync::{ConflictPolicy, MemorySyncTarget, SyncConfig, SyncCoordinator, SyncReport};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
