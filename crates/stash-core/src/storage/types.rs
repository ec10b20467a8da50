//! Core data types for the storage layer.
//!
//! These shapes are the durable format: field names and types must stay
//! stable across releases.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to every stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// When the key was first written
    pub created: DateTime<Utc>,

    /// When the current version was written
    pub updated: DateTime<Utc>,

    /// Strictly increasing per key, starting at 1
    pub version: u64,

    /// Serialized size in bytes before compression/encryption
    pub size: u64,

    /// Whether the persisted value is encrypted
    pub encrypted: bool,

    /// Whether the persisted value is compressed
    pub compressed: bool,

    /// Tags associated with this item
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// A stored item with its decoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub value: serde_json::Value,
    pub metadata: ItemMetadata,
}

/// A snapshot of an item taken before a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Key of the item this snapshot belongs to
    pub item_id: String,

    /// Version of the snapshotted item
    pub version: u64,

    /// When the snapshot was recorded
    pub timestamp: DateTime<Utc>,

    /// Full item state before the mutation
    pub snapshot: Item,
}

/// One element of the JSON export format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub metadata: ItemMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<Item> for ExportRecord {
    fn from(item: Item) -> Self {
        let tags = item.metadata.tags.iter().cloned().collect();
        Self {
            key: item.key,
            value: item.value,
            metadata: item.metadata,
            tags,
        }
    }
}

/// What a sync target receives for each key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub value: serde_json::Value,
    pub metadata: ItemMetadata,
}

impl From<&Item> for SyncRecord {
    fn from(item: &Item) -> Self {
        Self {
            value: item.value.clone(),
            metadata: item.metadata.clone(),
        }
    }
}

/// A single operation in a [`bulk`](super::Stash::bulk) batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BulkOp {
    Set {
        key: String,
        value: serde_json::Value,
        #[serde(default)]
        tags: Vec<String>,
    },
    Delete {
        key: String,
    },
}

impl BulkOp {
    pub fn set(key: impl Into<String>, value: serde_json::Value) -> Self {
        BulkOp::Set {
            key: key.into(),
            value,
            tags: Vec::new(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BulkOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            BulkOp::Set { key, .. } | BulkOp::Delete { key } => key,
        }
    }
}

/// Per-op outcome of a committed bulk batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BulkResult {
    Set { key: String, version: u64 },
    Delete { key: String, existed: bool },
}

/// Aggregate engine statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashStats {
    pub item_count: u64,
    pub version_count: u64,
    pub total_size: u64,
    pub encrypted_items: u64,
    pub compressed_items: u64,
    pub quota_limit: u64,
    pub quota_used_percent: f64,
    pub schema_version: u32,
}

/// Outcome of [`vacuum`](super::Stash::vacuum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacuumReport {
    pub versions_removed: usize,
}

/// A migration step recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigrationRecord {
    pub version: u32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// blake3 of `"{version}:{description}"`
    pub checksum: String,
}
