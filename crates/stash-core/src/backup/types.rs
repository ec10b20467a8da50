//! Backup metadata, options and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::types::ExportRecord;

/// Backup settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub compress: bool,
    /// Requires the store's data key
    pub encrypt: bool,
    /// Take a full backup before overwrite-restores and rollbacks
    pub auto_backup: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            compress: true,
            encrypt: false,
            auto_backup: true,
        }
    }
}

/// Stored next to each backup blob as `<id>.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created: DateTime<Utc>,
    /// Size of the stored blob in bytes
    pub size: u64,
    pub item_count: usize,
    /// BLAKE3 hex of the payload before compression/encryption
    pub checksum: String,
    pub compressed: bool,
    pub encrypted: bool,
    pub incremental: bool,
    pub base_backup: Option<String>,
}

/// How `merge` resolves a key that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    #[default]
    Skip,
    Overwrite,
    /// Write to `<key>_restored_<n>` instead
    Rename,
}

/// Restricts which backed-up records a restore applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFilter {
    pub key_prefix: Option<String>,
    /// Record must carry at least one of these tags; empty matches all
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RestoreFilter {
    pub fn matches(&self, record: &ExportRecord) -> bool {
        if let Some(prefix) = &self.key_prefix {
            if !record.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.tags.is_empty()
            || self
                .tags
                .iter()
                .any(|tag| record.tags.contains(tag) || record.metadata.tags.contains(tag))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Replace existing keys
    pub overwrite: bool,
    /// Resolve existing keys with `conflict_resolution` instead of
    /// reporting them as conflicts
    pub merge: bool,
    pub conflict_resolution: ConflictResolution,
    /// Report what would happen without writing
    pub dry_run: bool,
    pub filter: Option<RestoreFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub backup_id: String,
    /// Records written (including renamed ones)
    pub restored: usize,
    pub skipped: usize,
    /// `(original key, written key)` pairs
    pub renamed: Vec<(String, String)>,
    /// Existing keys left untouched
    pub conflicts: Vec<String>,
    pub dry_run: bool,
    /// Automatic backup taken before an overwrite-restore
    pub pre_restore_backup: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub backup_id: String,
    pub checksum: String,
    pub item_count: usize,
    /// Structural problems; any issue makes the backup unusable
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}
