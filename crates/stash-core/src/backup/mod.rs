//! Full and incremental backups with verified, conflict-aware restore.
//!
//! A backup is the JSON export of the item set, checksummed with BLAKE3
//! before it is compressed and/or encrypted, and written to a
//! [`BlobStore`] as `backup-<uuid>` plus a `backup-<uuid>.meta.json`
//! metadata blob.
//!
//! Incremental backups hold the items updated after their base's creation
//! time. The base must be a full backup; chains of incrementals are not
//! supported. Keys deleted after the base was taken are not tracked.

mod types;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StashError};
use crate::events::StashEvent;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::storage::types::{BulkOp, ExportRecord};
use crate::storage::{BlobStore, Stash};

pub use types::{
    BackupConfig, BackupMetadata, ConflictResolution, RestoreFilter, RestoreOptions,
    RestoreReport, VerifyReport,
};

const META_SUFFIX: &str = ".meta.json";

fn meta_id(id: &str) -> String {
    format!("{}{}", id, META_SUFFIX)
}

/// BLAKE3 hex digest of a backup payload.
pub fn checksum(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Creates, verifies and restores backups of one [`Stash`].
pub struct BackupManager {
    stash: Arc<Stash>,
    blobs: Arc<dyn BlobStore>,
    config: BackupConfig,
}

impl BackupManager {
    pub fn new(stash: Arc<Stash>, blobs: Arc<dyn BlobStore>, config: BackupConfig) -> Self {
        Self {
            stash,
            blobs,
            config,
        }
    }

    pub fn config(&self) -> BackupConfig {
        self.config
    }

    /// Back up every item.
    #[tracing::instrument(skip(self))]
    pub fn create_backup(&self) -> Result<BackupMetadata> {
        let created = Utc::now();
        let records = self.stash.export_records()?;
        self.write_backup(created, records, None)
    }

    /// Back up the items updated since `base_id` was created.
    #[tracing::instrument(skip(self))]
    pub fn create_incremental_backup(&self, base_id: &str) -> Result<BackupMetadata> {
        let base = self.metadata(base_id)?;
        if base.incremental {
            return Err(StashError::Validation(format!(
                "Backup {} is incremental; the base of an incremental backup must be a full backup",
                base_id
            )));
        }
        let created = Utc::now();
        let records = self
            .stash
            .items_changed_since(base.created)?
            .into_iter()
            .map(ExportRecord::from)
            .collect();
        self.write_backup(created, records, Some(&base))
    }

    fn write_backup(
        &self,
        created: DateTime<Utc>,
        records: Vec<ExportRecord>,
        base: Option<&BackupMetadata>,
    ) -> Result<BackupMetadata> {
        let payload = serde_json::to_vec(&records)?;
        let checksum = checksum(&payload);
        let blob = self
            .stash
            .codec()
            .seal_with(payload, self.config.compress, self.config.encrypt)?;

        let metadata = BackupMetadata {
            id: format!("backup-{}", Uuid::now_v7()),
            created,
            size: blob.len() as u64,
            item_count: records.len(),
            checksum,
            compressed: self.config.compress,
            encrypted: self.config.encrypt,
            incremental: base.is_some(),
            base_backup: base.map(|b| b.id.clone()),
        };

        self.blobs.put(&metadata.id, &blob)?;
        self.blobs
            .put(&meta_id(&metadata.id), &serde_json::to_vec_pretty(&metadata)?)?;

        info!(
            id = %metadata.id,
            items = metadata.item_count,
            size = metadata.size,
            incremental = metadata.incremental,
            "Backup created"
        );
        self.stash.events().emit(StashEvent::BackupCreated {
            id: metadata.id.clone(),
            incremental: metadata.incremental,
        });
        Ok(metadata)
    }

    /// Metadata of `id`.
    pub fn metadata(&self, id: &str) -> Result<BackupMetadata> {
        let bytes = self
            .blobs
            .get(&meta_id(id))?
            .ok_or_else(|| StashError::not_found(format!("backup {}", id)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StashError::Storage(format!("Invalid metadata for backup {}: {}", id, e)))
    }

    /// All backups, oldest first.
    pub fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut backups = Vec::new();
        for blob_id in self.blobs.list()? {
            let Some(id) = blob_id.strip_suffix(META_SUFFIX) else {
                continue;
            };
            match self.metadata(id) {
                Ok(metadata) => backups.push(metadata),
                Err(err) => warn!(id, error = %err, "Skipping unreadable backup metadata"),
            }
        }
        backups.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(backups)
    }

    /// Delete a backup and its metadata. A full backup that incremental
    /// backups depend on cannot be deleted.
    pub fn delete_backup(&self, id: &str) -> Result<bool> {
        let dependents: Vec<String> = self
            .list_backups()?
            .into_iter()
            .filter(|b| b.base_backup.as_deref() == Some(id))
            .map(|b| b.id)
            .collect();
        if !dependents.is_empty() {
            return Err(StashError::Validation(format!(
                "Backup {} is the base of {}",
                id,
                dependents.join(", ")
            )));
        }

        let existed = self.blobs.delete(&meta_id(id))?;
        let blob_existed = self.blobs.delete(id)?;
        if existed || blob_existed {
            info!(id, "Backup deleted");
        }
        Ok(existed || blob_existed)
    }

    /// Recompute the checksum of `id` and check its structure.
    ///
    /// A checksum mismatch is `StashError::BackupCorruption`; structural
    /// problems are reported as issues, a missing base as a warning.
    #[tracing::instrument(skip(self))]
    pub fn verify(&self, id: &str) -> Result<VerifyReport> {
        let metadata = self.metadata(id)?;
        let (report, _) = self.read_verified(&metadata)?;
        Ok(report)
    }

    fn read_verified(&self, metadata: &BackupMetadata) -> Result<(VerifyReport, Vec<ExportRecord>)> {
        let blob = self
            .blobs
            .get(&metadata.id)?
            .ok_or_else(|| StashError::not_found(format!("backup blob {}", metadata.id)))?;
        let payload = self
            .stash
            .codec()
            .open(&blob, metadata.compressed, metadata.encrypted)?;

        let actual = checksum(&payload);
        if actual != metadata.checksum {
            warn!(id = %metadata.id, "Backup checksum mismatch");
            return Err(StashError::BackupCorruption {
                id: metadata.id.clone(),
                expected: metadata.checksum.clone(),
                actual,
            });
        }

        let mut report = VerifyReport {
            backup_id: metadata.id.clone(),
            checksum: actual,
            ..Default::default()
        };

        let records: Vec<ExportRecord> = match serde_json::from_slice(&payload) {
            Ok(records) => records,
            Err(err) => {
                report.issues.push(format!("Payload is not a valid export: {}", err));
                Vec::new()
            }
        };
        report.item_count = records.len();

        if report.issues.is_empty() && records.len() != metadata.item_count {
            report.issues.push(format!(
                "Item count mismatch: metadata says {}, payload has {}",
                metadata.item_count,
                records.len()
            ));
        }
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.key.as_str()) {
                report.issues.push(format!("Duplicate key {}", record.key));
            }
        }

        if metadata.incremental {
            match metadata.base_backup.as_deref() {
                None => report
                    .issues
                    .push("Incremental backup has no base".to_string()),
                Some(base_id) => match self.metadata(base_id) {
                    Ok(base) if base.incremental => report
                        .issues
                        .push(format!("Base backup {} is itself incremental", base_id)),
                    Ok(_) => {}
                    Err(StashError::NotFound(_)) => report
                        .warnings
                        .push(format!("Base backup {} is missing", base_id)),
                    Err(err) => return Err(err),
                },
            }
        }

        debug!(
            id = %metadata.id,
            issues = report.issues.len(),
            warnings = report.warnings.len(),
            "Backup verified"
        );
        Ok((report, records))
    }

    fn read_for_restore(&self, metadata: &BackupMetadata) -> Result<Vec<ExportRecord>> {
        let (report, records) = self.read_verified(metadata)?;
        if !report.is_valid() {
            return Err(StashError::Validation(format!(
                "Backup {} failed verification: {}",
                metadata.id,
                report.issues.join("; ")
            )));
        }
        Ok(records)
    }

    /// Restore `id` into the store. The backup is verified first; an
    /// incremental backup is applied on top of its base.
    #[tracing::instrument(skip(self, options), fields(dry_run = options.dry_run))]
    pub fn restore(&self, id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        let metadata = self.metadata(id)?;
        let mut records = self.read_for_restore(&metadata)?;

        if metadata.incremental {
            let base_id = metadata.base_backup.as_deref().ok_or_else(|| {
                StashError::Validation(format!("Incremental backup {} has no base", id))
            })?;
            let base = self.metadata(base_id)?;
            let mut merged: BTreeMap<String, ExportRecord> = self
                .read_for_restore(&base)?
                .into_iter()
                .map(|record| (record.key.clone(), record))
                .collect();
            for record in records {
                merged.insert(record.key.clone(), record);
            }
            records = merged.into_values().collect();
        }

        if let Some(filter) = &options.filter {
            records.retain(|record| filter.matches(record));
        }

        let mut report = RestoreReport {
            backup_id: id.to_string(),
            dry_run: options.dry_run,
            ..Default::default()
        };
        let mut ops = Vec::with_capacity(records.len());
        let mut planned: HashSet<String> = HashSet::new();
        let mut overwrites_existing = false;

        for record in records {
            let exists = self.stash.contains(&record.key)?;
            let target = if !exists || options.overwrite {
                overwrites_existing |= exists;
                Some(record.key.clone())
            } else if options.merge {
                match options.conflict_resolution {
                    ConflictResolution::Skip => {
                        report.skipped += 1;
                        None
                    }
                    ConflictResolution::Overwrite => {
                        overwrites_existing = true;
                        Some(record.key.clone())
                    }
                    ConflictResolution::Rename => {
                        let renamed = self.rename_target(&record.key, &planned)?;
                        report.renamed.push((record.key.clone(), renamed.clone()));
                        Some(renamed)
                    }
                }
            } else {
                report.conflicts.push(record.key.clone());
                None
            };

            if let Some(key) = target {
                planned.insert(key.clone());
                let mut tags = record.tags;
                tags.extend(record.metadata.tags);
                ops.push(BulkOp::Set {
                    key,
                    value: record.value,
                    tags,
                });
            }
        }
        report.restored = ops.len();

        if options.dry_run || ops.is_empty() {
            return Ok(report);
        }

        if overwrites_existing && self.config.auto_backup {
            report.pre_restore_backup = Some(self.create_backup()?.id);
        }
        self.stash.bulk(&ops)?;

        info!(
            id,
            restored = report.restored,
            skipped = report.skipped,
            renamed = report.renamed.len(),
            conflicts = report.conflicts.len(),
            "Backup restored"
        );
        Ok(report)
    }

    fn rename_target(&self, key: &str, planned: &HashSet<String>) -> Result<String> {
        let mut n = 1;
        loop {
            let candidate = format!("{}_restored_{}", key, n);
            if !planned.contains(&candidate) && !self.stash.contains(&candidate)? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Take a full backup every `interval`. Failures are logged and the
    /// next run proceeds as scheduled.
    pub fn schedule(self: &Arc<Self>, scheduler: &Scheduler, interval: Duration) -> Result<TaskHandle> {
        let manager = Arc::clone(self);
        scheduler.every("backup", interval, move || {
            let manager = Arc::clone(&manager);
            async move {
                match tokio::task::spawn_blocking(move || manager.create_backup()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => warn!(error = %err, "Scheduled backup failed"),
                    Err(err) => warn!(error = %err, "Scheduled backup task panicked"),
                }
            }
        })
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("config", &self.config)
            .finish()
    }
}
