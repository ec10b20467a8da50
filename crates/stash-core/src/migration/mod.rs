//! Ordered schema migrations.
//!
//! The store keeps a persisted schema-version counter next to a record of
//! every applied migration. [`MigrationManager::migrate`] applies pending
//! steps in ascending order and advances the counter after each success,
//! so a failure part-way leaves the store at the last successful version.
//! [`MigrationManager::rollback`] runs `down` steps in descending order.

mod definition;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backup::BackupManager;
use crate::error::{Result, StashError};
use crate::events::{MigrationDirection, StashEvent};
use crate::storage::types::AppliedMigrationRecord;
use crate::storage::Stash;

pub use definition::{Migration, MigrationFn};

/// Options for [`MigrationManager::migrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateOptions {
    /// Highest version to apply; defaults to the highest registered
    pub target: Option<u32>,
    /// Report the plan without running anything
    pub dry_run: bool,
    /// Take a full backup before the first step
    pub backup: bool,
    /// Keep going past failed steps; they stay pending
    pub continue_on_error: bool,
}

/// Options for [`MigrationManager::rollback`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOptions {
    pub dry_run: bool,
    /// Take a full backup before the first step, even when automatic
    /// backups are off
    pub backup: bool,
}

/// A registered migration not yet applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMigration {
    pub version: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub current_version: u32,
    pub target_version: u32,
    pub applied: Vec<AppliedMigrationRecord>,
    /// Ascending by version
    pub pending: Vec<PendingMigration>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFailure {
    pub version: u32,
    pub message: String,
}

/// Outcome of a migrate or rollback run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub direction: MigrationDirection,
    pub from_version: u32,
    pub to_version: u32,
    /// Versions selected for this run, in execution order
    pub planned: Vec<u32>,
    /// Versions that completed, in execution order
    pub completed: Vec<u32>,
    pub failed: Vec<MigrationFailure>,
    pub dry_run: bool,
    /// Backup taken before the first step
    pub backup_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Registry and runner for [`Migration`]s.
pub struct MigrationManager {
    stash: Arc<Stash>,
    migrations: BTreeMap<u32, Migration>,
    backups: Option<Arc<BackupManager>>,
}

impl MigrationManager {
    pub fn new(stash: Arc<Stash>) -> Self {
        Self {
            stash,
            migrations: BTreeMap::new(),
            backups: None,
        }
    }

    /// Enable pre-migration and pre-rollback backups.
    pub fn with_backups(mut self, backups: Arc<BackupManager>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Register a migration. Versions start at 1 and must be unique.
    pub fn register(&mut self, migration: Migration) -> Result<()> {
        if migration.version == 0 {
            return Err(StashError::Validation(
                "Migration versions start at 1".to_string(),
            ));
        }
        if self.migrations.contains_key(&migration.version) {
            return Err(StashError::Validation(format!(
                "Duplicate migration version {}",
                migration.version
            )));
        }
        self.migrations.insert(migration.version, migration);
        Ok(())
    }

    /// Registered migrations, ascending.
    pub fn migrations(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    /// Compare applied records against registered migrations up to
    /// `target` (default: the highest registered version).
    pub fn status(&self, target: Option<u32>) -> Result<MigrationStatus> {
        let current_version = self.stash.schema_version()?;
        let applied = self.stash.applied_migrations()?;
        let target_version = target.unwrap_or_else(|| {
            self.migrations
                .keys()
                .next_back()
                .copied()
                .unwrap_or(current_version)
        });

        let pending = self
            .migrations
            .values()
            .filter(|m| m.version <= target_version)
            .filter(|m| !applied.iter().any(|record| record.version == m.version))
            .map(|m| PendingMigration {
                version: m.version,
                description: m.description.clone(),
            })
            .collect();

        Ok(MigrationStatus {
            current_version,
            target_version,
            applied,
            pending,
        })
    }

    /// Check the registry for structural problems.
    ///
    /// Missing `up`/`down` bodies and applied migrations whose definition
    /// changed are errors; version gaps and applied versions that are no
    /// longer registered are warnings.
    pub fn validate(&self) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();

        let mut expected = 1;
        for migration in self.migrations.values() {
            if !migration.has_up() {
                report
                    .errors
                    .push(format!("Migration {} has no up step", migration.version));
            }
            if !migration.has_down() {
                report
                    .errors
                    .push(format!("Migration {} has no down step", migration.version));
            }
            if migration.version != expected {
                report.warnings.push(format!(
                    "Gap in migration versions: expected {}, found {}",
                    expected, migration.version
                ));
            }
            expected = migration.version + 1;
        }

        for record in self.stash.applied_migrations()? {
            match self.migrations.get(&record.version) {
                Some(migration) if migration.checksum() != record.checksum => {
                    report.errors.push(format!(
                        "Migration {} changed since it was applied",
                        record.version
                    ));
                }
                Some(_) => {}
                None => report.warnings.push(format!(
                    "Applied migration {} is not registered",
                    record.version
                )),
            }
        }

        Ok(report)
    }

    /// Apply pending migrations in ascending order.
    ///
    /// Without `continue_on_error`, the first failing step aborts the run
    /// with `StashError::Migration`; steps before it stay applied.
    #[tracing::instrument(skip(self))]
    pub fn migrate(&self, options: MigrateOptions) -> Result<MigrationReport> {
        let validation = self.validate()?;
        if !validation.is_valid() {
            return Err(StashError::Validation(validation.errors.join("; ")));
        }
        for warning in &validation.warnings {
            warn!(%warning, "Migration registry warning");
        }

        let status = self.status(options.target)?;
        let mut report = MigrationReport {
            direction: MigrationDirection::Up,
            from_version: status.current_version,
            to_version: status.current_version,
            planned: status.pending.iter().map(|p| p.version).collect(),
            completed: Vec::new(),
            failed: Vec::new(),
            dry_run: options.dry_run,
            backup_id: None,
        };
        if options.dry_run || report.planned.is_empty() {
            return Ok(report);
        }

        if options.backup {
            report.backup_id = Some(self.backup_before("migrate")?);
        }

        for version in report.planned.clone() {
            let Some(migration) = self.migrations.get(&version) else {
                continue;
            };
            match self.apply(migration) {
                Ok(()) => report.completed.push(version),
                Err(err) if options.continue_on_error => {
                    warn!(version, error = %err, "Migration failed; continuing");
                    report.failed.push(MigrationFailure {
                        version,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(version, error = %err, "Migration failed; stopping");
                    return Err(err);
                }
            }
        }

        report.to_version = self.stash.schema_version()?;
        info!(
            from = report.from_version,
            to = report.to_version,
            applied = report.completed.len(),
            failed = report.failed.len(),
            "Migrations complete"
        );
        Ok(report)
    }

    /// Roll back applied migrations above `target`, highest first,
    /// stopping at the first failure.
    #[tracing::instrument(skip(self))]
    pub fn rollback(&self, target: u32, options: RollbackOptions) -> Result<MigrationReport> {
        let current_version = self.stash.schema_version()?;
        let mut to_revert: Vec<u32> = self
            .stash
            .applied_migrations()?
            .into_iter()
            .map(|record| record.version)
            .filter(|version| *version > target)
            .collect();
        to_revert.sort_unstable_by(|a, b| b.cmp(a));

        let mut report = MigrationReport {
            direction: MigrationDirection::Down,
            from_version: current_version,
            to_version: current_version,
            planned: to_revert,
            completed: Vec::new(),
            failed: Vec::new(),
            dry_run: options.dry_run,
            backup_id: None,
        };
        if options.dry_run || report.planned.is_empty() {
            return Ok(report);
        }

        let auto_backup = self
            .backups
            .as_ref()
            .is_some_and(|backups| backups.config().auto_backup);
        if options.backup || auto_backup {
            report.backup_id = Some(self.backup_before("rollback")?);
        }

        for version in report.planned.clone() {
            let migration = self.migrations.get(&version).ok_or_else(|| StashError::Migration {
                version,
                message: "Not registered; cannot roll back".to_string(),
            })?;
            let started = Instant::now();
            if let Err(err) = migration.run(MigrationDirection::Down, &self.stash) {
                warn!(version, error = %err, "Rollback failed; stopping");
                return Err(err);
            }
            self.stash.remove_migration(version)?;
            self.stash.events().emit(StashEvent::MigrationApplied {
                version,
                direction: MigrationDirection::Down,
            });
            info!(
                version,
                duration_ms = started.elapsed().as_millis() as u64,
                "Rolled back migration"
            );
            report.completed.push(version);
        }

        report.to_version = self.stash.schema_version()?;
        Ok(report)
    }

    fn apply(&self, migration: &Migration) -> Result<()> {
        let started = Instant::now();
        migration.run(MigrationDirection::Up, &self.stash)?;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.stash.record_migration(&AppliedMigrationRecord {
            version: migration.version,
            description: migration.description.clone(),
            applied_at: Utc::now(),
            duration_ms,
            checksum: migration.checksum(),
        })?;
        self.stash.events().emit(StashEvent::MigrationApplied {
            version: migration.version,
            direction: MigrationDirection::Up,
        });
        info!(
            version = migration.version,
            description = %migration.description,
            duration_ms,
            "Applied migration"
        );
        Ok(())
    }

    fn backup_before(&self, operation: &str) -> Result<String> {
        let backups = self.backups.as_ref().ok_or_else(|| {
            StashError::InvalidInput(format!(
                "A backup before {} was requested but no backup manager is configured",
                operation
            ))
        })?;
        Ok(backups.create_backup()?.id)
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("migrations", &self.migrations.keys().collect::<Vec<_>>())
            .field("backups", &self.backups.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StashConfig;
    use crate::storage::keystore::MemoryKeystore;
    use serde_json::json;
    use std::sync::Mutex;

    fn stash() -> Arc<Stash> {
        Arc::new(Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new()).unwrap())
    }

    /// A migration that logs its runs into `log`.
    fn logged(version: u32, log: &Arc<Mutex<Vec<String>>>) -> Migration {
        let up_log = Arc::clone(log);
        let down_log = Arc::clone(log);
        Migration::new(
            version,
            format!("step {}", version),
            move |_| {
                up_log.lock().unwrap().push(format!("up{}", version));
                Ok(())
            },
            move |_| {
                down_log.lock().unwrap().push(format!("down{}", version));
                Ok(())
            },
        )
    }

    fn failing(version: u32) -> Migration {
        Migration::new(
            version,
            "broken",
            move |_| Err(StashError::Validation("boom".to_string())),
            |_| Ok(()),
        )
    }

    #[test]
    fn test_register_rejects_duplicates_and_zero() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new(stash());
        manager.register(logged(1, &log)).unwrap();
        assert!(matches!(
            manager.register(logged(1, &log)),
            Err(StashError::Validation(_))
        ));
        assert!(matches!(
            manager.register(logged(0, &log)),
            Err(StashError::Validation(_))
        ));
    }

    #[test]
    fn test_migrate_and_rollback_sequence() {
        let stash = stash();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new(Arc::clone(&stash));
        for version in [3, 1, 2] {
            manager.register(logged(version, &log)).unwrap();
        }

        let report = manager.migrate(MigrateOptions::default()).unwrap();
        assert_eq!(report.completed, vec![1, 2, 3]);
        assert_eq!(report.to_version, 3);
        assert_eq!(stash.schema_version().unwrap(), 3);

        let report = manager.rollback(1, RollbackOptions::default()).unwrap();
        assert_eq!(report.completed, vec![3, 2]);
        assert_eq!(stash.schema_version().unwrap(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["up1", "up2", "up3", "down3", "down2"]
        );

        let status = manager.status(None).unwrap();
        let pending: Vec<u32> = status.pending.iter().map(|p| p.version).collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[test]
    fn test_failure_stops_at_last_success() {
        let stash = stash();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new(Arc::clone(&stash));
        manager.register(logged(1, &log)).unwrap();
        manager.register(failing(2)).unwrap();
        manager.register(logged(3, &log)).unwrap();

        let err = manager.migrate(MigrateOptions::default()).unwrap_err();
        assert!(matches!(err, StashError::Migration { version: 2, .. }));
        assert_eq!(stash.schema_version().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["up1"]);
    }

    #[test]
    fn test_continue_on_error_leaves_failed_step_pending() {
        let stash = stash();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new(Arc::clone(&stash));
        manager.register(logged(1, &log)).unwrap();
        manager.register(failing(2)).unwrap();
        manager.register(logged(3, &log)).unwrap();

        let report = manager
            .migrate(MigrateOptions {
                continue_on_error: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.completed, vec![1, 3]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].version, 2);
        assert_eq!(stash.schema_version().unwrap(), 3);

        let status = manager.status(None).unwrap();
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].version, 2);
    }

    #[test]
    fn test_dry_run_and_target() {
        let stash = stash();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new(Arc::clone(&stash));
        for version in 1..=3 {
            manager.register(logged(version, &log)).unwrap();
        }

        let report = manager
            .migrate(MigrateOptions {
                target: Some(2),
                dry_run: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.planned, vec![1, 2]);
        assert!(report.completed.is_empty());
        assert!(log.lock().unwrap().is_empty());

        manager
            .migrate(MigrateOptions {
                target: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stash.schema_version().unwrap(), 2);
    }

    #[test]
    fn test_validate_reports_missing_steps_and_gaps() {
        let mut manager = MigrationManager::new(stash());
        manager
            .register(Migration::from_parts(
                1,
                "no down",
                Some(Box::new(|_: &Stash| -> Result<()> { Ok(()) }) as MigrationFn),
                None,
            ))
            .unwrap();
        manager
            .register(Migration::new(4, "gap", |_| Ok(()), |_| Ok(())))
            .unwrap();

        let report = manager.validate().unwrap();
        assert_eq!(report.errors, vec!["Migration 1 has no down step".to_string()]);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            manager.migrate(MigrateOptions::default()),
            Err(StashError::Validation(_))
        ));
    }

    #[test]
    fn test_typed_migration_rewrites_matching_records() {
        #[derive(Debug, serde::Serialize, serde::Deserialize)]
        struct UserV1 {
            name: String,
        }
        #[derive(Debug, serde::Serialize, serde::Deserialize)]
        struct UserV2 {
            first: String,
            last: String,
        }

        let stash = stash();
        stash.set("user:1", json!({"name": "Ada Lovelace"}), &["people"]).unwrap();
        stash.set("other", json!(42), &[] as &[&str]).unwrap();

        let mut manager = MigrationManager::new(Arc::clone(&stash));
        manager
            .register(Migration::typed(
                1,
                "split names",
                "user:",
                |old: UserV1| {
                    let (first, last) = old.name.split_once(' ').unwrap_or((old.name.as_str(), ""));
                    UserV2 {
                        first: first.to_string(),
                        last: last.to_string(),
                    }
                },
                |new: UserV2| UserV1 {
                    name: format!("{} {}", new.first, new.last),
                },
            ))
            .unwrap();

        manager.migrate(MigrateOptions::default()).unwrap();
        assert_eq!(
            stash.get("user:1").unwrap(),
            Some(json!({"first": "Ada", "last": "Lovelace"}))
        );
        assert_eq!(stash.get("other").unwrap(), Some(json!(42)));
        assert!(stash.get_item("user:1").unwrap().unwrap().metadata.tags.contains("people"));

        manager.rollback(0, RollbackOptions::default()).unwrap();
        assert_eq!(stash.get("user:1").unwrap(), Some(json!({"name": "Ada Lovelace"})));
    }

    #[test]
    fn test_typed_migration_rejects_mismatched_shape() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Counter {
            count: u64,
        }

        let stash = stash();
        stash.set("c:1", json!({"count": 1}), &[] as &[&str]).unwrap();
        stash.set("c:2", json!("not a counter"), &[] as &[&str]).unwrap();

        let mut manager = MigrationManager::new(Arc::clone(&stash));
        manager
            .register(Migration::typed(
                1,
                "double",
                "c:",
                |c: Counter| Counter { count: c.count * 2 },
                |c: Counter| Counter { count: c.count / 2 },
            ))
            .unwrap();

        let err = manager.migrate(MigrateOptions::default()).unwrap_err();
        assert!(matches!(err, StashError::Migration { version: 1, .. }));
        assert_eq!(stash.get("c:1").unwrap(), Some(json!({"count": 1})));
        assert_eq!(stash.schema_version().unwrap(), 0);
    }

    #[test]
    fn test_backup_requested_without_manager() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new(stash());
        manager.register(logged(1, &log)).unwrap();
        let result = manager.migrate(MigrateOptions {
            backup: true,
            ..Default::default()
        });
        assert!(matches!(result, Err(StashError::InvalidInput(_))));
        assert!(log.lock().unwrap().is_empty());
    }
}
