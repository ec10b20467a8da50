//! Stats, export/import, vacuum and migration bookkeeping for [`Stash`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, info};

use super::row::{format_timestamp, parse_timestamp};
use super::{ledger, load_all_rows, Stash};
use crate::error::{Result, StashError};
use crate::storage::types::{
    AppliedMigrationRecord, BulkOp, ExportRecord, Item, StashStats, VacuumReport,
};

/// Header row of the CSV export.
pub const CSV_HEADER: &str = "key,value,created,updated,tags";

impl Stash {
    /// Aggregate counts and sizes.
    pub fn stats(&self) -> Result<StashStats> {
        let conn = self.lock_conn()?;
        let (item_count, total_size, encrypted_items, compressed_items): (i64, i64, i64, i64) =
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(size), 0),
                        COALESCE(SUM(encrypted), 0),
                        COALESCE(SUM(compressed), 0)
                 FROM items",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let version_count = ledger::count(&conn)?;
        let schema_version = read_schema_version(&conn)?;

        Ok(StashStats {
            item_count: item_count.max(0) as u64,
            version_count,
            total_size: total_size.max(0) as u64,
            encrypted_items: encrypted_items.max(0) as u64,
            compressed_items: compressed_items.max(0) as u64,
            quota_limit: self.quota.config().max_bytes,
            quota_used_percent: self.quota.used_percent(),
            schema_version,
        })
    }

    /// Remove every active item. Returns the number of items removed.
    ///
    /// Each item gets a final ledger snapshot, as with [`Stash::delete`], and
    /// its history is kept until [`Stash::purge_history`]. Migration
    /// bookkeeping is kept.
    pub fn clear(&self) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let rows = load_all_rows(&tx)?;
        for row in &rows {
            ledger::append(&tx, row, &now)?;
            ledger::prune(&tx, &row.key, self.config.max_versions)?;
        }
        let removed = tx.execute("DELETE FROM items", [])?;
        tx.commit()?;
        self.quota.commit(0, &self.events);
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        info!(removed, "Cleared stash");
        Ok(removed)
    }

    /// Re-apply ledger retention to every key and compact the database file.
    pub fn vacuum(&self) -> Result<VacuumReport> {
        let conn = self.lock_conn()?;
        let versions_removed = ledger::prune_all(&conn, self.config.max_versions)?;
        conn.execute_batch("VACUUM")?;
        debug!(versions_removed, "Vacuumed stash");
        Ok(VacuumReport { versions_removed })
    }

    /// Items whose current version was written strictly after `since`.
    pub fn items_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<Item>> {
        Ok(self
            .items()?
            .into_iter()
            .filter(|item| item.metadata.updated > since)
            .collect())
    }

    pub fn export_records(&self) -> Result<Vec<ExportRecord>> {
        Ok(self.items()?.into_iter().map(ExportRecord::from).collect())
    }

    /// Pretty-printed JSON array of [`ExportRecord`]s.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_records()?)?)
    }

    /// CSV with one row per item. Values are compact JSON and tags are
    /// joined with `;`.
    pub fn export_csv(&self) -> Result<String> {
        let mut out = String::from(CSV_HEADER);
        out.push('\n');
        for item in self.items()? {
            let tags: Vec<&str> = item.metadata.tags.iter().map(String::as_str).collect();
            let fields = [
                item.key.clone(),
                serde_json::to_string(&item.value)?,
                format_timestamp(&item.metadata.created),
                format_timestamp(&item.metadata.updated),
                tags.join(";"),
            ];
            let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        Ok(out)
    }

    /// Write every record as a new version of its key, all-or-nothing.
    ///
    /// Record metadata is informational: versions and timestamps are
    /// assigned fresh. Tags are the union of `tags` and `metadata.tags`.
    pub fn import_records(&self, records: &[ExportRecord]) -> Result<usize> {
        let ops: Vec<BulkOp> = records
            .iter()
            .map(|record| {
                let tags: BTreeSet<String> = record
                    .tags
                    .iter()
                    .chain(record.metadata.tags.iter())
                    .cloned()
                    .collect();
                BulkOp::Set {
                    key: record.key.clone(),
                    value: record.value.clone(),
                    tags: tags.into_iter().collect(),
                }
            })
            .collect();
        let results = self.bulk(&ops)?;
        info!(imported = results.len(), "Imported records");
        Ok(results.len())
    }

    /// Import the output of [`Stash::export_json`].
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let records: Vec<ExportRecord> = serde_json::from_str(json)
            .map_err(|e| StashError::InvalidInput(format!("Invalid export JSON: {}", e)))?;
        self.import_records(&records)
    }

    // --- Migration bookkeeping ---

    /// Highest applied migration version, or 0.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.lock_conn()?;
        read_schema_version(&conn)
    }

    /// Applied migrations, ascending by version.
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigrationRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT version, description, applied_at, duration_ms, checksum
             FROM applied_migrations ORDER BY version ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (version, description, applied_at, duration_ms, checksum) = row?;
            records.push(AppliedMigrationRecord {
                version: u32::try_from(version)
                    .map_err(|_| StashError::Storage(format!("Invalid migration version {}", version)))?,
                description,
                applied_at: parse_timestamp(&applied_at)?,
                duration_ms: duration_ms.max(0) as u64,
                checksum,
            });
        }
        Ok(records)
    }

    /// Record a migration as applied and advance the schema version to the
    /// highest applied version.
    pub(crate) fn record_migration(&self, record: &AppliedMigrationRecord) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO applied_migrations
             (version, description, applied_at, duration_ms, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.version,
                record.description,
                format_timestamp(&record.applied_at),
                record.duration_ms as i64,
                record.checksum,
            ],
        )?;
        sync_schema_version(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Forget an applied migration. The schema version becomes the highest
    /// remaining applied version.
    pub(crate) fn remove_migration(&self, version: u32) -> Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM applied_migrations WHERE version = ?1",
            [version],
        )?;
        sync_schema_version(&tx)?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

fn read_schema_version(conn: &rusqlite::Connection) -> Result<u32> {
    let value: String = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    value
        .parse()
        .map_err(|_| StashError::Storage(format!("Invalid schema version: {}", value)))
}

fn sync_schema_version(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute(
        "UPDATE meta SET value = (SELECT CAST(COALESCE(MAX(version), 0) AS TEXT) FROM applied_migrations)
         WHERE key = 'schema_version'",
        [],
    )?;
    Ok(())
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
