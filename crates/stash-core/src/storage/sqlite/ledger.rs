//! Version ledger: append-only snapshots of prior item states.
//!
//! Every overwrite and delete appends the item's state as it was before the
//! mutation. Snapshots keep the persisted (codec-transformed) bytes so
//! encryption at rest covers history too. Each key keeps at most
//! `max_versions` snapshots, oldest discarded first.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::row::{format_timestamp, ItemRow, VersionRow};
use crate::error::Result;

const VERSION_COLUMNS: &str = "key, version, recorded_at, value, metadata_json";

/// Snapshot `row` into the ledger.
pub fn append(conn: &Connection, row: &ItemRow, recorded_at: &DateTime<Utc>) -> Result<()> {
    let metadata_json = serde_json::to_string(&row.metadata()?)?;
    conn.execute(
        "INSERT OR REPLACE INTO item_versions (key, version, recorded_at, value, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            row.key,
            row.version,
            format_timestamp(recorded_at),
            row.value,
            metadata_json
        ],
    )?;
    Ok(())
}

/// Highest version ever recorded for `key`, if any.
pub fn max_version(conn: &Connection, key: &str) -> Result<Option<u64>> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM item_versions WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(max.and_then(|v| u64::try_from(v).ok()))
}

/// Drop the oldest snapshots of `key` beyond `keep`.
pub fn prune(conn: &Connection, key: &str, keep: usize) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM item_versions
         WHERE key = ?1 AND version NOT IN (
             SELECT version FROM item_versions WHERE key = ?1
             ORDER BY version DESC LIMIT ?2
         )",
        params![key, keep as i64],
    )?;
    Ok(removed)
}

/// Prune every key down to `keep` snapshots.
pub fn prune_all(conn: &Connection, keep: usize) -> Result<usize> {
    let keys = {
        let mut stmt = conn.prepare("SELECT DISTINCT key FROM item_versions")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    let mut removed = 0;
    for key in keys {
        removed += prune(conn, &key, keep)?;
    }
    Ok(removed)
}

/// All retained snapshots of `key`, oldest first.
pub fn list(conn: &Connection, key: &str) -> Result<Vec<VersionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM item_versions WHERE key = ?1 ORDER BY version ASC",
        VERSION_COLUMNS
    ))?;
    let rows = stmt.query_map([key], VersionRow::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn get(conn: &Connection, key: &str, version: u64) -> Result<Option<VersionRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM item_versions WHERE key = ?1 AND version = ?2",
                VERSION_COLUMNS
            ),
            params![key, version as i64],
            VersionRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Remove every snapshot of `key`.
pub fn purge(conn: &Connection, key: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM item_versions WHERE key = ?1", [key])?)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM item_versions", [], |row| row.get(0))?;
    Ok(count as u64)
}
