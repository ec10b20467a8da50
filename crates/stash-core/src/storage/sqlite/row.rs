//! Row types for item and ledger queries.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;

use crate::error::{Result, StashError};
use crate::storage::types::ItemMetadata;

/// Column list matching [`ItemRow::from_row`].
pub const ITEM_COLUMNS: &str =
    "key, value, created_at, updated_at, version, size, encrypted, compressed, tags_json";

/// Format a timestamp the way every table stores it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| StashError::Storage(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc))
}

/// Raw row from the `items` table, before decoding the value.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub key: String,
    pub value: Vec<u8>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
    pub size: i64,
    pub encrypted: bool,
    pub compressed: bool,
    pub tags_json: Option<String>,
}

impl ItemRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            version: row.get(4)?,
            size: row.get(5)?,
            encrypted: row.get(6)?,
            compressed: row.get(7)?,
            tags_json: row.get(8)?,
        })
    }

    pub fn metadata(&self) -> Result<ItemMetadata> {
        let tags: BTreeSet<String> = match self.tags_json {
            Some(ref value) => serde_json::from_str(value)
                .map_err(|e| StashError::Storage(format!("Invalid tags JSON: {}", e)))?,
            None => BTreeSet::new(),
        };
        Ok(ItemMetadata {
            created: parse_timestamp(&self.created_at)?,
            updated: parse_timestamp(&self.updated_at)?,
            version: u64::try_from(self.version)
                .map_err(|_| StashError::Storage(format!("Invalid version for {}", self.key)))?,
            size: u64::try_from(self.size)
                .map_err(|_| StashError::Storage(format!("Invalid size for {}", self.key)))?,
            encrypted: self.encrypted,
            compressed: self.compressed,
            tags,
        })
    }

    /// Record view without the value, for fast-path query evaluation.
    pub fn view_without_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "key": self.key,
            "metadata": serde_json::to_value(self.metadata()?)?,
        }))
    }
}

/// Raw row from the `item_versions` table.
#[derive(Debug, Clone)]
pub struct VersionRow {
    pub key: String,
    pub version: i64,
    pub recorded_at: String,
    pub value: Vec<u8>,
    pub metadata_json: String,
}

impl VersionRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            version: row.get(1)?,
            recorded_at: row.get(2)?,
            value: row.get(3)?,
            metadata_json: row.get(4)?,
        })
    }

    pub fn metadata(&self) -> Result<ItemMetadata> {
        serde_json::from_str(&self.metadata_json)
            .map_err(|e| StashError::Storage(format!("Invalid snapshot metadata: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tags_json: Option<&str>) -> ItemRow {
        let now = format_timestamp(&Utc::now());
        ItemRow {
            key: "k".to_string(),
            value: b"1".to_vec(),
            created_at: now.clone(),
            updated_at: now,
            version: 4,
            size: 1,
            encrypted: false,
            compressed: false,
            tags_json: tags_json.map(String::from),
        }
    }

    #[test]
    fn test_metadata_parses_tags() {
        let metadata = row(Some(r#"["x","y"]"#)).metadata().unwrap();
        assert_eq!(metadata.version, 4);
        assert!(metadata.tags.contains("x"));
        assert!(row(None).metadata().unwrap().tags.is_empty());
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let mut bad = row(None);
        bad.created_at = "yesterday".to_string();
        assert!(bad.metadata().is_err());
    }

    #[test]
    fn test_timestamp_round_trip_keeps_nanos() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(&format_timestamp(&now)).unwrap(), now);
    }
}
