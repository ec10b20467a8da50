//! SQLite-backed item store.
//!
//! [`Stash`] is the engine: it owns one SQLite connection behind a mutex,
//! the codec pipeline, the quota monitor and an optional value cache. Every
//! mutation runs inside a SQLite transaction that also appends the version
//! ledger snapshot, so a failed write leaves no partial state behind.

mod ledger;
mod maintenance;
mod row;
mod validation;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::ValueCache;
use crate::codec::Codec;
use crate::config::StashConfig;
use crate::crypto::DataKey;
use crate::error::{Result, StashError};
use crate::events::{EventBus, StashEvent};
use crate::query::{CompiledQuery, Query, QueryResult};
use crate::quota::QuotaMonitor;
use crate::storage::traits::SecretStore;
use crate::storage::types::{BulkOp, BulkResult, Item, ItemMetadata, VersionRecord};

use row::{format_timestamp, parse_timestamp, ItemRow, VersionRow, ITEM_COLUMNS};
use validation::{normalize_tags, validate_key, validate_value_size};

pub use validation::{MAX_KEY_BYTES, MAX_TAGS_PER_ITEM, MAX_TAG_BYTES, MAX_VALUE_BYTES};

/// Name of the data-encryption key in the secret store.
pub const DATA_KEY_SECRET: &str = "stash.data-key";

/// On-disk format version written to the `meta` table.
pub const FORMAT_VERSION: &str = "1";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS items (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        version INTEGER NOT NULL,
        size INTEGER NOT NULL,
        encrypted INTEGER NOT NULL DEFAULT 0,
        compressed INTEGER NOT NULL DEFAULT 0,
        tags_json TEXT
    );

    -- Version ledger (append-only, pruned per key)
    CREATE TABLE IF NOT EXISTS item_versions (
        key TEXT NOT NULL,
        version INTEGER NOT NULL,
        recorded_at TEXT NOT NULL,
        value BLOB NOT NULL,
        metadata_json TEXT NOT NULL,

        UNIQUE(key, version)
    );

    CREATE TABLE IF NOT EXISTS applied_migrations (
        version INTEGER PRIMARY KEY,
        description TEXT NOT NULL,
        applied_at TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        checksum TEXT NOT NULL
    );
"#;

/// The versioned key-value engine.
///
/// Construct one explicitly and share it as `Arc<Stash>`; there is no
/// global instance. Operations are serialized on the internal connection
/// lock.
pub struct Stash {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    codec: Codec,
    config: StashConfig,
    quota: QuotaMonitor,
    cache: Option<ValueCache>,
    events: EventBus,
}

impl Stash {
    /// Open (or create) a store at `path`.
    ///
    /// The data key is read from `secrets`; when encryption is enabled and
    /// no key exists yet, a fresh one is generated and stored there.
    pub fn open(path: &Path, config: StashConfig, secrets: &dyn SecretStore) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn, Some(path.to_path_buf()), config, secrets)
    }

    /// Open a throwaway store held entirely in memory.
    pub fn open_in_memory(config: StashConfig, secrets: &dyn SecretStore) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, None, config, secrets)
    }

    fn with_connection(
        conn: Connection,
        path: Option<PathBuf>,
        config: StashConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let created_at = format_timestamp(&Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('format_version', ?1)",
            [FORMAT_VERSION],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '0')",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('created_at', ?1)",
            [&created_at],
        )?;

        let format_version: String = conn.query_row(
            "SELECT value FROM meta WHERE key = 'format_version'",
            [],
            |row| row.get(0),
        )?;
        if format_version != FORMAT_VERSION {
            return Err(StashError::Storage(format!(
                "Unsupported store format version: {}",
                format_version
            )));
        }

        let key = load_data_key(secrets, config.codec.encrypt)?;
        let used: i64 =
            conn.query_row("SELECT COALESCE(SUM(size), 0) FROM items", [], |row| row.get(0))?;

        debug!(
            path = ?path,
            encrypt = config.codec.encrypt,
            compress = config.codec.compress,
            used,
            "Opened stash"
        );

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            codec: Codec::new(config.codec, key),
            quota: QuotaMonitor::new(config.quota, used.max(0) as u64),
            cache: config.cache.map(ValueCache::new),
            config,
            events: EventBus::new(),
        })
    }

    /// Lock the database connection, returning an error if the mutex is poisoned.
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StashError::Storage("SQLite connection poisoned".to_string()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    pub fn quota(&self) -> &QuotaMonitor {
        &self.quota
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StashEvent> {
        self.events.subscribe()
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    // --- Item operations ---

    /// Create or overwrite `key`.
    ///
    /// The prior state, if any, is snapshotted into the version ledger and
    /// the new record gets the next version number. Fails with
    /// `QuotaExceeded` without touching the store if the write would push
    /// usage past the configured maximum.
    pub fn set<S: AsRef<str>>(
        &self,
        key: &str,
        value: serde_json::Value,
        tags: &[S],
    ) -> Result<ItemMetadata> {
        let tags = normalize_tags(tags)?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        // Quota and cache are updated before the guard is released.
        let mut total = self.quota.used();
        let metadata = self.put_in_tx(&tx, key, &value, tags, &mut total, Utc::now())?;
        tx.commit()?;
        self.quota.commit(total, &self.events);
        if let Some(cache) = &self.cache {
            cache.insert(key, value, metadata.size);
        }
        debug!(key, version = metadata.version, size = metadata.size, "Item stored");
        Ok(metadata)
    }

    /// Serialize `value` and store it without tags.
    pub fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<ItemMetadata> {
        self.set::<&str>(key, serde_json::to_value(value)?, &[])
    }

    /// Decoded value of `key`, or `None` if absent.
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let Some(cache) = &self.cache else {
            return Ok(self.get_item(key)?.map(|item| item.value));
        };
        if let Some(value) = cache.get(key) {
            return Ok(Some(value));
        }

        // Filled under the connection lock so a concurrent write cannot be
        // replaced by the value read here.
        let conn = self.lock_conn()?;
        let Some(row) = load_row(&conn, key)? else {
            return Ok(None);
        };
        let item = self.decode_row(&row)?;
        cache.insert(key, item.value.clone(), item.metadata.size);
        Ok(Some(item.value))
    }

    /// Value and metadata of `key`.
    pub fn get_item(&self, key: &str) -> Result<Option<Item>> {
        let row = {
            let conn = self.lock_conn()?;
            load_row(&conn, key)?
        };
        row.map(|row| self.decode_row(&row)).transpose()
    }

    /// Decode the value of `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM items WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// All active keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key FROM items ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All active items with decoded values, sorted by key.
    pub fn items(&self) -> Result<Vec<Item>> {
        let rows = {
            let conn = self.lock_conn()?;
            load_all_rows(&conn)?
        };
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// Read-modify-write of an existing item.
    ///
    /// The read and the write happen in one transaction under the
    /// connection lock, so in-process updates of the same key serialize.
    /// `f` must not call back into this `Stash`.
    pub fn update<F>(&self, key: &str, f: F) -> Result<ItemMetadata>
    where
        F: FnOnce(serde_json::Value) -> serde_json::Value,
    {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let row = load_row(&tx, key)?.ok_or_else(|| StashError::not_found(format!("key {}", key)))?;
        let current = self.decode_row(&row)?;
        let next = f(current.value);

        let mut total = self.quota.used();
        let metadata =
            self.put_in_tx(&tx, key, &next, current.metadata.tags, &mut total, Utc::now())?;
        tx.commit()?;
        self.quota.commit(total, &self.events);
        if let Some(cache) = &self.cache {
            cache.insert(key, next, metadata.size);
        }
        debug!(key, version = metadata.version, "Item updated");
        Ok(metadata)
    }

    /// Remove the active record for `key`, keeping its history.
    ///
    /// Returns `false` when the key did not exist.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut total = self.quota.used();
        let existed = self.remove_in_tx(&tx, key, &mut total, Utc::now())?;
        tx.commit()?;
        self.quota.commit(total, &self.events);
        if let Some(cache) = &self.cache {
            cache.invalidate(key);
        }
        if existed {
            debug!(key, "Item deleted");
        }
        Ok(existed)
    }

    /// Apply a batch of operations all-or-nothing.
    ///
    /// Every op is validated before anything is written; the batch then
    /// runs in a single transaction and any failure rolls back all ops.
    pub fn bulk(&self, ops: &[BulkOp]) -> Result<Vec<BulkResult>> {
        let mut staged = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            let tags = match op {
                BulkOp::Set { key, tags, .. } => {
                    validate_key(key).map_err(|e| bulk_error(index, e))?;
                    Some(normalize_tags(tags.as_slice()).map_err(|e| bulk_error(index, e))?)
                }
                BulkOp::Delete { key } => {
                    validate_key(key).map_err(|e| bulk_error(index, e))?;
                    None
                }
            };
            staged.push(tags);
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut total = self.quota.used();
        let now = Utc::now();
        let mut results = Vec::with_capacity(ops.len());

        for (index, (op, tags)) in ops.iter().zip(staged).enumerate() {
            let result = match op {
                BulkOp::Set { key, value, .. } => self
                    .put_in_tx(&tx, key, value, tags.unwrap_or_default(), &mut total, now)
                    .map(|metadata| BulkResult::Set {
                        key: key.clone(),
                        version: metadata.version,
                    }),
                BulkOp::Delete { key } => {
                    self.remove_in_tx(&tx, key, &mut total, now)
                        .map(|existed| BulkResult::Delete {
                            key: key.clone(),
                            existed,
                        })
                }
            };
            match result {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(index, key = op.key(), error = %err, "Bulk operation failed; rolling back batch");
                    return Err(bulk_error(index, err));
                }
            }
        }

        tx.commit()?;
        self.quota.commit(total, &self.events);
        if let Some(cache) = &self.cache {
            for op in ops {
                cache.invalidate(op.key());
            }
        }
        debug!(ops = ops.len(), "Bulk batch committed");
        Ok(results)
    }

    // --- Version ledger ---

    /// Retained snapshots of `key`, oldest first.
    pub fn history(&self, key: &str) -> Result<Vec<VersionRecord>> {
        let rows = {
            let conn = self.lock_conn()?;
            ledger::list(&conn, key)?
        };
        rows.iter().map(|row| self.decode_version(row)).collect()
    }

    /// A single snapshot of `key`.
    pub fn version(&self, key: &str, version: u64) -> Result<Option<VersionRecord>> {
        let row = {
            let conn = self.lock_conn()?;
            ledger::get(&conn, key, version)?
        };
        row.map(|row| self.decode_version(&row)).transpose()
    }

    /// Re-store the value and tags of a historical version.
    ///
    /// This goes through [`Stash::set`], so it creates a new version rather
    /// than rewinding the counter.
    pub fn restore_version(&self, key: &str, version: u64) -> Result<ItemMetadata> {
        let record = self.version(key, version)?.ok_or_else(|| {
            StashError::not_found(format!("version {} of key {}", version, key))
        })?;
        let tags: Vec<String> = record.snapshot.metadata.tags.into_iter().collect();
        let metadata = self.set(key, record.snapshot.value, &tags)?;
        debug!(
            key,
            restored = version,
            version = metadata.version,
            "Restored historical version"
        );
        Ok(metadata)
    }

    /// Remove all snapshots of `key`. Returns how many were removed.
    pub fn purge_history(&self, key: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        ledger::purge(&conn, key)
    }

    // --- Query ---

    /// Filter, sort, paginate and project items.
    ///
    /// Metadata-only predicates are evaluated without decoding values;
    /// value predicates (and value sorts) decode each remaining candidate.
    /// The scan reads a point-in-time copy of the rows and is not isolated
    /// from writes that happen after it starts.
    pub fn query(&self, query: &Query) -> Result<QueryResult> {
        let compiled = CompiledQuery::compile(query)?;
        let (total, page) = self.run_query(&compiled)?;
        let rows = page
            .into_iter()
            .map(|(row, mut view)| {
                if compiled.output_needs_value() && view.get("value").is_none() {
                    self.attach_value(&row, &mut view)?;
                }
                Ok(compiled.project(view))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult { total, rows })
    }

    /// Like [`Stash::query`] but returns full items and ignores `select`.
    pub fn query_items(&self, query: &Query) -> Result<Vec<Item>> {
        let compiled = CompiledQuery::compile(query)?;
        let (_, page) = self.run_query(&compiled)?;
        page.iter().map(|(row, _)| self.decode_row(row)).collect()
    }

    fn run_query(&self, compiled: &CompiledQuery) -> Result<(usize, Vec<(ItemRow, serde_json::Value)>)> {
        let rows = {
            let conn = self.lock_conn()?;
            load_all_rows(&conn)?
        };

        let mut candidates = Vec::new();
        for row in rows {
            let view = row.view_without_value()?;
            if compiled.matches_fast(&view) {
                candidates.push((row, view));
            }
        }

        if compiled.needs_value_before_paging() {
            let mut matched = Vec::with_capacity(candidates.len());
            for (row, mut view) in candidates {
                self.attach_value(&row, &mut view)?;
                if compiled.matches_slow(&view) {
                    matched.push((row, view));
                }
            }
            candidates = matched;
        }

        if let Some(order) = &compiled.order_by {
            candidates.sort_by(|a, b| order.compare(&a.1, &b.1));
        }

        let total = candidates.len();
        Ok((total, compiled.page(candidates)))
    }

    fn attach_value(&self, row: &ItemRow, view: &mut serde_json::Value) -> Result<()> {
        let value = self.codec.decode(&row.value, row.compressed, row.encrypted)?;
        if let Some(obj) = view.as_object_mut() {
            obj.insert("value".to_string(), value);
        }
        Ok(())
    }

    // --- Internals ---

    fn decode_row(&self, row: &ItemRow) -> Result<Item> {
        Ok(Item {
            key: row.key.clone(),
            value: self.codec.decode(&row.value, row.compressed, row.encrypted)?,
            metadata: row.metadata()?,
        })
    }

    fn decode_version(&self, row: &VersionRow) -> Result<VersionRecord> {
        let metadata = row.metadata()?;
        let value = self
            .codec
            .decode(&row.value, metadata.compressed, metadata.encrypted)?;
        Ok(VersionRecord {
            item_id: row.key.clone(),
            version: u64::try_from(row.version)
                .map_err(|_| StashError::Storage(format!("Invalid version for {}", row.key)))?,
            timestamp: parse_timestamp(&row.recorded_at)?,
            snapshot: Item {
                key: row.key.clone(),
                value,
                metadata,
            },
        })
    }

    /// Write `value` under `key` inside an open transaction.
    ///
    /// `total` is the running quota usage for the transaction; it is only
    /// advanced when the write succeeds.
    fn put_in_tx(
        &self,
        conn: &Connection,
        key: &str,
        value: &serde_json::Value,
        tags: BTreeSet<String>,
        total: &mut u64,
        now: DateTime<Utc>,
    ) -> Result<ItemMetadata> {
        validate_key(key)?;
        let encoded = self.codec.encode(value)?;
        validate_value_size(encoded.size)?;

        let existing = load_row(conn, key)?;
        let old_size = existing
            .as_ref()
            .map(|row| row.size.max(0) as u64)
            .unwrap_or(0);
        let projected = self.quota.project(*total, old_size, encoded.size)?;

        let (prior_version, created) = match &existing {
            Some(row) => {
                ledger::append(conn, row, &now)?;
                (row.version.max(0) as u64, parse_timestamp(&row.created_at)?)
            }
            None => (0, now),
        };
        // Continue numbering past deleted incarnations of the key.
        let version = prior_version.max(ledger::max_version(conn, key)?.unwrap_or(0)) + 1;

        let tags_json = if tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&tags)?)
        };
        conn.execute(
            "INSERT OR REPLACE INTO items
             (key, value, created_at, updated_at, version, size, encrypted, compressed, tags_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key,
                encoded.bytes,
                format_timestamp(&created),
                format_timestamp(&now),
                version as i64,
                encoded.size as i64,
                encoded.encrypted,
                encoded.compressed,
                tags_json,
            ],
        )?;
        ledger::prune(conn, key, self.config.max_versions)?;

        *total = projected;
        Ok(ItemMetadata {
            created,
            updated: now,
            version,
            size: encoded.size,
            encrypted: encoded.encrypted,
            compressed: encoded.compressed,
            tags,
        })
    }

    fn remove_in_tx(
        &self,
        conn: &Connection,
        key: &str,
        total: &mut u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(row) = load_row(conn, key)? else {
            return Ok(false);
        };
        ledger::append(conn, &row, &now)?;
        conn.execute("DELETE FROM items WHERE key = ?1", [key])?;
        ledger::prune(conn, key, self.config.max_versions)?;
        *total = total.saturating_sub(row.size.max(0) as u64);
        Ok(true)
    }
}

impl std::fmt::Debug for Stash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stash")
            .field("path", &self.path)
            .field("codec", &self.codec)
            .field("quota", &self.quota)
            .finish()
    }
}

fn bulk_error(index: usize, err: StashError) -> StashError {
    match err {
        StashError::Validation(message) => {
            StashError::Validation(format!("Bulk operation {}: {}", index, message))
        }
        other => other,
    }
}

fn load_data_key(secrets: &dyn SecretStore, create: bool) -> Result<Option<DataKey>> {
    match secrets.get_secret(DATA_KEY_SECRET)? {
        Some(encoded) => Ok(Some(DataKey::from_encoded(&encoded)?)),
        None if create => {
            let key = DataKey::generate();
            secrets.set_secret(DATA_KEY_SECRET, &key.to_encoded())?;
            debug!("Generated new data encryption key");
            Ok(Some(key))
        }
        None => Ok(None),
    }
}

fn load_row(conn: &Connection, key: &str) -> Result<Option<ItemRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM items WHERE key = ?1", ITEM_COLUMNS),
            [key],
            ItemRow::from_row,
        )
        .optional()?;
    Ok(row)
}

fn load_all_rows(conn: &Connection) -> Result<Vec<ItemRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM items ORDER BY key", ITEM_COLUMNS))?;
    let rows = stmt.query_map([], ItemRow::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecConfig;
    use crate::quota::QuotaConfig;
    use crate::storage::keystore::MemoryKeystore;
    use serde_json::json;

    const NO_TAGS: &[&str] = &[];

    fn stash_with(config: StashConfig) -> Stash {
        Stash::open_in_memory(config, &MemoryKeystore::new()).unwrap()
    }

    fn stash() -> Stash {
        stash_with(StashConfig::default())
    }

    #[test]
    fn test_set_get_round_trip() {
        let stash = stash();
        let metadata = stash.set("a", json!({"n": 1}), &["x"]).unwrap();
        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.size, serde_json::to_vec(&json!({"n": 1})).unwrap().len() as u64);
        assert_eq!(stash.get("a").unwrap(), Some(json!({"n": 1})));
        assert_eq!(stash.get("missing").unwrap(), None);

        let item = stash.get_item("a").unwrap().unwrap();
        assert!(item.metadata.tags.contains("x"));
    }

    #[test]
    fn test_versions_increase_and_snapshot_prior_state() {
        let stash = stash();
        stash.set("a", json!({"n": 1}), NO_TAGS).unwrap();
        let second = stash.set("a", json!({"n": 2}), NO_TAGS).unwrap();
        assert_eq!(second.version, 2);

        let history = stash.history("a").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].snapshot.value, json!({"n": 1}));

        let restored = stash.restore_version("a", 1).unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(stash.get("a").unwrap(), Some(json!({"n": 1})));
    }

    #[test]
    fn test_restore_missing_version_is_not_found() {
        let stash = stash();
        stash.set("a", json!(1), NO_TAGS).unwrap();
        assert!(matches!(
            stash.restore_version("a", 9),
            Err(StashError::NotFound(_))
        ));
    }

    #[test]
    fn test_ledger_pruned_to_max_versions() {
        let stash = stash_with(StashConfig::default().with_max_versions(3));
        for n in 0..8 {
            stash.set("k", json!(n), NO_TAGS).unwrap();
        }
        let versions: Vec<u64> = stash.history("k").unwrap().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![5, 6, 7]);
    }

    #[test]
    fn test_delete_keeps_history_and_numbering_continues() {
        let stash = stash();
        stash.set("a", json!(1), NO_TAGS).unwrap();
        stash.set("a", json!(2), NO_TAGS).unwrap();
        assert!(stash.delete("a").unwrap());
        assert!(!stash.delete("a").unwrap());
        assert_eq!(stash.get("a").unwrap(), None);

        let history = stash.history("a").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].snapshot.value, json!(2));

        let again = stash.set("a", json!(3), NO_TAGS).unwrap();
        assert_eq!(again.version, 3);
        assert_eq!(stash.purge_history("a").unwrap(), 2);
    }

    #[test]
    fn test_update_missing_key() {
        let stash = stash();
        let result = stash.update("nope", |v| v);
        assert!(matches!(result, Err(StashError::NotFound(_))));
    }

    #[test]
    fn test_update_keeps_tags() {
        let stash = stash();
        stash.set("c", json!({"count": 1}), &["counter"]).unwrap();
        let metadata = stash
            .update("c", |mut v| {
                v["count"] = json!(v["count"].as_i64().unwrap_or(0) + 1);
                v
            })
            .unwrap();
        assert_eq!(metadata.version, 2);
        assert!(metadata.tags.contains("counter"));
        assert_eq!(stash.get("c").unwrap(), Some(json!({"count": 2})));
    }

    #[test]
    fn test_quota_rejection_leaves_store_unchanged() {
        let quota = QuotaConfig::new(40, 80).unwrap();
        let stash = stash_with(StashConfig::default().with_quota(quota));
        stash.set("a", json!("0123456789"), NO_TAGS).unwrap();
        let before = stash.export_json().unwrap();
        let used = stash.quota().used();

        let err = stash.set("b", json!("x".repeat(64)), NO_TAGS).unwrap_err();
        assert!(matches!(err, StashError::QuotaExceeded { limit: 40, .. }));
        assert_eq!(stash.export_json().unwrap(), before);
        assert_eq!(stash.quota().used(), used);
        assert!(stash.history("a").unwrap().is_empty());
    }

    #[test]
    fn test_overwrite_within_quota_frees_old_size() {
        let quota = QuotaConfig::new(30, 90).unwrap();
        let stash = stash_with(StashConfig::default().with_quota(quota));
        stash.set("a", json!("x".repeat(20)), NO_TAGS).unwrap();
        stash.set("a", json!("y".repeat(20)), NO_TAGS).unwrap();
        assert_eq!(stash.quota().used(), 22);
    }

    #[test]
    fn test_quota_warning_event() {
        let quota = QuotaConfig::new(100, 50).unwrap();
        let stash = stash_with(StashConfig::default().with_quota(quota));
        let mut rx = stash.subscribe();
        stash.set("a", json!("x".repeat(60)), NO_TAGS).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            StashEvent::QuotaWarning { limit: 100, .. }
        ));
    }

    #[test]
    fn test_bulk_is_all_or_nothing() {
        let quota = QuotaConfig::new(64, 90).unwrap();
        let stash = stash_with(StashConfig::default().with_quota(quota));
        stash.set("keep", json!(1), NO_TAGS).unwrap();

        let ops = vec![
            BulkOp::set("a", json!("small")),
            BulkOp::delete("keep"),
            BulkOp::set("b", json!("z".repeat(100))),
        ];
        assert!(stash.bulk(&ops).is_err());
        assert_eq!(stash.keys().unwrap(), vec!["keep".to_string()]);
        assert!(stash.history("keep").unwrap().is_empty());

        let ops = vec![BulkOp::set("a", json!("small")), BulkOp::delete("keep")];
        let results = stash.bulk(&ops).unwrap();
        assert_eq!(
            results,
            vec![
                BulkResult::Set {
                    key: "a".to_string(),
                    version: 1
                },
                BulkResult::Delete {
                    key: "keep".to_string(),
                    existed: true
                },
            ]
        );
    }

    #[test]
    fn test_bulk_validation_reports_index() {
        let stash = stash();
        let ops = vec![BulkOp::set("ok", json!(1)), BulkOp::set("", json!(2))];
        let err = stash.bulk(&ops).unwrap_err();
        assert!(err.to_string().contains("Bulk operation 1"));
        assert!(stash.keys().unwrap().is_empty());
    }

    #[test]
    fn test_encryption_creates_data_key() {
        let secrets = MemoryKeystore::new();
        let encrypted_config = StashConfig::default()
            .with_codec(CodecConfig::plain().with_compression(true).with_encryption(true));
        let stash = Stash::open_in_memory(encrypted_config, &secrets).unwrap();
        let sealed = stash.set("sealed", json!({"secret": true}), NO_TAGS).unwrap();
        assert!(sealed.encrypted && sealed.compressed);
        assert!(secrets.get_secret(DATA_KEY_SECRET).unwrap().is_some());
    }

    #[test]
    fn test_get_as_typed() {
        #[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let stash = stash();
        stash.set_value("p", &Point { x: 1, y: 2 }).unwrap();
        assert_eq!(stash.get_as::<Point>("p").unwrap(), Some(Point { x: 1, y: 2 }));
    }

    #[test]
    fn test_cache_is_invalidated_on_write() {
        let stash = stash_with(StashConfig::default().with_cache(Default::default()));
        stash.set("a", json!(1), NO_TAGS).unwrap();
        assert_eq!(stash.get("a").unwrap(), Some(json!(1)));
        stash.update("a", |_| json!(2)).unwrap();
        assert_eq!(stash.get("a").unwrap(), Some(json!(2)));
        stash.delete("a").unwrap();
        assert_eq!(stash.get("a").unwrap(), None);
    }

    #[test]
    fn test_quota_total_survives_concurrent_writers() {
        let stash = stash();
        std::thread::scope(|scope| {
            for t in 0..8 {
                let stash = &stash;
                scope.spawn(move || {
                    for n in 0..100 {
                        let key = format!("t{}-{}", t, n % 40);
                        stash.set(&key, json!("xxxxxxxx"), NO_TAGS).unwrap();
                        if n % 7 == 0 {
                            stash.delete(&key).unwrap();
                        }
                    }
                });
            }
        });

        let stats = stash.stats().unwrap();
        assert!(stats.total_size > 0);
        assert_eq!(stash.quota().used(), stats.total_size);
    }

    #[test]
    fn test_cache_never_keeps_an_older_value() {
        let stash = stash_with(StashConfig::default().with_cache(Default::default()));
        stash.set("k", json!(0), NO_TAGS).unwrap();
        std::thread::scope(|scope| {
            let writer = &stash;
            scope.spawn(move || {
                for n in 1..=200 {
                    writer.set("k", json!(n), NO_TAGS).unwrap();
                }
            });
            for _ in 0..2 {
                let reader = &stash;
                scope.spawn(move || {
                    for _ in 0..200 {
                        reader.get("k").unwrap();
                    }
                });
            }
        });

        assert_eq!(stash.get("k").unwrap(), Some(json!(200)));
        assert_eq!(stash.get_item("k").unwrap().unwrap().value, json!(200));
    }
}
