//! Best-effort mirroring of the item store into a secondary [`SyncTarget`].
//!
//! Each pass pushes the full `{key -> {value, metadata}}` mapping and
//! removes keys that were pushed previously but no longer exist locally.
//! Passes are idempotent, so a failed pass is simply retried in full on the
//! next tick.
//!
//! A remote record is a *conflict* when it changed since this coordinator
//! last pushed that key (higher version or later update time). For keys
//! never pushed, a remote record conflicts when its value differs from the
//! local one and it was updated later. Conflicts are resolved by the
//! configured [`ConflictPolicy`]; there is no default policy.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, StashError};
use crate::events::StashEvent;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::storage::types::{Item, SyncRecord};
use crate::storage::{Stash, SyncTarget};

/// How to resolve a remote record that changed since the last push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Overwrite the remote record with the local one
    LocalWins,
    /// Write the remote value locally and skip the push
    RemoteWins,
    /// Shallow-merge object values (local fields win), then push
    Merge,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictPolicy::LocalWins => "local_wins",
            ConflictPolicy::RemoteWins => "remote_wins",
            ConflictPolicy::Merge => "merge",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictPolicy {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local_wins" | "local" => Ok(ConflictPolicy::LocalWins),
            "remote_wins" | "remote" => Ok(ConflictPolicy::RemoteWins),
            "merge" => Ok(ConflictPolicy::Merge),
            other => Err(StashError::InvalidInput(format!(
                "Unknown conflict policy: {}",
                other
            ))),
        }
    }
}

/// Sync settings. The conflict policy must be chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval: Duration,
    pub conflict_policy: ConflictPolicy,
}

impl SyncConfig {
    pub fn new(interval: Duration, conflict_policy: ConflictPolicy) -> Self {
        Self {
            interval,
            conflict_policy,
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Records written to the target
    pub pushed: usize,
    /// Keys removed from the target
    pub removed: usize,
    /// Remote records written into the local store
    pub pulled: usize,
    /// Conflicting keys, sorted
    pub conflicts: Vec<String>,
}

/// Mirrors a [`Stash`] into a [`SyncTarget`].
pub struct SyncCoordinator {
    stash: Arc<Stash>,
    target: Arc<dyn SyncTarget>,
    config: SyncConfig,
    /// Last record pushed (or pulled) per key
    last_pushed: Mutex<HashMap<String, SyncRecord>>,
}

impl SyncCoordinator {
    pub fn new(stash: Arc<Stash>, target: Arc<dyn SyncTarget>, config: SyncConfig) -> Self {
        Self {
            stash,
            target,
            config,
            last_pushed: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    fn lock_pushed(&self) -> Result<MutexGuard<'_, HashMap<String, SyncRecord>>> {
        self.last_pushed
            .lock()
            .map_err(|_| StashError::Sync("Sync state lock poisoned".to_string()))
    }

    /// Run one pass and report what happened.
    #[tracing::instrument(skip(self), fields(policy = %self.config.conflict_policy))]
    pub fn sync_now(&self) -> Result<SyncReport> {
        let remote = self.target.fetch_all()?;
        let local = self.stash.items()?;
        let policy = self.config.conflict_policy;

        let mut last_pushed = self.lock_pushed()?;
        let mut report = SyncReport::default();
        let mut local_keys: HashSet<String> = HashSet::with_capacity(local.len());

        for item in local {
            local_keys.insert(item.key.clone());
            let mut record = SyncRecord::from(&item);

            if let Some(remote_record) = remote.get(&item.key) {
                if is_conflict(last_pushed.get(&item.key), remote_record, &item) {
                    report.conflicts.push(item.key.clone());
                    match policy {
                        ConflictPolicy::LocalWins => {}
                        ConflictPolicy::RemoteWins => {
                            self.pull(&item.key, remote_record)?;
                            last_pushed.insert(item.key.clone(), remote_record.clone());
                            report.pulled += 1;
                            continue;
                        }
                        ConflictPolicy::Merge => {
                            let merged = shallow_merge(&item.value, &remote_record.value);
                            if merged != item.value {
                                let tags: Vec<String> =
                                    item.metadata.tags.iter().cloned().collect();
                                let metadata = self.stash.set(&item.key, merged.clone(), &tags)?;
                                record = SyncRecord {
                                    value: merged,
                                    metadata,
                                };
                            }
                        }
                    }
                }
            }

            self.target.put(&item.key, &record)?;
            last_pushed.insert(item.key.clone(), record);
            report.pushed += 1;
        }

        // Keys pushed before but gone locally were deleted here.
        let deleted: HashSet<String> = last_pushed
            .keys()
            .filter(|key| !local_keys.contains(*key))
            .cloned()
            .collect();
        for key in &deleted {
            self.target.remove(key)?;
            last_pushed.remove(key);
            report.removed += 1;
        }

        // Keys only the remote knows about. `remote` was fetched before the
        // removals above, so keys deleted here must not be pulled back.
        if policy != ConflictPolicy::LocalWins {
            let mut remote_only: Vec<(&String, &SyncRecord)> = remote
                .iter()
                .filter(|(key, _)| {
                    !local_keys.contains(*key)
                        && !deleted.contains(*key)
                        && !last_pushed.contains_key(*key)
                })
                .collect();
            remote_only.sort_by(|a, b| a.0.cmp(b.0));
            for (key, record) in remote_only {
                self.pull(key, record)?;
                last_pushed.insert(key.clone(), record.clone());
                report.pulled += 1;
            }
        }

        report.conflicts.sort();
        Ok(report)
    }

    /// Run a pass, logging and emitting the outcome instead of returning an
    /// error. This is what scheduled ticks call.
    pub fn tick(&self) -> Option<SyncReport> {
        match self.sync_now() {
            Ok(report) => {
                info!(
                    pushed = report.pushed,
                    removed = report.removed,
                    pulled = report.pulled,
                    conflicts = report.conflicts.len(),
                    "Sync pass completed"
                );
                self.stash.events().emit(StashEvent::SyncCompleted {
                    pushed: report.pushed,
                    removed: report.removed,
                    conflicts: report.conflicts.len(),
                });
                Some(report)
            }
            Err(err) => {
                warn!(error = %err, "Sync pass failed; will retry next tick");
                self.stash.events().emit(StashEvent::SyncFailed {
                    message: err.to_string(),
                });
                None
            }
        }
    }

    /// Schedule [`SyncCoordinator::tick`] at the configured interval.
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler) -> Result<TaskHandle> {
        let coordinator = Arc::clone(self);
        scheduler.every("sync", self.config.interval, move || {
            let coordinator = Arc::clone(&coordinator);
            async move {
                if let Err(err) = tokio::task::spawn_blocking(move || coordinator.tick()).await {
                    warn!(error = %err, "Sync task panicked");
                }
            }
        })
    }

    fn pull(&self, key: &str, record: &SyncRecord) -> Result<()> {
        let tags: Vec<String> = record.metadata.tags.iter().cloned().collect();
        self.stash.set(key, record.value.clone(), &tags)?;
        debug!(key, "Pulled remote record");
        Ok(())
    }
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &self.config)
            .finish()
    }
}

fn is_conflict(last: Option<&SyncRecord>, remote: &SyncRecord, local: &Item) -> bool {
    match last {
        Some(last) => {
            remote.metadata.version > last.metadata.version
                || remote.metadata.updated > last.metadata.updated
        }
        None => remote.value != local.value && remote.metadata.updated > local.metadata.updated,
    }
}

/// Shallow merge of two object values; `local` fields win. Non-objects
/// resolve to `local`.
fn shallow_merge(local: &serde_json::Value, remote: &serde_json::Value) -> serde_json::Value {
    match (local, remote) {
        (serde_json::Value::Object(local_fields), serde_json::Value::Object(remote_fields)) => {
            let mut merged = remote_fields.clone();
            for (field, value) in local_fields {
                merged.insert(field.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => local.clone(),
    }
}

/// In-memory [`SyncTarget`], with a switch to simulate outages.
#[derive(Debug)]
pub struct MemorySyncTarget {
    records: Mutex<HashMap<String, SyncRecord>>,
    available: std::sync::atomic::AtomicBool,
}

impl MemorySyncTarget {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// When `false`, every operation fails with `StashError::Sync`.
    pub fn set_available(&self, available: bool) {
        self.available
            .store(available, std::sync::atomic::Ordering::SeqCst);
    }

    /// Keys currently held, sorted.
    pub fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    pub fn record(&self, key: &str) -> Result<Option<SyncRecord>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SyncRecord>>> {
        if !self.available.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StashError::Sync("Sync target unavailable".to_string()));
        }
        self.records
            .lock()
            .map_err(|_| StashError::Sync("Sync target lock poisoned".to_string()))
    }
}

impl Default for MemorySyncTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTarget for MemorySyncTarget {
    fn fetch_all(&self) -> Result<HashMap<String, SyncRecord>> {
        Ok(self.lock()?.clone())
    }

    fn put(&self, key: &str, record: &SyncRecord) -> Result<()> {
        self.lock()?.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StashConfig;
    use crate::storage::keystore::MemoryKeystore;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    const NO_TAGS: &[&str] = &[];

    fn setup(policy: ConflictPolicy) -> (Arc<Stash>, Arc<MemorySyncTarget>, SyncCoordinator) {
        let stash = Arc::new(
            Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new()).unwrap(),
        );
        let target = Arc::new(MemorySyncTarget::new());
        let coordinator = SyncCoordinator::new(
            Arc::clone(&stash),
            target.clone(),
            SyncConfig::new(Duration::from_secs(60), policy),
        );
        (stash, target, coordinator)
    }

    /// Simulate another writer bumping a remote record.
    fn bump_remote(target: &MemorySyncTarget, key: &str, value: serde_json::Value) {
        let mut record = target.record(key).unwrap().unwrap();
        record.value = value;
        record.metadata.version += 1;
        record.metadata.updated = Utc::now() + ChronoDuration::seconds(5);
        target.put(key, &record).unwrap();
    }

    #[test]
    fn test_push_and_infer_deletions() {
        let (stash, target, coordinator) = setup(ConflictPolicy::LocalWins);
        stash.set("a", json!(1), NO_TAGS).unwrap();
        stash.set("b", json!(2), NO_TAGS).unwrap();

        let report = coordinator.sync_now().unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(target.keys().unwrap().len(), 2);

        stash.delete("a").unwrap();
        let report = coordinator.sync_now().unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(
            target.keys().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["b".to_string()]
        );
        assert_eq!(target.record("b").unwrap().unwrap().value, json!(2));
    }

    #[test]
    fn test_local_wins_overwrites_remote() {
        let (stash, target, coordinator) = setup(ConflictPolicy::LocalWins);
        stash.set("a", json!({"x": 1}), NO_TAGS).unwrap();
        coordinator.sync_now().unwrap();

        bump_remote(&target, "a", json!({"x": 99}));
        let report = coordinator.sync_now().unwrap();
        assert_eq!(report.conflicts, vec!["a".to_string()]);
        assert_eq!(target.record("a").unwrap().unwrap().value, json!({"x": 1}));
    }

    #[test]
    fn test_remote_wins_writes_locally() {
        let (stash, target, coordinator) = setup(ConflictPolicy::RemoteWins);
        stash.set("a", json!({"x": 1}), NO_TAGS).unwrap();
        coordinator.sync_now().unwrap();

        bump_remote(&target, "a", json!({"x": 99}));
        let report = coordinator.sync_now().unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(stash.get("a").unwrap(), Some(json!({"x": 99})));

        // Settled: the next pass is conflict-free.
        let report = coordinator.sync_now().unwrap();
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_merge_combines_objects() {
        let (stash, target, coordinator) = setup(ConflictPolicy::Merge);
        stash.set("a", json!({"x": 1, "y": 1}), NO_TAGS).unwrap();
        coordinator.sync_now().unwrap();

        bump_remote(&target, "a", json!({"y": 2, "z": 3}));
        coordinator.sync_now().unwrap();

        let expected = json!({"x": 1, "y": 1, "z": 3});
        assert_eq!(stash.get("a").unwrap(), Some(expected.clone()));
        assert_eq!(target.record("a").unwrap().unwrap().value, expected);
    }

    #[test]
    fn test_merge_pulls_remote_only_keys() {
        let (stash, target, coordinator) = setup(ConflictPolicy::Merge);
        let foreign = Arc::new(
            Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new()).unwrap(),
        );
        foreign.set("remote", json!("hi"), &["r"]).unwrap();
        let item = foreign.get_item("remote").unwrap().unwrap();
        target.put("remote", &SyncRecord::from(&item)).unwrap();

        let report = coordinator.sync_now().unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(stash.get("remote").unwrap(), Some(json!("hi")));
    }

    #[test]
    fn test_local_deletion_is_not_pulled_back() {
        for policy in [ConflictPolicy::RemoteWins, ConflictPolicy::Merge] {
            let (stash, target, coordinator) = setup(policy);
            stash.set("a", json!(1), NO_TAGS).unwrap();
            stash.set("b", json!(2), NO_TAGS).unwrap();
            coordinator.sync_now().unwrap();

            stash.delete("a").unwrap();
            let report = coordinator.sync_now().unwrap();
            assert_eq!(report.removed, 1, "{}", policy);
            assert_eq!(report.pulled, 0, "{}", policy);
            assert_eq!(stash.get("a").unwrap(), None, "{}", policy);
            assert!(!target.keys().unwrap().contains("a"), "{}", policy);

            // A later pass stays settled.
            let report = coordinator.sync_now().unwrap();
            assert_eq!(report.pulled, 0, "{}", policy);
            assert_eq!(stash.get("a").unwrap(), None, "{}", policy);
            assert!(target.keys().unwrap().contains("b"), "{}", policy);
        }
    }

    #[test]
    fn test_local_wins_ignores_remote_only_keys() {
        let (stash, target, coordinator) = setup(ConflictPolicy::LocalWins);
        let foreign =
            Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new()).unwrap();
        foreign.set("remote", json!("hi"), NO_TAGS).unwrap();
        let item = foreign.get_item("remote").unwrap().unwrap();
        target.put("remote", &SyncRecord::from(&item)).unwrap();
        stash.set("a", json!(1), NO_TAGS).unwrap();

        let report = coordinator.sync_now().unwrap();
        assert_eq!(report.pulled, 0);
        assert_eq!(report.removed, 0);
        assert_eq!(stash.get("remote").unwrap(), None);
        assert_eq!(target.record("remote").unwrap().unwrap().value, json!("hi"));
    }

    #[test]
    fn test_tick_swallows_failures_and_recovers() {
        let (stash, target, coordinator) = setup(ConflictPolicy::LocalWins);
        let mut events = stash.subscribe();
        stash.set("a", json!(1), NO_TAGS).unwrap();

        target.set_available(false);
        assert!(coordinator.tick().is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            StashEvent::SyncFailed { .. }
        ));

        target.set_available(true);
        let report = coordinator.tick().unwrap();
        assert_eq!(report.pushed, 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            StashEvent::SyncCompleted { pushed: 1, .. }
        ));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("remote-wins".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::RemoteWins);
        assert_eq!("merge".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Merge);
        assert!("whatever".parse::<ConflictPolicy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_sync() {
        let (stash, target, coordinator) = setup(ConflictPolicy::LocalWins);
        stash.set("a", json!(1), NO_TAGS).unwrap();
        let scheduler = Scheduler::new();
        let coordinator = Arc::new(coordinator);
        coordinator.start(&scheduler).unwrap();

        let mut events = stash.subscribe();
        tokio::time::sleep(Duration::from_secs(61)).await;
        let event = events.recv().await.unwrap();
        assert!(matches!(event, StashEvent::SyncCompleted { pushed: 1, .. }));
        assert!(target.keys().unwrap().contains("a"));
        scheduler.shutdown_and_wait().await;
    }
}
