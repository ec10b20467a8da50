//! Engine event bus.
//!
//! Events are observable side-channel notifications; emitting never blocks
//! and never fails, even when nobody is subscribed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers observe `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Notifications emitted by the engine and its coordinators.
#[derive(Debug, Clone, PartialEq)]
pub enum StashEvent {
    /// A write pushed usage across the configured warning threshold
    QuotaWarning {
        used: u64,
        limit: u64,
        percent: f64,
    },
    /// A sync pass finished
    SyncCompleted {
        pushed: usize,
        removed: usize,
        conflicts: usize,
    },
    /// A sync pass failed; the next tick re-pushes everything
    SyncFailed { message: String },
    /// A backup was written
    BackupCreated { id: String, incremental: bool },
    /// A migration step was applied or rolled back
    MigrationApplied { version: u32, direction: MigrationDirection },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    Up,
    Down,
}

/// Cloneable handle to the engine's broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StashEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StashEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: StashEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
