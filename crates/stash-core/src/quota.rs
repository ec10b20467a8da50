//! Quota monitoring.
//!
//! The monitor keeps a running total of active item sizes (the serialized
//! size recorded in `ItemMetadata::size`). Writes are checked against the
//! projected total before anything is persisted.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StashError};
use crate::events::{EventBus, StashEvent};

/// Default quota: 100 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Default warning threshold in percent of `max_bytes`.
pub const DEFAULT_WARN_AT_PERCENT: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_bytes: u64,
    pub warn_at_percent: u8,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            warn_at_percent: DEFAULT_WARN_AT_PERCENT,
        }
    }
}

impl QuotaConfig {
    pub fn new(max_bytes: u64, warn_at_percent: u8) -> Result<Self> {
        if max_bytes == 0 {
            return Err(StashError::InvalidInput(
                "Quota max_bytes must be at least 1".to_string(),
            ));
        }
        if warn_at_percent == 0 || warn_at_percent > 100 {
            return Err(StashError::InvalidInput(format!(
                "Quota warn_at_percent must be 1-100 (got {})",
                warn_at_percent
            )));
        }
        Ok(Self {
            max_bytes,
            warn_at_percent,
        })
    }

    /// Usage at or above which a warning is emitted.
    pub fn warn_threshold(&self) -> u64 {
        ((self.max_bytes as u128 * self.warn_at_percent as u128) / 100) as u64
    }
}

/// Running usage tracker and write gate.
#[derive(Debug)]
pub struct QuotaMonitor {
    config: QuotaConfig,
    used: AtomicU64,
}

impl QuotaMonitor {
    pub fn new(config: QuotaConfig, initial_used: u64) -> Self {
        Self {
            config,
            used: AtomicU64::new(initial_used),
        }
    }

    pub fn config(&self) -> QuotaConfig {
        self.config
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn used_percent(&self) -> f64 {
        percent(self.used(), self.config.max_bytes)
    }

    /// Compute the total after replacing `old_size` bytes with `new_size`
    /// bytes on top of `base`, rejecting it if it exceeds the quota.
    pub fn project(&self, base: u64, old_size: u64, new_size: u64) -> Result<u64> {
        let projected = base.saturating_sub(old_size).saturating_add(new_size);
        if projected > self.config.max_bytes {
            return Err(StashError::QuotaExceeded {
                requested: projected,
                limit: self.config.max_bytes,
            });
        }
        Ok(projected)
    }

    /// Record a committed total. Emits a warning when the total crosses the
    /// warning threshold from below.
    ///
    /// `total` is absolute, so the caller must hold the store's write lock
    /// from the [`QuotaMonitor::used`] read through this call.
    pub fn commit(&self, total: u64, events: &EventBus) {
        let previous = self.used.swap(total, Ordering::SeqCst);
        let threshold = self.config.warn_threshold();
        if total >= threshold && previous < threshold {
            let pct = percent(total, self.config.max_bytes);
            warn!(
                used = total,
                limit = self.config.max_bytes,
                percent = pct,
                "Storage quota warning threshold crossed"
            );
            events.emit(StashEvent::QuotaWarning {
                used: total,
                limit: self.config.max_bytes,
                percent: pct,
            });
        }
    }
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    used as f64 * 100.0 / limit as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(QuotaConfig::new(0, 80).is_err());
        assert!(QuotaConfig::new(100, 0).is_err());
        assert!(QuotaConfig::new(100, 101).is_err());
        assert_eq!(QuotaConfig::new(1000, 80).unwrap().warn_threshold(), 800);
    }

    #[test]
    fn test_project_rejects_over_limit() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(100, 80).unwrap(), 90);
        assert_eq!(monitor.project(90, 0, 10).unwrap(), 100);
        let err = monitor.project(90, 0, 11).unwrap_err();
        assert!(matches!(
            err,
            StashError::QuotaExceeded {
                requested: 101,
                limit: 100
            }
        ));
        // Replacing a value frees its old size first.
        assert_eq!(monitor.project(90, 50, 55).unwrap(), 95);
    }

    #[test]
    fn test_warning_emitted_once_on_crossing() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let monitor = QuotaMonitor::new(QuotaConfig::new(100, 80).unwrap(), 0);

        monitor.commit(50, &bus);
        assert!(rx.try_recv().is_err());

        monitor.commit(85, &bus);
        assert!(matches!(
            rx.try_recv().unwrap(),
            StashEvent::QuotaWarning { used: 85, limit: 100, .. }
        ));

        monitor.commit(90, &bus);
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.used(), 90);
    }
}
