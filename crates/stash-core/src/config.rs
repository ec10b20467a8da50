//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::codec::CodecConfig;
use crate::quota::QuotaConfig;

/// Default number of snapshots retained per key.
pub const DEFAULT_MAX_VERSIONS: usize = 10;

/// Configuration for a [`Stash`](crate::Stash) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashConfig {
    /// Snapshots retained per key in the version ledger
    pub max_versions: usize,
    pub codec: CodecConfig,
    pub quota: QuotaConfig,
    /// Decoded-value cache; disabled when `None`
    pub cache: Option<CacheConfig>,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            max_versions: DEFAULT_MAX_VERSIONS,
            codec: CodecConfig::default(),
            quota: QuotaConfig::default(),
            cache: None,
        }
    }
}

impl StashConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = StashConfig::new()
            .with_max_versions(3)
            .with_codec(CodecConfig::plain().with_compression(true))
            .with_cache(CacheConfig::default());

        assert_eq!(config.max_versions, 3);
        assert!(config.codec.compress);
        assert!(!config.codec.encrypt);
        assert!(config.cache.is_some());
        assert_eq!(StashConfig::default().max_versions, DEFAULT_MAX_VERSIONS);
    }
}
