//! Path resolution for the config file and the store.

use std::path::{Path, PathBuf};

use crate::config::default_config_path;

/// Resolve the config file path, checking STASH_CONFIG first.
pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("STASH_CONFIG") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    default_config_path()
}

/// Error message when no store exists at the resolved path.
pub fn missing_store_message(path: &Path) -> String {
    format!(
        "No store found at {}\n\nRun:\n  stash init\n\nOr specify a store path:\n  STASH_PATH=/path/to/stash.db stash init",
        path.display()
    )
}

/// Error message when neither a config file nor a store path is available.
pub fn missing_config_message(config_path: &Path) -> String {
    format!(
        "No config found at {}\n\nRun:\n  stash init\n\nOr specify a store path:\n  stash --store /path/to/stash.db <command>",
        config_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_mention_init() {
        let path = Path::new("/tmp/missing.db");
        assert!(missing_store_message(path).contains("stash init"));
        assert!(missing_store_message(path).contains("/tmp/missing.db"));
        assert!(missing_config_message(path).contains("--store"));
    }
}
