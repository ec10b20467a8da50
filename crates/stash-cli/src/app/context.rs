//! Application context for the Stash CLI.
//!
//! Combines CLI arguments with the loaded config file and knows how to
//! open the store and its backup manager.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stash_core::{BackupManager, FsBlobStore, MemoryKeystore, SecretStore, Stash};

use crate::cli::Cli;
use crate::config::{read_config, StashCliConfig};

use super::passphrase::open_keystore;
use super::resolver::{missing_config_message, missing_store_message, resolve_config_path};

pub struct AppContext<'a> {
    cli: &'a Cli,
    config: StashCliConfig,
}

impl<'a> AppContext<'a> {
    /// Load the config file, letting `--store`/STASH_PATH override the
    /// store path. Without a config file a store path is required.
    pub fn new(cli: &'a Cli) -> anyhow::Result<Self> {
        let config_path = resolve_config_path()?;
        let config = if config_path.exists() {
            let mut config = read_config(&config_path)?;
            if let Some(store) = &cli.store {
                config.store.path = store.clone();
            }
            config
        } else if let Some(store) = &cli.store {
            StashCliConfig::for_store(Path::new(store))
        } else {
            return Err(anyhow::anyhow!(missing_config_message(&config_path)));
        };
        Ok(Self { cli, config })
    }

    /// Use `config` as is, without reading the config file.
    pub fn with_config(cli: &'a Cli, config: StashCliConfig) -> Self {
        Self { cli, config }
    }

    pub fn quiet(&self) -> bool {
        self.cli.quiet
    }

    pub fn interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    pub fn config(&self) -> &StashCliConfig {
        &self.config
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.config.store.path)
    }

    /// Open an existing store.
    pub fn open_stash(&self) -> anyhow::Result<Arc<Stash>> {
        let path = self.store_path();
        if !path.exists() {
            return Err(anyhow::anyhow!(missing_store_message(&path)));
        }
        self.open_or_create(&path)
    }

    /// Open the store, creating the database if it does not exist.
    pub fn open_or_create(&self, path: &Path) -> anyhow::Result<Arc<Stash>> {
        let keystore: Box<dyn SecretStore> = if self.config.needs_keystore() {
            Box::new(open_keystore(
                Path::new(&self.config.keystore.path),
                self.interactive(),
            )?)
        } else {
            Box::new(MemoryKeystore::new())
        };
        let stash = Stash::open(path, self.config.stash_config(), keystore.as_ref())?;
        tracing::debug!(path = %path.display(), "Opened store");
        Ok(Arc::new(stash))
    }

    pub fn backups(&self, stash: Arc<Stash>) -> anyhow::Result<Arc<BackupManager>> {
        let blobs = FsBlobStore::new(&self.config.backup.dir)?;
        Ok(Arc::new(BackupManager::new(
            stash,
            Arc::new(blobs),
            self.config.backup_config(),
        )))
    }
}
