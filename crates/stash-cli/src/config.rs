use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use stash_core::config::DEFAULT_MAX_VERSIONS;
use stash_core::{BackupConfig, CodecConfig, QuotaConfig, StashConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashCliConfig {
    pub store: StoreSection,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    pub keystore: KeystoreSection,
    pub backup: BackupSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: String,
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoreSection {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSection {
    pub dir: String,
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub auto_backup: bool,
}

fn default_max_versions() -> usize {
    DEFAULT_MAX_VERSIONS
}

fn default_true() -> bool {
    true
}

impl StashCliConfig {
    pub fn new(store_path: PathBuf, keystore_path: PathBuf, backup_dir: PathBuf) -> Self {
        let backup = BackupConfig::default();
        Self {
            store: StoreSection {
                path: store_path.to_string_lossy().to_string(),
                max_versions: DEFAULT_MAX_VERSIONS,
            },
            codec: CodecConfig::default(),
            quota: QuotaConfig::default(),
            keystore: KeystoreSection {
                path: keystore_path.to_string_lossy().to_string(),
            },
            backup: BackupSection {
                dir: backup_dir.to_string_lossy().to_string(),
                compress: backup.compress,
                encrypt: backup.encrypt,
                auto_backup: backup.auto_backup,
            },
        }
    }

    /// Defaults for a store at `store_path`, with the keystore and backup
    /// directory placed next to it.
    pub fn for_store(store_path: &Path) -> Self {
        let dir = store_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(
            store_path.to_path_buf(),
            dir.join("keystore"),
            dir.join("backups"),
        )
    }

    pub fn stash_config(&self) -> StashConfig {
        StashConfig::new()
            .with_max_versions(self.store.max_versions)
            .with_codec(self.codec)
            .with_quota(self.quota)
    }

    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            compress: self.backup.compress,
            encrypt: self.backup.encrypt,
            auto_backup: self.backup.auto_backup,
        }
    }

    /// Whether opening the store needs the keystore passphrase.
    pub fn needs_keystore(&self) -> bool {
        self.codec.encrypt || self.backup.encrypt || Path::new(&self.keystore.path).exists()
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn default_store_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_data_dir()?.join("stash.db"))
}

pub fn default_keystore_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("keystore"))
}

pub fn default_backup_dir() -> anyhow::Result<PathBuf> {
    Ok(xdg_data_dir()?.join("backups"))
}

pub fn read_config(path: &Path) -> anyhow::Result<StashCliConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

pub fn write_config(path: &Path, config: &StashCliConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create config directory {}: {}",
                parent.display(),
                e
            )
        })?;
    }
    let contents =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {}", e))?;
    std::fs::write(path, contents)
        .map_err(|e| anyhow::anyhow!("Failed to write config {}: {}", path.display(), e))?;
    Ok(())
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("stash"));
        }
    }
    Ok(home_dir()?.join(".config").join("stash"))
}

pub fn xdg_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_DATA_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("stash"));
        }
    }
    Ok(home_dir()?.join(".local").join("share").join("stash"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}
