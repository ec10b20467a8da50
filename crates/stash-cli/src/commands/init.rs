use std::path::PathBuf;

use stash_core::CodecConfig;

use crate::app::{resolve_config_path, AppContext};
use crate::cli::{Cli, InitArgs};
use crate::config::{
    default_backup_dir, default_keystore_path, default_store_path, write_config, StashCliConfig,
};

pub fn handle_init(cli: &Cli, args: &InitArgs) -> anyhow::Result<()> {
    let config_path = resolve_config_path()?;
    if config_path.exists() && !args.force {
        return Err(anyhow::anyhow!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        ));
    }

    let store_path = match args.path.as_ref().or(cli.store.as_ref()) {
        Some(path) => PathBuf::from(path),
        None => default_store_path()?,
    };
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("Failed to create directory {}: {}", parent.display(), e)
        })?;
    }

    let mut config =
        StashCliConfig::new(store_path.clone(), default_keystore_path()?, default_backup_dir()?);
    config.codec = CodecConfig::plain()
        .with_compression(args.compress)
        .with_encryption(args.encrypt);
    config.backup.encrypt = args.encrypt;

    let ctx = AppContext::with_config(cli, config);
    ctx.open_or_create(&store_path)?;
    write_config(&config_path, ctx.config())?;

    if !cli.quiet {
        println!("Initialized new store at {}", store_path.display());
        println!("Config written to {}", config_path.display());
    }
    Ok(())
}
