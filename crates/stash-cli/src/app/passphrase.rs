//! Passphrase handling and keystore opening with retry logic.

use std::path::Path;

use dialoguer::Password;
use stash_core::{FileKeystore, StashError};

const MAX_ATTEMPTS: usize = 3;

fn env_passphrase() -> Option<String> {
    std::env::var("STASH_PASSPHRASE")
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Open the keystore, from STASH_PASSPHRASE or by prompting.
///
/// Interactive sessions get up to three attempts at a wrong passphrase.
pub fn open_keystore(path: &Path, interactive: bool) -> anyhow::Result<FileKeystore> {
    if let Some(passphrase) = env_passphrase() {
        return Ok(FileKeystore::open(path, &passphrase)?);
    }
    if !interactive {
        return Err(anyhow::anyhow!(
            "No passphrase provided and no TTY available. Set STASH_PASSPHRASE."
        ));
    }

    // A keystore that does not exist yet is created by the first write.
    if !path.exists() {
        let passphrase = prompt_new_passphrase(interactive)?;
        return Ok(FileKeystore::open(path, &passphrase)?);
    }

    for attempt in 1..=MAX_ATTEMPTS {
        let passphrase = Password::new()
            .with_prompt("Passphrase")
            .interact()
            .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))?;
        match FileKeystore::open(path, &passphrase) {
            Ok(keystore) => return Ok(keystore),
            Err(StashError::IncorrectPassphrase) if attempt < MAX_ATTEMPTS => {
                eprintln!("Incorrect passphrase, try again");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(StashError::IncorrectPassphrase.into())
}

/// Prompt for a new passphrase with confirmation, or read STASH_PASSPHRASE.
pub fn prompt_new_passphrase(interactive: bool) -> anyhow::Result<String> {
    if let Some(passphrase) = env_passphrase() {
        return Ok(passphrase);
    }
    if !interactive {
        return Err(anyhow::anyhow!(
            "No passphrase provided and no TTY available. Set STASH_PASSPHRASE."
        ));
    }
    Password::new()
        .with_prompt("Enter passphrase")
        .with_confirmation("Confirm passphrase", "Passphrases do not match")
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))
}
