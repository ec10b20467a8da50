//! Migration definitions.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StashError};
use crate::events::MigrationDirection;
use crate::storage::types::BulkOp;
use crate::storage::Stash;

/// A migration step body.
pub type MigrationFn = Box<dyn Fn(&Stash) -> Result<()> + Send + Sync>;

/// One ordered schema transformation.
pub struct Migration {
    pub version: u32,
    pub description: String,
    up: Option<MigrationFn>,
    down: Option<MigrationFn>,
}

impl Migration {
    pub fn new<U, D>(version: u32, description: impl Into<String>, up: U, down: D) -> Self
    where
        U: Fn(&Stash) -> Result<()> + Send + Sync + 'static,
        D: Fn(&Stash) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            version,
            description: description.into(),
            up: Some(Box::new(up)),
            down: Some(Box::new(down)),
        }
    }

    /// Build a migration from optional parts. [`MigrationManager::validate`]
    /// reports a missing body as an error.
    ///
    /// [`MigrationManager::validate`]: super::MigrationManager::validate
    pub fn from_parts(
        version: u32,
        description: impl Into<String>,
        up: Option<MigrationFn>,
        down: Option<MigrationFn>,
    ) -> Self {
        Self {
            version,
            description: description.into(),
            up,
            down,
        }
    }

    /// A migration that rewrites every item under `key_prefix` from shape
    /// `Old` to shape `New`, and back on rollback.
    ///
    /// Each direction runs as one all-or-nothing batch. A record that does
    /// not deserialize into the expected shape fails the step with
    /// `StashError::Migration` and nothing is written.
    pub fn typed<Old, New, U, D>(
        version: u32,
        description: impl Into<String>,
        key_prefix: impl Into<String>,
        up: U,
        down: D,
    ) -> Self
    where
        Old: DeserializeOwned + Serialize + 'static,
        New: DeserializeOwned + Serialize + 'static,
        U: Fn(Old) -> New + Send + Sync + 'static,
        D: Fn(New) -> Old + Send + Sync + 'static,
    {
        let prefix = key_prefix.into();
        let down_prefix = prefix.clone();
        Self {
            version,
            description: description.into(),
            up: Some(Box::new(move |stash: &Stash| {
                rewrite::<Old, New, _>(stash, version, &prefix, &up)
            })),
            down: Some(Box::new(move |stash: &Stash| {
                rewrite::<New, Old, _>(stash, version, &down_prefix, &down)
            })),
        }
    }

    /// BLAKE3 of `"{version}:{description}"`, hex encoded.
    pub fn checksum(&self) -> String {
        blake3::hash(format!("{}:{}", self.version, self.description).as_bytes())
            .to_hex()
            .to_string()
    }

    pub fn has_up(&self) -> bool {
        self.up.is_some()
    }

    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    pub(crate) fn run(&self, direction: MigrationDirection, stash: &Stash) -> Result<()> {
        let (body, name) = match direction {
            MigrationDirection::Up => (self.up.as_ref(), "up"),
            MigrationDirection::Down => (self.down.as_ref(), "down"),
        };
        let body = body.ok_or_else(|| StashError::Migration {
            version: self.version,
            message: format!("No {} step defined", name),
        })?;
        body(stash).map_err(|err| match err {
            err @ StashError::Migration { .. } => err,
            other => StashError::Migration {
                version: self.version,
                message: other.to_string(),
            },
        })
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .finish()
    }
}

fn rewrite<A, B, F>(stash: &Stash, version: u32, prefix: &str, transform: &F) -> Result<()>
where
    A: DeserializeOwned,
    B: Serialize,
    F: Fn(A) -> B,
{
    let mut ops = Vec::new();
    for item in stash.items()? {
        if !item.key.starts_with(prefix) {
            continue;
        }
        let record: A = serde_json::from_value(item.value).map_err(|e| StashError::Migration {
            version,
            message: format!("Record {} does not match the expected shape: {}", item.key, e),
        })?;
        ops.push(BulkOp::Set {
            key: item.key,
            value: serde_json::to_value(transform(record))?,
            tags: item.metadata.tags.into_iter().collect(),
        });
    }
    stash.bulk(&ops)?;
    Ok(())
}
