use serde_json::Value;

use stash_core::StashError;

use crate::app::AppContext;
use crate::cli::{GetArgs, KeyArgs, RestoreVersionArgs, SetArgs};
use crate::output::{history_table, print_json};

/// Parse a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn handle_set(ctx: &AppContext, args: &SetArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let metadata = stash.set(&args.key, parse_value(&args.value), args.tag.as_slice())?;
    if !ctx.quiet() {
        println!("Stored {} (version {})", args.key, metadata.version);
    }
    Ok(())
}

pub fn handle_get(ctx: &AppContext, args: &GetArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let item = stash
        .get_item(&args.key)?
        .ok_or_else(|| StashError::not_found(format!("key {}", args.key)))?;
    if args.json {
        return print_json(&item);
    }
    match &item.value {
        Value::String(text) => println!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

pub fn handle_delete(ctx: &AppContext, args: &KeyArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    if !stash.delete(&args.key)? {
        return Err(StashError::not_found(format!("key {}", args.key)).into());
    }
    if !ctx.quiet() {
        println!("Deleted {}", args.key);
    }
    Ok(())
}

pub fn handle_history(ctx: &AppContext, args: &KeyArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let records = stash.history(&args.key)?;
    if records.is_empty() {
        if !ctx.quiet() {
            println!("No history for {}", args.key);
        }
        return Ok(());
    }
    println!("{}", history_table(&records));
    Ok(())
}

pub fn handle_restore_version(ctx: &AppContext, args: &RestoreVersionArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let metadata = stash.restore_version(&args.key, args.version)?;
    if !ctx.quiet() {
        println!(
            "Restored {} to version {} (now version {})",
            args.key, args.version, metadata.version
        );
    }
    Ok(())
}
