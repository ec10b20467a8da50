use stash_core::{RestoreFilter, RestoreOptions, StashError};

use crate::app::AppContext;
use crate::cli::{BackupCommand, BackupRestoreArgs};
use crate::output::{backups_table, print_json};

pub fn handle_backup(ctx: &AppContext, command: &BackupCommand) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let backups = ctx.backups(stash)?;

    match command {
        BackupCommand::Create { incremental } => {
            let metadata = match incremental {
                Some(base) => backups.create_incremental_backup(base)?,
                None => backups.create_backup()?,
            };
            if ctx.quiet() {
                println!("{}", metadata.id);
            } else {
                println!(
                    "Created backup {} ({} items)",
                    metadata.id, metadata.item_count
                );
            }
        }
        BackupCommand::List { json } => {
            let list = backups.list_backups()?;
            if *json {
                return print_json(&list);
            }
            if list.is_empty() {
                if !ctx.quiet() {
                    println!("No backups");
                }
            } else {
                println!("{}", backups_table(&list));
            }
        }
        BackupCommand::Verify { id } => {
            let report = backups.verify(id)?;
            for warning in &report.warnings {
                eprintln!("Warning: {}", warning);
            }
            for issue in &report.issues {
                eprintln!("Issue: {}", issue);
            }
            if !report.is_valid() {
                return Err(anyhow::anyhow!("Backup {} failed verification", id));
            }
            if !ctx.quiet() {
                println!(
                    "Backup {} is valid ({} items, checksum {})",
                    id, report.item_count, report.checksum
                );
            }
        }
        BackupCommand::Restore(args) => {
            let report = backups.restore(&args.id, &restore_options(args))?;
            if ctx.quiet() {
                return Ok(());
            }
            let prefix = if report.dry_run { "Would restore" } else { "Restored" };
            println!(
                "{} {} items from {} ({} skipped)",
                prefix, report.restored, report.backup_id, report.skipped
            );
            for (from, to) in &report.renamed {
                println!("  {} -> {}", from, to);
            }
            if !report.conflicts.is_empty() {
                println!(
                    "{} existing keys left untouched: {}",
                    report.conflicts.len(),
                    report.conflicts.join(", ")
                );
            }
            if let Some(id) = &report.pre_restore_backup {
                println!("Previous state saved as backup {}", id);
            }
        }
        BackupCommand::Delete { id } => {
            if !backups.delete_backup(id)? {
                return Err(StashError::not_found(format!("backup {}", id)).into());
            }
            if !ctx.quiet() {
                println!("Deleted backup {}", id);
            }
        }
    }
    Ok(())
}

pub fn restore_options(args: &BackupRestoreArgs) -> RestoreOptions {
    let filter = if args.prefix.is_some() || !args.tag.is_empty() {
        Some(RestoreFilter {
            key_prefix: args.prefix.clone(),
            tags: args.tag.clone(),
        })
    } else {
        None
    };
    RestoreOptions {
        overwrite: args.overwrite,
        merge: args.merge.is_some(),
        conflict_resolution: args.merge.map(Into::into).unwrap_or_default(),
        dry_run: args.dry_run,
        filter,
    }
}
