use stash_core::MigrationManager;

use crate::app::AppContext;
use crate::cli::MigrateCommand;
use crate::output::{format_timestamp, print_json};

pub fn handle_migrate(ctx: &AppContext, command: &MigrateCommand) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let manager = MigrationManager::new(stash);

    match command {
        MigrateCommand::Status { json } => {
            let status = manager.status(None)?;
            if *json {
                return print_json(&status);
            }
            println!("Schema version: {}", status.current_version);
            if status.applied.is_empty() {
                println!("No migrations applied");
            }
            for applied in &status.applied {
                println!(
                    "  {:>4}  {}  {} ({} ms)",
                    applied.version,
                    format_timestamp(&applied.applied_at),
                    applied.description,
                    applied.duration_ms
                );
            }
            for pending in &status.pending {
                println!("  {:>4}  pending  {}", pending.version, pending.description);
            }
        }
    }
    Ok(())
}
