//! Stash CLI - command-line access to an embedded, versioned key-value store
//!
//! Thin layer over `stash-core`: argument parsing, config file handling,
//! passphrase prompts and output formatting.

mod app;
mod cli;
mod commands;
mod config;
mod constants;
mod output;

use clap::Parser;
use stash_core::StashError;
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::cli::{Cli, Commands};
use crate::constants::exit_codes;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

/// Log to stderr, filtered by STASH_LOG (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("STASH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init(args) => return commands::init::handle_init(cli, args),
        Commands::Completions { shell } => return commands::misc::handle_completions(*shell),
        _ => {}
    }

    let ctx = AppContext::new(cli)?;
    match &cli.command {
        Commands::Set(args) => commands::items::handle_set(&ctx, args),
        Commands::Get(args) => commands::items::handle_get(&ctx, args),
        Commands::Delete(args) => commands::items::handle_delete(&ctx, args),
        Commands::History(args) => commands::items::handle_history(&ctx, args),
        Commands::RestoreVersion(args) => commands::items::handle_restore_version(&ctx, args),
        Commands::Query(args) => commands::query::handle_query(&ctx, args),
        Commands::Export(args) => commands::transfer::handle_export(&ctx, args),
        Commands::Import(args) => commands::transfer::handle_import(&ctx, args),
        Commands::Stats => commands::maintenance::handle_stats(&ctx),
        Commands::Vacuum => commands::maintenance::handle_vacuum(&ctx),
        Commands::Clear(args) => commands::maintenance::handle_clear(&ctx, args),
        Commands::Backup(command) => commands::backup::handle_backup(&ctx, command),
        Commands::Migrate(command) => commands::migrate::handle_migrate(&ctx, command),
        Commands::Init(_) | Commands::Completions { .. } => Ok(()),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<StashError>() {
        Some(StashError::NotFound(_)) => exit_codes::NOT_FOUND,
        Some(StashError::InvalidInput(_)) | Some(StashError::Validation(_)) => {
            exit_codes::INVALID_INPUT
        }
        Some(StashError::IncorrectPassphrase) => exit_codes::AUTH_FAILED,
        Some(StashError::BackupCorruption { .. }) => exit_codes::INTEGRITY_FAILED,
        Some(StashError::QuotaExceeded { .. }) => exit_codes::QUOTA_EXCEEDED,
        _ => 1,
    }
}
