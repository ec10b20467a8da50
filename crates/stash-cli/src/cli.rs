//! Command-line argument definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use stash_core::{ConflictResolution, VERSION};

/// Stash - an embedded, versioned key-value store
#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the store database
    #[arg(short, long, global = true, env = "STASH_PATH")]
    pub store: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a store and write the config file
    Init(InitArgs),

    /// Store a JSON value under a key
    Set(SetArgs),

    /// Print the value stored under a key
    Get(GetArgs),

    /// Delete a key
    Delete(KeyArgs),

    /// List retained versions of a key
    History(KeyArgs),

    /// Write a retained version back as the current value
    RestoreVersion(RestoreVersionArgs),

    /// Filter, sort and page stored items
    Query(QueryArgs),

    /// Export every item to stdout or a file
    Export(ExportArgs),

    /// Import items from a JSON export
    Import(ImportArgs),

    /// Show store statistics
    Stats,

    /// Prune version history and compact the database
    Vacuum,

    /// Remove every item; history is kept
    Clear(ClearArgs),

    /// Manage backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Inspect migrations
    #[command(subcommand)]
    Migrate(MigrateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct InitArgs {
    /// Where to create the store (defaults to the data directory)
    #[arg(value_name = "PATH")]
    pub path: Option<String>,

    /// Compress new values with zstd
    #[arg(long)]
    pub compress: bool,

    /// Encrypt new values; a passphrase-protected keystore holds the key
    #[arg(long)]
    pub encrypt: bool,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct SetArgs {
    pub key: String,

    /// JSON value (bare words are stored as strings)
    pub value: String,

    /// Tags to attach
    #[arg(short, long, value_name = "TAG")]
    pub tag: Vec<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,

    /// Print the full item including metadata as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct RestoreVersionArgs {
    pub key: String,

    /// Version number from `stash history`
    #[arg(id = "target_version", value_name = "VERSION")]
    pub version: u64,
}

#[derive(Args)]
pub struct QueryArgs {
    /// Exact-match filter as `path=value`, e.g. `metadata.tags=work`
    #[arg(short, long = "where", value_name = "PATH=VALUE")]
    pub filters: Vec<String>,

    /// Sort as `path[:asc|:desc]`
    #[arg(long, value_name = "PATH[:DIR]")]
    pub order_by: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Fields to project (repeatable)
    #[arg(long, value_name = "PATH")]
    pub select: Vec<String>,

    /// Print rows as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(Args)]
pub struct ExportArgs {
    #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,

    /// Write to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,
}

#[derive(Args)]
pub struct ImportArgs {
    /// JSON export file (`-` for stdin)
    pub file: String,
}

#[derive(Args)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Take a full backup, or an incremental one on top of a full backup
    Create {
        /// Base backup id for an incremental backup
        #[arg(long, value_name = "BASE_ID")]
        incremental: Option<String>,
    },

    /// List backups, oldest first
    List {
        #[arg(long)]
        json: bool,
    },

    /// Check a backup's checksum and structure
    Verify { id: String },

    /// Restore a backup into the store
    Restore(BackupRestoreArgs),

    /// Delete a backup
    Delete { id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MergeMode {
    Skip,
    Overwrite,
    Rename,
}

impl From<MergeMode> for ConflictResolution {
    fn from(mode: MergeMode) -> Self {
        match mode {
            MergeMode::Skip => ConflictResolution::Skip,
            MergeMode::Overwrite => ConflictResolution::Overwrite,
            MergeMode::Rename => ConflictResolution::Rename,
        }
    }
}

#[derive(Args)]
pub struct BackupRestoreArgs {
    pub id: String,

    /// Replace keys that already exist
    #[arg(long, conflicts_with = "merge")]
    pub overwrite: bool,

    /// Resolve existing keys instead of reporting them
    #[arg(long, value_enum, value_name = "MODE")]
    pub merge: Option<MergeMode>,

    /// Only restore keys with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Only restore items carrying one of these tags
    #[arg(short, long, value_name = "TAG")]
    pub tag: Vec<String>,

    /// Report what would happen without writing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum MigrateCommand {
    /// Show the schema version and applied migrations
    Status {
        #[arg(long)]
        json: bool,
    },
}
