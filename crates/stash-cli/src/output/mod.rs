//! Output formatting helpers for the CLI.
//!
//! JSON goes through `serde_json`; human-readable listings are rendered
//! as tables with comfy-table.

mod json;
mod table;

pub use json::print_json;
pub use table::{backups_table, format_timestamp, history_table, query_table, stats_table};
