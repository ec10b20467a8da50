//! Table output for listings.

use chrono::{DateTime, Local, Utc};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;

use stash_core::{BackupMetadata, StashStats, VersionRecord};

const SUMMARY_WIDTH: usize = 60;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());
    table
}

/// Local time, to the second.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One-line rendering of a JSON value, truncated for table cells.
pub fn value_summary(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if text.chars().count() > SUMMARY_WIDTH {
        let cut: String = text.chars().take(SUMMARY_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

pub fn history_table(records: &[VersionRecord]) -> String {
    let mut table = new_table(&["Version", "Recorded", "Size", "Tags", "Value"]);
    for record in records {
        let meta = &record.snapshot.metadata;
        table.add_row(vec![
            record.version.to_string(),
            format_timestamp(&record.timestamp),
            meta.size.to_string(),
            meta.tags.iter().cloned().collect::<Vec<_>>().join(", "),
            value_summary(&record.snapshot.value),
        ]);
    }
    table.to_string()
}

pub fn backups_table(backups: &[BackupMetadata]) -> String {
    let mut table = new_table(&["ID", "Created", "Type", "Items", "Size", "Flags"]);
    for backup in backups {
        let kind = match &backup.base_backup {
            Some(base) => format!("incremental of {}", base),
            None => "full".to_string(),
        };
        let mut flags = Vec::new();
        if backup.compressed {
            flags.push("compressed");
        }
        if backup.encrypted {
            flags.push("encrypted");
        }
        table.add_row(vec![
            backup.id.clone(),
            format_timestamp(&backup.created),
            kind,
            backup.item_count.to_string(),
            backup.size.to_string(),
            flags.join(", "),
        ]);
    }
    table.to_string()
}

/// Columns are the top-level fields of the rows, in first-seen order.
pub fn query_table(rows: &[Value]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for field in map.keys() {
                if !columns.contains(field) {
                    columns.push(field.clone());
                }
            }
        }
    }

    let headers: Vec<&str> = columns.iter().map(String::as_str).collect();
    let mut table = new_table(&headers);
    for row in rows {
        table.add_row(
            columns
                .iter()
                .map(|column| row.get(column).map(value_summary).unwrap_or_default())
                .collect::<Vec<_>>(),
        );
    }
    table.to_string()
}

pub fn stats_table(stats: &StashStats) -> String {
    let mut table = new_table(&["Metric", "Value"]);
    let rows = [
        ("Items", stats.item_count.to_string()),
        ("Versions", stats.version_count.to_string()),
        ("Total size (bytes)", stats.total_size.to_string()),
        ("Encrypted items", stats.encrypted_items.to_string()),
        ("Compressed items", stats.compressed_items.to_string()),
        ("Quota limit (bytes)", stats.quota_limit.to_string()),
        ("Quota used", format!("{:.1}%", stats.quota_used_percent)),
        ("Schema version", stats.schema_version.to_string()),
    ];
    for (metric, value) in rows {
        table.add_row(vec![metric.to_string(), value]);
    }
    table.to_string()
}
