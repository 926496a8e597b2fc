// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use std::path::Path;

use spool::config::INDEX_FILE_NAME;
use spool::storage::index;
use spool::Log;

use super::open_read_only;

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let log = open_read_only(dir)?;

    println!("\nSpool Log Report: {}", dir.display());
    println!("--------------------");
    println!("Records:     {}", log.len()?);
    println!("First index: {}", log.first_index()?);
    println!("Index file:  {}", index_status(dir));
    println!();
    println!("{}", segment_table(&log)?);
    Ok(())
}

/// One row per retained segment.
pub fn segment_table(log: &Log) -> anyhow::Result<Table> {
    let segments = log.segments()?;
    let tail = log.len()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Segment", "First Index", "Records", "Used", "Capacity", "Modified"]);

    for (i, info) in segments.iter().enumerate() {
        // a segment ends where the next one begins; the last one ends at the tail
        let end = segments.get(i + 1).map_or(tail, |next| next.first_index);
        let records = end.saturating_sub(info.first_index);
        let modified = std::fs::metadata(&info.path)
            .and_then(|m| m.modified())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|_| "?".to_string());
        table.add_row(vec![
            info.id.0.to_string(),
            info.first_index.to_string(),
            records.to_string(),
            format!("{} ({:.1}%)", info.used, info.used as f64 * 100.0 / info.capacity as f64),
            info.capacity.to_string(),
            modified,
        ]);
    }
    Ok(table)
}

fn index_status(dir: &Path) -> String {
    let path = dir.join(INDEX_FILE_NAME);
    if !path.exists() {
        return "MISSING (rebuilt by scan)".to_string();
    }
    match index::read_all(&path) {
        Ok(entries) => format!("{} entries", entries.len()),
        Err(e) => format!("CORRUPT ({})", e),
    }
}
