// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::io::{self, Write};
use std::path::Path;

use serde_json::json;
use spool::{Log, Payload};

use super::open_read_only;

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    pub json: bool,
    pub from: Option<u64>,
    pub limit: Option<u64>,
}

pub fn run(dir: &Path, options: DumpOptions) -> anyhow::Result<()> {
    let log = open_read_only(dir)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = write_records(&log, options, &mut out)?;
    tracing::info!(records = written, "dump complete");
    Ok(())
}

/// Writes the selected records to `out` and returns how many were written.
pub fn write_records<W: Write>(log: &Log, options: DumpOptions, out: &mut W) -> anyhow::Result<u64> {
    let mut tailer = log.create_tailer();
    if let Some(from) = options.from {
        if !tailer.move_to(from)? {
            anyhow::bail!("index {} is past the end of the log ({} records)", from, log.len()?);
        }
    }

    let mut written = 0u64;
    while options.limit.map_or(true, |limit| written < limit) {
        let Some((index, payload)) = tailer.read_indexed()? else {
            break;
        };
        if options.json {
            let line = json!({
                "index": index,
                "kind": payload.kind().name(),
                "payload": payload_json(&payload)?,
            });
            writeln!(out, "{}", line)?;
        } else {
            writeln!(out, "--- !index {}", index)?;
            writeln!(out, "{}", payload)?;
        }
        written += 1;
    }
    Ok(written)
}

pub(crate) fn payload_json(payload: &Payload) -> anyhow::Result<serde_json::Value> {
    Ok(match payload {
        Payload::Document(doc) => serde_json::to_value(doc)?,
        Payload::Text(text) => serde_json::Value::String(text.clone()),
        Payload::Bytes(bytes) => json!(bytes),
    })
}
