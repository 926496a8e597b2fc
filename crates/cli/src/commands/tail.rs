// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use spool::Tailer;

use super::open_read_only;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Prints the last `lines` records, then keeps printing new ones if `follow` is set.
pub fn run(dir: &Path, lines: u64, follow: bool) -> anyhow::Result<()> {
    let log = open_read_only(dir)?;
    let mut tailer = log.create_tailer();
    let start = log.len()?.saturating_sub(lines).max(log.first_index()?);
    tailer.move_to(start)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    drain(&mut tailer, &mut out)?;
    if !follow {
        return Ok(());
    }

    tracing::info!(index = tailer.index(), "following {}", dir.display());
    loop {
        if drain(&mut tailer, &mut out)? == 0 {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Writes every record currently visible to `tailer` and returns the count.
pub fn drain<W: Write>(tailer: &mut Tailer, out: &mut W) -> anyhow::Result<u64> {
    let mut count = 0;
    while let Some((index, payload)) = tailer.read_indexed()? {
        writeln!(out, "{:>8}  {}", index, payload)?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}
