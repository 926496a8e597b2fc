// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod dump;
pub mod inspect;
pub mod tail;

use std::path::Path;

use spool::{Log, LogConfig, OpenMode};

/// Every command reads; none of them may hold the appender.
pub(crate) fn open_read_only(dir: &Path) -> anyhow::Result<Log> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a log directory", dir.display());
    }
    let log = Log::open(dir, OpenMode::ReadOnly, LogConfig::default())?;
    Ok(log)
}
