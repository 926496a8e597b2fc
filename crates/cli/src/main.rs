// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use spool_cli::commands::dump::DumpOptions;
use spool_cli::commands::{dump, inspect, tail};
use spool_cli::telemetry;

#[derive(Parser)]
#[command(name = "spool")]
#[command(about = "Inspect and read spool record logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the segments of a log and how full they are
    Inspect {
        /// Directory holding the log segments
        dir: PathBuf,
    },
    /// Print records in index order
    Dump {
        dir: PathBuf,

        /// One JSON object per line instead of text blocks
        #[arg(long)]
        json: bool,

        /// First index to print
        #[arg(long)]
        from: Option<u64>,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Print the newest records
    Tail {
        dir: PathBuf,

        /// How many existing records to show first
        #[arg(long, short = 'n', default_value_t = 10)]
        lines: u64,

        /// Keep polling for new records
        #[arg(long, short)]
        follow: bool,
    },
}

fn main() -> anyhow::Result<()> {
    telemetry::init_telemetry();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { dir } => inspect::run(&dir),
        Commands::Dump { dir, json, from, limit } => dump::run(&dir, DumpOptions { json, from, limit }),
        Commands::Tail { dir, lines, follow } => tail::run(&dir, lines, follow),
    }
}
