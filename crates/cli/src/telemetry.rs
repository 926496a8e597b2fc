// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging. Output goes to stderr so dumps on stdout stay clean.
pub fn init_telemetry() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "spool=warn,spool_cli=info".into());
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
