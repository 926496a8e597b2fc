// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Command-line tooling for inspecting spool log directories.

pub mod commands;
pub mod telemetry;
