use clap::Parser;
use std::path::PathBuf;

/// Local-first typing telemetry engine.
/// Observes keyboard presses via evdev, groups them into bursts, derives
/// per-key/digraph/word statistics, persists them encrypted, and
/// optionally reconciles them with a shared PostgreSQL store.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "Local-first typing telemetry engine.\n\
Observes keyboard presses via evdev (requires membership in the 'input' group),\n\
groups them into bursts of continuous typing, derives per-key, per-digraph,\n\
per-word and per-day statistics, persists them in an encrypted local database,\n\
and optionally reconciles them with a shared PostgreSQL store so the same\n\
numbers appear on every machine.\n\
\n\
EXAMPLES:\n\
  # Run the telemetry daemon with defaults:\n\
  typetrace\n\
\n\
  # Inspect which devices would be monitored:\n\
  typetrace --list-devices\n\
\n\
  # Change a setting (validated, persisted, synced):\n\
  typetrace --set burst_timeout_ms=1500\n\
\n\
  # One-shot sync against the configured remote:\n\
  typetrace --sync-now\n\
\n\
  # Export per-key statistics for March as CSV:\n\
  typetrace --export-csv stats.csv --export-start 2026-03-01 --export-end 2026-03-31\n\
\n\
Logging is controlled with TYPETRACE_LOG (tracing env-filter syntax)."
)]
pub struct Args {
    /// Configuration file (TOML). Defaults to <data-dir>/config.toml.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data directory holding the database, ignore list and PID file.
    /// Defaults to ~/.local/share/typetrace.
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// List usable keyboard input devices and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub list_devices: bool,

    /// Run one sync cycle against the configured remote store and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub sync_now: bool,

    /// Write a KEY=VALUE setting (validated against the schema) and exit.
    #[arg(long, value_name = "KEY=VALUE")]
    pub set: Option<String>,

    /// Add a word to the hashed ignore set (also removes its statistics)
    /// and exit. The word itself is never stored.
    #[arg(long, value_name = "WORD")]
    pub ignore_word: Option<String>,

    /// Export per-key statistics as CSV to the given path and exit.
    #[arg(long, value_name = "FILE")]
    pub export_csv: Option<PathBuf>,

    /// First day (YYYY-MM-DD) included in the CSV export.
    #[arg(long, value_name = "DATE")]
    pub export_start: Option<String>,

    /// Last day (YYYY-MM-DD) included in the CSV export.
    #[arg(long, value_name = "DATE")]
    pub export_end: Option<String>,

    /// Delete bursts, high scores and daily summaries older than the
    /// configured retention window, then exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub retention_sweep: bool,

    /// Wipe all telemetry data (keeps settings) and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub clear_data: bool,
}

pub fn parse_args() -> Args {
    Args::parse()
}
