//! Error taxonomy for the telemetry engine.
//!
//! Hot-path failures (queue overflow, timestamp regressions, unrealistic
//! bursts) never surface as errors; they are logged or converted into
//! domain events. Everything here belongs to the control plane: startup,
//! storage, sync, configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Input devices exist but none can be opened by this process.
    #[error("permission denied opening input devices ({denied} of {scanned} scanned): is the user in the 'input' group?")]
    PermissionDenied { scanned: usize, denied: usize },

    /// Device enumeration found nothing that looks like a keyboard.
    #[error("no usable keyboard input devices found under /dev/input")]
    NoInputDevices,

    /// The OS secret store is not available, so the master key cannot be fetched.
    #[error("OS keyring unavailable: {0}")]
    KeyringUnavailable(String),

    /// The local database exists but cannot be opened with the current key.
    /// The caller renames the file and starts fresh; the path names the backup.
    #[error("local database could not be decrypted; moved aside to {backup}")]
    DecryptFailure { backup: PathBuf },

    /// Transient storage fault that survived the retry budget.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Unrecoverable storage fault (corruption, disk full).
    #[error("fatal storage error: {0}")]
    StorageFatal(String),

    /// Remote store unreachable or the wire protocol failed mid-sync.
    #[error("sync network error: {0}")]
    SyncNetwork(#[from] postgres::Error),

    /// A row was skipped during merge because its conflict could not be
    /// resolved (e.g. missing last-updated timestamp).
    #[error("unresolvable sync conflict in table {table}: {detail}")]
    SyncConflict { table: String, detail: String },

    /// A second sync was requested while one is already running.
    #[error("sync already in progress")]
    SyncInProgress,

    /// Configuration rejected at load or live-update time.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
