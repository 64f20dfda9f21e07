//! Error types for abp-player
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Background tasks contain and log these; foreground user
//! actions surface them to the orchestration loop.

use thiserror::Error;

/// Main error type for the abp-player daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Decoder executable missing/unusable or audio file path invalid.
    /// Fatal to the requested action; the engine falls back to Stopped.
    #[error("Decoder launch failed: {0}")]
    Launch(String),

    /// Position queried before playback ever began. Programmer error given
    /// correct engine sequencing; treated as a defensive fault.
    #[error("Position queried before playback started")]
    NotStarted,

    /// Persisted state exists but cannot be parsed. Recovered by
    /// substituting defaults (book 0, position 0).
    #[error("Corrupt persisted state: {0}")]
    CorruptState(String),

    /// Durable write failed. Logged and retried on the next autosave
    /// cycle; never blocks playback.
    #[error("State persistence failed: {0}")]
    Persist(#[source] sqlx::Error),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Signal delivery to the decoder process group failed
    #[error("Signal delivery failed: {0}")]
    Signal(String),
}

/// Convenience Result type using abp-player Error
pub type Result<T> = std::result::Result<T, Error>;
