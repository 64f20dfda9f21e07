//! Durable state persistence
//!
//! SQLite-backed key-value store for the playback state record.

pub mod init;
pub mod state;

pub use state::{PersistedState, StateStore};
