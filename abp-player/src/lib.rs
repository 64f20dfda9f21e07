//! # Audiobook Player Daemon Library (abp-player)
//!
//! Playback and position engine for a fixed list of audiobooks, driven by
//! an external signal-controlled decoder process.
//!
//! **Purpose:** Control the decoder subprocess (start/pause/resume/stop/
//! seek-by-restart), compute the playback position from timestamps without
//! ever querying the decoder, auto-pause on a stackable sleep timer, detect
//! natural end-of-book, and persist `{book index, position}` durably so
//! playback resumes exactly where it left off after a restart.
//!
//! **Architecture:** One foreground control path (discrete input actions)
//! plus two background tasks (completion/sleep monitor, autosave), all
//! synchronized through a single session lock. Unix-only: pause/resume are
//! delivered as stop/continue signals to the decoder's process group.

pub mod db;
pub mod error;
pub mod input;
pub mod playback;

pub use error::{Error, Result};
pub use playback::engine::PlaybackEngine;
