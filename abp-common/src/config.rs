//! Configuration loading for the abplayer daemon
//!
//! Bootstrap configuration comes from a TOML file and cannot change while
//! the daemon is running. The persisted playback state (active book and
//! position) lives in the state database, not here.
//!
//! Settings sources priority:
//! 1. Command-line arguments (`--config`, `--state-db`)
//! 2. Environment variables (`ABP_CONFIG`, `ABP_STATE_DB`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// One audiobook in the fixed, ordered book list.
#[derive(Debug, Clone, Deserialize)]
pub struct BookEntry {
    /// Path to the audio file
    pub path: PathBuf,

    /// Display label used in logs and events (file stem if not given)
    #[serde(default)]
    pub title: Option<String>,
}

impl BookEntry {
    /// Label for logs and events, falling back to the file stem.
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }
}

/// Policy applied when the decoder finishes a book on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvancePolicy {
    /// Continue with the next book, wrapping past the last one
    #[default]
    Wrap,
    /// Stop playback after the last book
    Stop,
}

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime. The daemon must restart
/// to pick up changes to the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Ordered list of audiobooks; the persisted book index points into this
    pub books: Vec<BookEntry>,

    /// Decoder executable used for playback (controlled via process signals)
    #[serde(default = "default_decoder")]
    pub decoder: PathBuf,

    /// Path to the SQLite state database (OS data dir default if not given)
    #[serde(default)]
    pub state_db: Option<PathBuf>,

    /// Seconds to jump on a seek-forward/seek-backward action
    #[serde(default = "default_seek_seconds")]
    pub seek_seconds: u32,

    /// Minutes added per sleep-timer activation
    #[serde(default = "default_sleep_timer_minutes")]
    pub sleep_timer_minutes: u32,

    /// Interval between periodic position saves while playing
    #[serde(default = "default_autosave_interval_seconds")]
    pub autosave_interval_seconds: u64,

    /// What to do when a book plays through to its end
    #[serde(default)]
    pub book_advance: AdvancePolicy,

    /// Directory of announcement clips (`<index + 1>.mp3`), played before a
    /// switched-to book starts. Announcements are disabled if not set.
    #[serde(default)]
    pub announcements_dir: Option<PathBuf>,

    /// Short clip played on pause/resume and sleep-timer activation
    #[serde(default)]
    pub notification_sound: Option<PathBuf>,
}

fn default_decoder() -> PathBuf {
    PathBuf::from("madplay")
}

fn default_seek_seconds() -> u32 {
    60
}

fn default_sleep_timer_minutes() -> u32 {
    15
}

fn default_autosave_interval_seconds() -> u64 {
    5
}

impl PlayerConfig {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation (empty book list, zero intervals).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        let config: PlayerConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse TOML: {}", e)))?;

        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.books.is_empty() {
            return Err(Error::Config("no books configured".to_string()));
        }
        if self.autosave_interval_seconds == 0 {
            return Err(Error::Config(
                "autosave_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.seek_seconds == 0 {
            return Err(Error::Config("seek_seconds must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Book entry for an index, if the index is in range.
    pub fn book(&self, index: usize) -> Option<&BookEntry> {
        self.books.get(index)
    }

    /// Number of configured books.
    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    /// State database path: configured value or the OS-dependent default.
    pub fn state_db_path(&self) -> PathBuf {
        self.state_db
            .clone()
            .unwrap_or_else(default_state_db_path)
    }

    /// Seek step as a signed number of seconds.
    pub fn seek_step_seconds(&self) -> f64 {
        f64::from(self.seek_seconds)
    }

    /// Autosave period as a `Duration`.
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_seconds)
    }

    /// Announcement clip path for a book index (`<index + 1>.mp3`), if
    /// announcements are configured.
    pub fn announcement_clip(&self, index: usize) -> Option<PathBuf> {
        self.announcements_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.mp3", index + 1)))
    }
}

/// OS-dependent default state database path
pub fn default_state_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("abplayer").join("state.db"))
        .unwrap_or_else(|| PathBuf::from("abplayer-state.db"))
}
