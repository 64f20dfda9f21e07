//! State store: durable playback position persistence
//!
//! Read/write the playback state record from the `player_state` table
//! (key-value store). The active record is `{book_index, position_seconds}`;
//! one auxiliary `book_position_<i>` key per book remembers where each book
//! was left, so switching back to a book resumes it rather than restarting.
//!
//! SQLite transactions give the atomic-write guarantee: a crash mid-save
//! never leaves a partial record. Values are stored as strings and parsed
//! with `FromStr`; unparseable content is reported as `CorruptState` and
//! the caller substitutes defaults.

use crate::error::{Error, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const KEY_BOOK_INDEX: &str = "book_index";
const KEY_POSITION_SECONDS: &str = "position_seconds";

/// The durable playback record: active book and its position.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    /// Index into the configured book list
    pub book_index: usize,
    /// Position within the active book, in seconds
    pub position_seconds: f64,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            book_index: 0,
            position_seconds: 0.0,
        }
    }
}

/// SQLite-backed store for [`PersistedState`].
pub struct StateStore {
    pool: Pool<Sqlite>,
}

impl StateStore {
    /// Open (creating if necessary) the state database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&db_url)
            .await?;

        info!("Opened state database: {}", path.display());
        Self::with_pool(pool).await
    }

    /// Build a store over an existing pool (used by tests with
    /// `sqlite::memory:`).
    pub async fn with_pool(pool: Pool<Sqlite>) -> Result<Self> {
        super::init::initialize(&pool).await?;
        Ok(Self { pool })
    }

    /// Load the persisted record.
    ///
    /// Returns `Ok(None)` when no record has ever been saved. Malformed
    /// content fails with [`Error::CorruptState`]; the caller falls back to
    /// defaults.
    pub async fn load(&self) -> Result<Option<PersistedState>> {
        let book_index: Option<usize> = self.get_value(KEY_BOOK_INDEX).await?;
        let position_seconds: Option<f64> = self.get_value(KEY_POSITION_SECONDS).await?;

        match (book_index, position_seconds) {
            (None, None) => Ok(None),
            (Some(book_index), Some(position_seconds)) => {
                if position_seconds < 0.0 {
                    return Err(Error::CorruptState(format!(
                        "negative position: {}",
                        position_seconds
                    )));
                }
                Ok(Some(PersistedState {
                    book_index,
                    position_seconds,
                }))
            }
            _ => Err(Error::CorruptState(
                "partial record: one of book_index/position_seconds missing".to_string(),
            )),
        }
    }

    /// Load the persisted record, substituting defaults if the record is
    /// missing or corrupt. Database-level failures still propagate.
    pub async fn load_or_default(&self) -> Result<PersistedState> {
        match self.load().await {
            Ok(Some(state)) => {
                info!(
                    "Loaded state: book {}, position {:.1}s",
                    state.book_index, state.position_seconds
                );
                Ok(state)
            }
            Ok(None) => {
                info!("No saved state found, starting fresh");
                Ok(PersistedState::default())
            }
            Err(Error::CorruptState(reason)) => {
                warn!("Discarding corrupt state ({}), starting fresh", reason);
                Ok(PersistedState::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save the record atomically.
    ///
    /// Writes the active record and the per-book resume position for
    /// `state.book_index` in one transaction. Failures are reported as
    /// [`Error::Persist`] so callers can log and retry on the next cycle.
    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Persist)?;

        let entries = [
            (KEY_BOOK_INDEX.to_string(), state.book_index.to_string()),
            (
                KEY_POSITION_SECONDS.to_string(),
                state.position_seconds.to_string(),
            ),
            (
                book_position_key(state.book_index),
                state.position_seconds.to_string(),
            ),
        ];

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO player_state (key, value, updated_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(key) DO UPDATE
                SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(Error::Persist)?;
        }

        tx.commit().await.map_err(Error::Persist)
    }

    /// Last persisted position of a book, 0 if it was never played.
    pub async fn book_position(&self, index: usize) -> Result<f64> {
        let position: Option<f64> = self.get_value(&book_position_key(index)).await?;
        match position {
            Some(p) if p >= 0.0 => Ok(p),
            Some(p) => Err(Error::CorruptState(format!("negative position: {}", p))),
            None => Ok(0.0),
        }
    }

    /// Generic value getter: `None` if the key is absent, `CorruptState` if
    /// the stored value cannot be parsed.
    async fn get_value<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM player_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(raw) => match raw.parse::<T>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Err(Error::CorruptState(format!(
                    "failed to parse '{}' value: {}",
                    key, raw
                ))),
            },
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) async fn raw_set(&self, key: &str, value: &str) {
        sqlx::query(
            "INSERT INTO player_state (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .unwrap();
    }
}

fn book_position_key(index: usize) -> String {
    format!("book_position_{}", index)
}
