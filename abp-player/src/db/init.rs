//! Database initialization
//!
//! Creates the state table on startup; idempotent so repeated launches and
//! tests can call it freely.

use crate::error::Result;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Create the `player_state` key-value table if it does not exist.
pub async fn initialize(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS player_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("State database initialized");
    Ok(())
}
