//! Pipeline state database (SQLite).
//!
//! Holds the scheduler's checkpoints and the per-document pipeline states.
//! Nothing here is authoritative for search: the index store is. Losing the
//! database only means the next schedule run starts without a watermark.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DbConfig;
use crate::error::Result;

/// Checkpoint name of the feed watermark.
pub const FEED_CHECKPOINT: &str = "feed";

pub async fn connect(config: &DbConfig) -> Result<SqlitePool> {
    let db_path = &config.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<String>> {
    let result: Option<String> = sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
        .bind(source)
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

pub async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor: &str) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// The feed watermark, if one has been recorded and is readable.
pub async fn get_watermark(pool: &SqlitePool) -> Result<Option<DateTime<Utc>>> {
    Ok(get_checkpoint(pool, FEED_CHECKPOINT).await?.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| tracing::warn!(cursor = %s, error = %e, "ignoring unreadable feed watermark"))
            .ok()
    }))
}

pub async fn set_watermark(pool: &SqlitePool, watermark: DateTime<Utc>) -> Result<()> {
    set_checkpoint(pool, FEED_CHECKPOINT, &watermark.to_rfc3339()).await
}
