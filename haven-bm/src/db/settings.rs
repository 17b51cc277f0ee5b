//! Settings table accessors
//!
//! Key-value pairs stored as text and parsed on read.

use haven_common::{Error, Result};
use sqlx::SqlitePool;

/// Read a setting; `None` if the key is absent
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("setting {} = {:?}: {}", key, value, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Read a setting, writing `default` back when it is absent
pub async fn ensure_setting<T>(db: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display + Clone,
    T::Err: std::fmt::Display,
{
    match get_setting::<T>(db, key).await? {
        Some(value) => Ok(value),
        None => {
            set_setting(db, key, default.clone()).await?;
            tracing::debug!("Initialized setting {} = {}", key, default);
            Ok(default)
        }
    }
}
