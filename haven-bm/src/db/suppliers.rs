//! Persisted supplier roster

use haven_common::Result;
use sqlx::SqlitePool;

/// Identities ordered by position
pub async fn load_suppliers(db: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(i64, String)> =
        sqlx::query_as("SELECT position, identity FROM suppliers ORDER BY position")
            .fetch_all(db)
            .await?;
    Ok(rows.into_iter().map(|(_, identity)| identity).collect())
}

/// Replace the whole roster in one transaction
pub async fn save_suppliers(db: &SqlitePool, identities: &[String]) -> Result<()> {
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM suppliers").execute(&mut *tx).await?;
    for (position, identity) in identities.iter().enumerate() {
        sqlx::query("INSERT INTO suppliers (position, identity) VALUES (?, ?)")
            .bind(position as i64)
            .bind(identity)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
