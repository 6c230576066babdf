//! Key/value settings table

use labelsync_common::Result;
use sqlx::SqliteConnection;

/// Meta key holding the current mapping version token
pub const MAPPING_VERSION_KEY: &str = "mapping_version";

/// Read a meta value
pub async fn get_meta(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(conn)
        .await?;
    Ok(value)
}

/// Insert or replace a meta value
pub async fn set_meta(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meta (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;
    Ok(())
}
