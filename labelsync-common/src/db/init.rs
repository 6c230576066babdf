//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates every table the
//! server uses. All statements are idempotent and safe on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets client reads proceed while an import is writing
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all labelsync tables on an existing pool
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_meta_table(pool).await?;
    create_order_mapping_table(pool).await?;
    create_tracking_file_table(pool).await?;
    create_client_credential_table(pool).await?;
    Ok(())
}

/// Key/value store; holds `mapping_version`
async fn create_meta_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_order_mapping_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_mapping (
            order_id TEXT PRIMARY KEY,
            tracking_no TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_order_mapping_tracking ON order_mapping(tracking_no)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tracking_file_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracking_file (
            tracking_no TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            uploaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracking_file_uploaded ON tracking_file(uploaded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Shared access codes used by client installations
///
/// A credential carries either the plain code (legacy rows) or its
/// SHA-256 hex digest.
async fn create_client_credential_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS client_credential (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code_plain TEXT,
            code_hash TEXT,
            description TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            last_used TEXT,
            fail_count INTEGER NOT NULL DEFAULT 0,
            locked_until TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
