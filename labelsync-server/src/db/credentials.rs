//! Client access credentials
//!
//! A credential is a six digit code shared by one or more client
//! installations. New codes are stored as SHA-256 hex only; `code_plain` is
//! still honoured for rows created by older deployments.

use labelsync_common::Result;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

/// One `client_credential` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCredential {
    pub id: i64,
    #[serde(skip)]
    pub code_plain: Option<String>,
    #[serde(skip)]
    pub code_hash: Option<String>,
    pub description: String,
    pub active: bool,
    pub created_at: String,
    pub last_used: Option<String>,
    pub fail_count: i64,
    pub locked_until: Option<String>,
}

impl ClientCredential {
    fn from_row(row: SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            code_plain: row.get("code_plain"),
            code_hash: row.get("code_hash"),
            description: row.get("description"),
            active: row.get::<i64, _>("active") != 0,
            created_at: row.get("created_at"),
            last_used: row.get("last_used"),
            fail_count: row.get("fail_count"),
            locked_until: row.get("locked_until"),
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, code_plain, code_hash, description, active, created_at, \
                              last_used, fail_count, locked_until FROM client_credential";

/// Active credentials, oldest first
pub async fn list_active(conn: &mut SqliteConnection) -> Result<Vec<ClientCredential>> {
    let rows = sqlx::query(&format!("{} WHERE active = 1 ORDER BY id", SELECT_COLUMNS))
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(ClientCredential::from_row).collect())
}

/// Every credential, oldest first
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<ClientCredential>> {
    let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_COLUMNS))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(ClientCredential::from_row).collect())
}

/// Load one credential
pub async fn get_credential(pool: &SqlitePool, id: i64) -> Result<Option<ClientCredential>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(ClientCredential::from_row))
}

/// Insert a hashed credential and return its id
pub async fn insert_credential(
    pool: &SqlitePool,
    code_hash: &str,
    description: &str,
    created_at: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO client_credential (code_hash, description, active, created_at, fail_count)
        VALUES (?, ?, 1, ?, 0)
        "#,
    )
    .bind(code_hash)
    .bind(description)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Successful verification: clear failure state and stamp last use
pub async fn record_success(conn: &mut SqliteConnection, id: i64, used_at: &str) -> Result<()> {
    sqlx::query(
        "UPDATE client_credential SET fail_count = 0, locked_until = NULL, last_used = ? WHERE id = ?",
    )
    .bind(used_at)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Store the failure counter and lock state computed by the caller
pub async fn record_failure(
    conn: &mut SqliteConnection,
    id: i64,
    fail_count: i64,
    locked_until: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE client_credential SET fail_count = ?, locked_until = ? WHERE id = ?")
        .bind(fail_count)
        .bind(locked_until)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Enable or disable a credential; returns false for unknown ids
pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE client_credential SET active = ? WHERE id = ?")
        .bind(active as i64)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove a credential; returns false for unknown ids
pub async fn delete_credential(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM client_credential WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
