//! Order → tracking number rows

use labelsync_common::Result;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

/// One `order_mapping` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderMapping {
    pub order_id: String,
    pub tracking_no: String,
    pub updated_at: String,
}

impl OrderMapping {
    fn from_row(row: SqliteRow) -> Self {
        Self {
            order_id: row.get("order_id"),
            tracking_no: row.get("tracking_no"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Insert or update a mapping; returns true when the order id was new
pub async fn upsert_mapping(
    conn: &mut SqliteConnection,
    order_id: &str,
    tracking_no: &str,
    updated_at: &str,
) -> Result<bool> {
    let existed: Option<i64> = sqlx::query_scalar("SELECT 1 FROM order_mapping WHERE order_id = ?")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO order_mapping (order_id, tracking_no, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(order_id) DO UPDATE SET
            tracking_no = excluded.tracking_no,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(order_id)
    .bind(tracking_no)
    .bind(updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(existed.is_none())
}

/// All mappings ordered by order id
pub async fn list_mappings(pool: &SqlitePool) -> Result<Vec<OrderMapping>> {
    let rows = sqlx::query(
        "SELECT order_id, tracking_no, updated_at FROM order_mapping ORDER BY order_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(OrderMapping::from_row).collect())
}

/// Mapping for an exact order id
pub async fn get_mapping(pool: &SqlitePool, order_id: &str) -> Result<Option<OrderMapping>> {
    let row = sqlx::query(
        "SELECT order_id, tracking_no, updated_at FROM order_mapping WHERE order_id = ?",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(OrderMapping::from_row))
}

/// Page of mappings whose order id or tracking number contains `filter`
///
/// Most recently updated first. Returns the total match count with the page.
pub async fn search_mappings(
    pool: &SqlitePool,
    filter: &str,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<OrderMapping>)> {
    let total = sqlx::query_scalar(
        "SELECT COUNT(*) FROM order_mapping WHERE instr(order_id, ?1) > 0 OR instr(tracking_no, ?1) > 0",
    )
    .bind(filter)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT order_id, tracking_no, updated_at
        FROM order_mapping
        WHERE instr(order_id, ?1) > 0 OR instr(tracking_no, ?1) > 0
        ORDER BY updated_at DESC, order_id
        LIMIT ?2 OFFSET ?3
        "#,
    )
    .bind(filter)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((total, rows.into_iter().map(OrderMapping::from_row).collect()))
}

/// Number of stored mappings
pub async fn count_mappings(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM order_mapping")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete mappings last written before `cutoff` (stored timestamp form)
pub async fn delete_mappings_before(conn: &mut SqliteConnection, cutoff: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM order_mapping WHERE updated_at < ?")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Delete mappings whose order id or tracking number contains `filter`
///
/// An empty filter matches every row.
pub async fn purge_mappings(conn: &mut SqliteConnection, filter: &str) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM order_mapping WHERE instr(order_id, ?1) > 0 OR instr(tracking_no, ?1) > 0",
    )
    .bind(filter)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
