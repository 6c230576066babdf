//! Label file rows, keyed by canonical tracking number

use chrono::NaiveDate;
use labelsync_common::Result;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

/// One `tracking_file` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingFile {
    pub tracking_no: String,
    pub file_path: String,
    pub uploaded_at: String,
}

impl TrackingFile {
    fn from_row(row: SqliteRow) -> Self {
        Self {
            tracking_no: row.get("tracking_no"),
            file_path: row.get("file_path"),
            uploaded_at: row.get("uploaded_at"),
        }
    }
}

/// Insert or update the file for a tracking number
pub async fn upsert_file(
    conn: &mut SqliteConnection,
    tracking_no: &str,
    file_path: &str,
    uploaded_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracking_file (tracking_no, file_path, uploaded_at)
        VALUES (?, ?, ?)
        ON CONFLICT(tracking_no) DO UPDATE SET
            file_path = excluded.file_path,
            uploaded_at = excluded.uploaded_at
        "#,
    )
    .bind(tracking_no)
    .bind(file_path)
    .bind(uploaded_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Load the file row for a canonical tracking number
pub async fn get_file(pool: &SqlitePool, tracking_no: &str) -> Result<Option<TrackingFile>> {
    let row = sqlx::query(
        "SELECT tracking_no, file_path, uploaded_at FROM tracking_file WHERE tracking_no = ?",
    )
    .bind(tracking_no)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(TrackingFile::from_row))
}

/// All file rows ordered by tracking number
pub async fn list_files(pool: &SqlitePool) -> Result<Vec<TrackingFile>> {
    let rows = sqlx::query(
        "SELECT tracking_no, file_path, uploaded_at FROM tracking_file ORDER BY tracking_no",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(TrackingFile::from_row).collect())
}

/// Page of file rows whose tracking number contains `filter`, newest first
pub async fn search_files(
    pool: &SqlitePool,
    filter: &str,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<TrackingFile>)> {
    let total = sqlx::query_scalar("SELECT COUNT(*) FROM tracking_file WHERE instr(tracking_no, ?) > 0")
        .bind(filter)
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT tracking_no, file_path, uploaded_at
        FROM tracking_file
        WHERE instr(tracking_no, ?) > 0
        ORDER BY uploaded_at DESC, tracking_no
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(filter)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((total, rows.into_iter().map(TrackingFile::from_row).collect()))
}

/// Number of stored file rows
pub async fn count_files(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM tracking_file")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Files uploaded within `[start, end)`, ordered by tracking number
pub async fn files_uploaded_between(
    pool: &SqlitePool,
    start: &str,
    end: &str,
) -> Result<Vec<TrackingFile>> {
    let rows = sqlx::query(
        r#"
        SELECT tracking_no, file_path, uploaded_at
        FROM tracking_file
        WHERE uploaded_at >= ? AND uploaded_at < ?
        ORDER BY tracking_no
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(TrackingFile::from_row).collect())
}

/// Distinct UTC calendar days that have at least one upload
pub async fn upload_days(pool: &SqlitePool) -> Result<Vec<NaiveDate>> {
    let days: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT substr(uploaded_at, 1, 10) FROM tracking_file")
            .fetch_all(pool)
            .await?;

    Ok(days
        .iter()
        .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .collect())
}

/// Files uploaded before `cutoff`
pub async fn files_uploaded_before(
    conn: &mut SqliteConnection,
    cutoff: &str,
) -> Result<Vec<TrackingFile>> {
    let rows = sqlx::query(
        "SELECT tracking_no, file_path, uploaded_at FROM tracking_file WHERE uploaded_at < ?",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(TrackingFile::from_row).collect())
}

/// Files whose tracking number contains `filter` (empty matches all)
pub async fn files_matching(conn: &mut SqliteConnection, filter: &str) -> Result<Vec<TrackingFile>> {
    let rows = sqlx::query(
        "SELECT tracking_no, file_path, uploaded_at FROM tracking_file WHERE instr(tracking_no, ?) > 0",
    )
    .bind(filter)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(TrackingFile::from_row).collect())
}

/// Remove one file row
pub async fn delete_file(conn: &mut SqliteConnection, tracking_no: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tracking_file WHERE tracking_no = ?")
        .bind(tracking_no)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
