//! Mapping store: order/label associations and the version token
//!
//! Every persisted change to `order_mapping` or `tracking_file` is followed by
//! a version bump before the call returns. Bumps are serialized through one
//! async mutex so tokens are strictly increasing and a later snapshot read
//! always observes the bump that preceded it.

use chrono::{DateTime, Duration, Utc};
use labelsync_common::{normalize_tracking, time, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::{files, mappings, meta, TrackingFile};

/// Rows committed per transaction during batch import
pub const IMPORT_BATCH_SIZE: usize = 200;

/// Result of a single upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Order id or tracking number empty after cleanup; nothing was written
    Skipped,
}

/// One row of an order import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    pub order_id: String,
    pub tracking_no: String,
}

/// Tally of a batch import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total: usize,
}

impl ImportStats {
    /// Rows that reached the database
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Rows removed by the retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub orders_deleted: u64,
    pub files_deleted: u64,
}

/// One entry of the client-facing mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub order_id: String,
    pub tracking_no: String,
    pub updated_at: String,
}

/// Disagreement between mapped tracking numbers and label files on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlignmentReport {
    pub mapping_total: usize,
    pub file_total: usize,
    /// Mapped tracking numbers without a `{key}.pdf` in the labels directory
    pub missing_file: Vec<String>,
    /// Label files no mapping points at
    pub orphan_file: Vec<String>,
}

/// Full mapping as served to clients and written to `data/mapping.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    pub version: String,
    pub mappings: Vec<MappingEntry>,
}

/// Handle to the mapping tables (cheap to clone)
#[derive(Clone)]
pub struct MappingStore {
    pool: SqlitePool,
    snapshot_path: PathBuf,
    version_lock: Arc<Mutex<()>>,
}

impl MappingStore {
    pub fn new(pool: SqlitePool, snapshot_path: PathBuf) -> Self {
        Self {
            pool,
            snapshot_path,
            version_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Insert or update one order mapping
    pub async fn upsert(&self, order_id: &str, tracking_no: &str) -> Result<UpsertOutcome> {
        let order_id = order_id.trim();
        let key = normalize_tracking(tracking_no);
        if order_id.is_empty() || key.is_empty() {
            debug!(order_id, tracking_no, "Skipping mapping with empty key");
            return Ok(UpsertOutcome::Skipped);
        }

        let stamp = time::to_db_timestamp(time::now());
        let mut conn = self.pool.acquire().await?;
        let inserted = mappings::upsert_mapping(&mut conn, order_id, &key, &stamp).await?;
        drop(conn);

        self.bump_version().await?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    /// Import many rows, committing every [`IMPORT_BATCH_SIZE`] rows
    ///
    /// `on_progress(done, total)` runs after each commit. The version is
    /// bumped once at the end when at least one row was written.
    pub async fn upsert_batch<F>(&self, rows: &[ImportRow], mut on_progress: F) -> Result<ImportStats>
    where
        F: FnMut(usize, usize),
    {
        let mut stats = ImportStats {
            total: rows.len(),
            ..ImportStats::default()
        };
        let stamp = time::to_db_timestamp(time::now());

        for (batch_index, batch) in rows.chunks(IMPORT_BATCH_SIZE).enumerate() {
            let mut tx = self.pool.begin().await?;
            for row in batch {
                let order_id = row.order_id.trim();
                let key = normalize_tracking(&row.tracking_no);
                if order_id.is_empty() || key.is_empty() {
                    stats.skipped += 1;
                    continue;
                }
                if mappings::upsert_mapping(&mut tx, order_id, &key, &stamp).await? {
                    stats.inserted += 1;
                } else {
                    stats.updated += 1;
                }
            }
            tx.commit().await?;

            let done = (batch_index * IMPORT_BATCH_SIZE + batch.len()).min(rows.len());
            on_progress(done, rows.len());
        }

        if stats.written() > 0 {
            self.bump_version().await?;
        }

        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "Order import finished"
        );
        Ok(stats)
    }

    /// Record the label file for a tracking number
    ///
    /// Returns the canonical key, or `None` when the tracking number
    /// normalizes to nothing.
    pub async fn record_file(&self, tracking_no: &str, path: &Path) -> Result<Option<String>> {
        let recorded = self
            .record_files(&[(tracking_no.to_string(), path.to_path_buf())])
            .await?;
        Ok(recorded.into_iter().next())
    }

    /// Record several label files in one transaction with a single bump
    ///
    /// Returns the canonical keys that were written, in input order.
    pub async fn record_files(&self, entries: &[(String, PathBuf)]) -> Result<Vec<String>> {
        let stamp = time::to_db_timestamp(time::now());
        let mut recorded = Vec::with_capacity(entries.len());

        let mut tx = self.pool.begin().await?;
        for (tracking_no, path) in entries {
            let key = normalize_tracking(tracking_no);
            if key.is_empty() {
                continue;
            }
            files::upsert_file(&mut tx, &key, &path.to_string_lossy(), &stamp).await?;
            recorded.push(key);
        }
        tx.commit().await?;

        if !recorded.is_empty() {
            self.bump_version().await?;
        }
        Ok(recorded)
    }

    /// Current version token, created on first read
    pub async fn current_version(&self) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        if let Some(version) = meta::get_meta(&mut conn, meta::MAPPING_VERSION_KEY).await? {
            return Ok(version);
        }
        drop(conn);

        let _guard = self.version_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        if let Some(version) = meta::get_meta(&mut conn, meta::MAPPING_VERSION_KEY).await? {
            return Ok(version);
        }
        let version = time::to_iso_seconds(time::now());
        meta::set_meta(&mut conn, meta::MAPPING_VERSION_KEY, &version).await?;
        Ok(version)
    }

    /// Replace the version token and rewrite the snapshot file
    pub async fn bump_version(&self) -> Result<String> {
        let _guard = self.version_lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        let previous = meta::get_meta(&mut conn, meta::MAPPING_VERSION_KEY).await?;
        let version = next_version(previous.as_deref(), time::now());
        meta::set_meta(&mut conn, meta::MAPPING_VERSION_KEY, &version).await?;
        drop(conn);

        debug!(version = %version, "Mapping version bumped");

        match self.build_snapshot(version.clone()).await {
            Ok(snapshot) => {
                if let Err(e) = write_snapshot_file(&self.snapshot_path, &snapshot).await {
                    warn!(
                        path = %self.snapshot_path.display(),
                        error = %e,
                        "Failed to write mapping snapshot file"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to build mapping snapshot for file"),
        }

        Ok(version)
    }

    /// Merged view of mappings and files under the current version
    pub async fn snapshot(&self) -> Result<MappingSnapshot> {
        let version = self.current_version().await?;
        self.build_snapshot(version).await
    }

    async fn build_snapshot(&self, version: String) -> Result<MappingSnapshot> {
        let mapping_rows = mappings::list_mappings(&self.pool).await?;
        let file_rows = files::list_files(&self.pool).await?;
        Ok(MappingSnapshot {
            version,
            mappings: merge_rows(mapping_rows, file_rows),
        })
    }

    /// Mapping for an exact order id; blank ids match nothing
    pub async fn lookup(&self, order_id: &str) -> Result<Option<MappingEntry>> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Ok(None);
        }
        Ok(mappings::get_mapping(&self.pool, order_id)
            .await?
            .map(|row| MappingEntry {
                order_id: row.order_id,
                tracking_no: row.tracking_no,
                updated_at: render_timestamp(&row.updated_at),
            }))
    }

    /// Compare mapped tracking numbers with the `*.pdf` stems in `labels_dir`
    pub async fn alignment(&self, labels_dir: &Path) -> Result<AlignmentReport> {
        let mapping_rows = mappings::list_mappings(&self.pool).await?;
        let mapped: BTreeSet<String> = mapping_rows
            .iter()
            .map(|row| normalize_tracking(&row.tracking_no))
            .filter(|key| !key.is_empty())
            .collect();

        let mut on_disk = BTreeSet::new();
        if labels_dir.is_dir() {
            let mut dir = tokio::fs::read_dir(labels_dir).await?;
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    on_disk.insert(stem.to_string());
                }
            }
        }

        let report = AlignmentReport {
            mapping_total: mapping_rows.len(),
            file_total: on_disk.len(),
            missing_file: mapped.difference(&on_disk).cloned().collect(),
            orphan_file: on_disk.difference(&mapped).cloned().collect(),
        };
        debug!(
            missing = report.missing_file.len(),
            orphans = report.orphan_file.len(),
            "Alignment scan finished"
        );
        Ok(report)
    }

    /// Delete rows older than the given number of days (0 disables)
    ///
    /// Label files belonging to deleted file rows are removed from disk.
    pub async fn sweep_expired(&self, orders_days: u32, files_days: u32) -> Result<SweepStats> {
        let now = time::now();
        let mut stats = SweepStats::default();

        let mut tx = self.pool.begin().await?;
        if orders_days > 0 {
            let cutoff = time::to_db_timestamp(now - Duration::days(i64::from(orders_days)));
            stats.orders_deleted = mappings::delete_mappings_before(&mut tx, &cutoff).await?;
        }

        let mut doomed = Vec::new();
        if files_days > 0 {
            let cutoff = time::to_db_timestamp(now - Duration::days(i64::from(files_days)));
            doomed = files::files_uploaded_before(&mut tx, &cutoff).await?;
            for row in &doomed {
                if files::delete_file(&mut tx, &row.tracking_no).await? {
                    stats.files_deleted += 1;
                }
            }
        }
        tx.commit().await?;

        remove_label_files(&doomed).await;

        if stats.orders_deleted > 0 || stats.files_deleted > 0 {
            info!(
                orders = stats.orders_deleted,
                files = stats.files_deleted,
                "Retention sweep removed expired rows"
            );
            self.bump_version().await?;
        }
        Ok(stats)
    }

    /// Delete mappings whose order id or tracking number contains `filter`
    pub async fn purge_orders(&self, filter: &str) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let deleted = mappings::purge_mappings(&mut conn, filter.trim()).await?;
        drop(conn);

        if deleted > 0 {
            self.bump_version().await?;
        }
        Ok(deleted)
    }

    /// Delete file rows (and label files) whose tracking number contains `filter`
    pub async fn purge_files(&self, filter: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let doomed = files::files_matching(&mut tx, filter.trim()).await?;
        let mut deleted = 0;
        for row in &doomed {
            if files::delete_file(&mut tx, &row.tracking_no).await? {
                deleted += 1;
            }
        }
        tx.commit().await?;

        remove_label_files(&doomed).await;

        if deleted > 0 {
            self.bump_version().await?;
        }
        Ok(deleted)
    }
}

/// Next token after `previous`: now at second resolution, or previous + 1 s
/// when the clock has not moved past it.
fn next_version(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let now = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
    let previous = previous.and_then(|p| time::from_db_timestamp(p).ok());

    let next = match previous {
        Some(prev) if now <= prev => prev + Duration::seconds(1),
        _ => now,
    };
    time::to_iso_seconds(next)
}

/// Merge mapping rows with file rows
///
/// Mapping rows keep their order; each takes the later of its own timestamp
/// and the matching file's upload time. Files with no mapping follow with an
/// empty order id.
fn merge_rows(mapping_rows: Vec<mappings::OrderMapping>, file_rows: Vec<TrackingFile>) -> Vec<MappingEntry> {
    let files_by_key: HashMap<&str, &TrackingFile> = file_rows
        .iter()
        .map(|f| (f.tracking_no.as_str(), f))
        .collect();
    let mut mapped: HashSet<&str> = HashSet::with_capacity(mapping_rows.len());

    let mut entries = Vec::with_capacity(mapping_rows.len() + file_rows.len());
    for row in &mapping_rows {
        let updated_at = match files_by_key.get(row.tracking_no.as_str()) {
            Some(file) if file.uploaded_at > row.updated_at => file.uploaded_at.as_str(),
            _ => row.updated_at.as_str(),
        };
        mapped.insert(row.tracking_no.as_str());
        entries.push(MappingEntry {
            order_id: row.order_id.clone(),
            tracking_no: row.tracking_no.clone(),
            updated_at: render_timestamp(updated_at),
        });
    }

    for file in &file_rows {
        if mapped.contains(file.tracking_no.as_str()) {
            continue;
        }
        entries.push(MappingEntry {
            order_id: String::new(),
            tracking_no: file.tracking_no.clone(),
            updated_at: render_timestamp(&file.uploaded_at),
        });
    }
    entries
}

fn render_timestamp(stored: &str) -> String {
    time::from_db_timestamp(stored)
        .map(time::to_iso_seconds)
        .unwrap_or_else(|_| stored.to_string())
}

async fn write_snapshot_file(path: &Path, snapshot: &MappingSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_label_files(rows: &[TrackingFile]) {
    for row in rows {
        if row.file_path.is_empty() {
            continue;
        }
        match tokio::fs::remove_file(&row.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %row.file_path, error = %e, "Failed to remove label file"),
        }
    }
}
