//! Per-day label archives
//!
//! A bundle `archives/pdfs-YYYYMMDD.zip` holds every label file uploaded on
//! that UTC day, one `{tracking_no}.pdf` entry per row. Bundles are written
//! to a temporary file in the archive directory and renamed into place, so
//! readers only ever see a complete archive.
//!
//! Builds for the same day are serialized by a per-day async mutex; `ensure`
//! re-checks the cache after taking it so concurrent first requests trigger a
//! single build.

use chrono::NaiveDate;
use labelsync_common::{normalize_tracking, time};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::db::{files, TrackingFile};

/// Block size used when copying label files into a bundle
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

const BUNDLE_PREFIX: &str = "pdfs-";
const BUNDLE_SUFFIX: &str = ".zip";

/// Progress callback: `(index, total, tracking_no)` after each row
pub type BuildProgress = Box<dyn FnMut(usize, usize, &str) + Send>;

/// Archive build errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] labelsync_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Build task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub day: NaiveDate,
    pub path: PathBuf,
    /// Label files written into the bundle
    pub entries: usize,
    /// Rows whose source file was missing or unreadable
    pub skipped: usize,
    /// False when the day had no rows and no bundle exists
    pub built: bool,
}

/// One day in the bundle listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRecord {
    /// `YYYY-MM-DD`
    pub date: String,
    pub name: String,
    pub size: u64,
    /// Unix seconds; 0 when not built
    pub modified: i64,
    pub built: bool,
}

/// Builds and locates per-day bundles (cheap to clone)
#[derive(Clone)]
pub struct ArchiveBuilder {
    pool: SqlitePool,
    archive_dir: PathBuf,
    day_locks: Arc<Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>>,
}

impl ArchiveBuilder {
    pub fn new(pool: SqlitePool, archive_dir: PathBuf) -> Self {
        Self {
            pool,
            archive_dir,
            day_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Canonical bundle path for a day
    pub fn archive_path(&self, day: NaiveDate) -> PathBuf {
        self.archive_dir.join(bundle_name(day))
    }

    /// Bundle already on disk for a day, canonical name first
    pub fn existing_bundle(&self, day: NaiveDate) -> Option<PathBuf> {
        let canonical = self.archive_path(day);
        if canonical.is_file() {
            return Some(canonical);
        }
        let legacy = self.legacy_path(day);
        legacy.is_file().then_some(legacy)
    }

    /// Dashed `pdfs-YYYY-MM-DD.zip` name written by older deployments
    fn legacy_path(&self, day: NaiveDate) -> PathBuf {
        self.archive_dir.join(format!(
            "{}{}{}",
            BUNDLE_PREFIX,
            time::dashed_day(day),
            BUNDLE_SUFFIX
        ))
    }

    async fn day_lock(&self, day: NaiveDate) -> Arc<Mutex<()>> {
        let mut locks = self.day_locks.lock().await;
        Arc::clone(locks.entry(day).or_default())
    }

    /// Drop the day's lock entry once no other task holds or awaits it
    ///
    /// Clones are only handed out under the map lock, so a count of 2 (map
    /// plus `lock`) cannot grow while we decide.
    async fn release_day_lock(&self, day: NaiveDate, lock: Arc<Mutex<()>>) {
        let mut locks = self.day_locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&day);
        }
    }

    /// Days with a live build lock
    pub async fn locked_days(&self) -> usize {
        self.day_locks.lock().await.len()
    }

    /// Rebuild the bundle for `day` from the current rows
    pub async fn build(
        &self,
        day: NaiveDate,
        on_progress: Option<BuildProgress>,
    ) -> Result<BuildReport, ArchiveError> {
        let lock = self.day_lock(day).await;
        let result = {
            let _guard = lock.lock().await;
            self.build_locked(day, on_progress).await
        };
        self.release_day_lock(day, lock).await;
        result
    }

    /// Bundle for `day`, building it if absent
    ///
    /// Returns `None` when the day has no uploads.
    pub async fn ensure(&self, day: NaiveDate) -> Result<Option<PathBuf>, ArchiveError> {
        if let Some(path) = self.existing_bundle(day) {
            return Ok(Some(path));
        }

        let lock = self.day_lock(day).await;
        let result = {
            let _guard = lock.lock().await;

            // Another request may have finished the build while we waited
            match self.existing_bundle(day) {
                Some(path) => Ok(Some(path)),
                None => self
                    .build_locked(day, None)
                    .await
                    .map(|report| report.built.then_some(report.path)),
            }
        };
        self.release_day_lock(day, lock).await;
        result
    }

    async fn build_locked(
        &self,
        day: NaiveDate,
        on_progress: Option<BuildProgress>,
    ) -> Result<BuildReport, ArchiveError> {
        let (start, end) = time::day_bounds(day);
        let rows = files::files_uploaded_between(
            &self.pool,
            &time::to_db_timestamp(start),
            &time::to_db_timestamp(end),
        )
        .await?;
        let target = self.archive_path(day);

        if rows.is_empty() {
            for stale in [target.clone(), self.legacy_path(day)] {
                if remove_if_present(&stale).await? {
                    info!(day = %day, path = %stale.display(), "Removed stale bundle for day with no uploads");
                }
            }
            debug!(day = %day, "No uploads; nothing to bundle");
            return Ok(BuildReport {
                day,
                path: target,
                entries: 0,
                skipped: 0,
                built: false,
            });
        }

        let started = std::time::Instant::now();
        let (entries, skipped) = tokio::task::spawn_blocking({
            let dir = self.archive_dir.clone();
            let target = target.clone();
            move || write_bundle(&dir, &target, &rows, on_progress)
        })
        .await??;

        // The fresh canonical bundle supersedes any dashed one
        if remove_if_present(&self.legacy_path(day)).await? {
            debug!(day = %day, "Removed legacy bundle");
        }

        info!(
            day = %day,
            entries,
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bundle built"
        );

        Ok(BuildReport {
            day,
            path: target,
            entries,
            skipped,
            built: true,
        })
    }

    /// Bundles on disk merged with upload days, newest first
    ///
    /// Today's bundle is built first when today has uploads but no bundle.
    pub async fn list(&self) -> Result<Vec<ArchiveRecord>, ArchiveError> {
        let upload_days = files::upload_days(&self.pool).await?;
        let today = time::today();
        if upload_days.contains(&today) {
            self.ensure(today).await?;
        }

        let mut by_date: BTreeMap<String, ArchiveRecord> = BTreeMap::new();

        if self.archive_dir.is_dir() {
            let mut dir = tokio::fs::read_dir(&self.archive_dir).await?;
            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some(day) = day_from_bundle_name(&name) else {
                    continue;
                };
                let (size, modified) = match entry.metadata().await {
                    Ok(meta) => (meta.len(), modified_secs(&meta)),
                    Err(e) => {
                        warn!(name = %name, error = %e, "Cannot stat bundle");
                        (0, 0)
                    }
                };
                let record = ArchiveRecord {
                    date: time::dashed_day(day),
                    name: name.clone(),
                    size,
                    modified,
                    built: true,
                };
                // Canonical name wins over the dashed legacy name
                let canonical = name == bundle_name(day);
                match by_date.get(&record.date) {
                    Some(existing) if !canonical && existing.name == bundle_name(day) => {}
                    _ => {
                        by_date.insert(record.date.clone(), record);
                    }
                }
            }
        }

        for day in upload_days {
            by_date
                .entry(time::dashed_day(day))
                .or_insert_with(|| ArchiveRecord {
                    date: time::dashed_day(day),
                    name: bundle_name(day),
                    size: 0,
                    modified: 0,
                    built: false,
                });
        }

        Ok(by_date.into_values().rev().collect())
    }
}

/// Remove `path`; false when it was not there
async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// `pdfs-YYYYMMDD.zip`
pub fn bundle_name(day: NaiveDate) -> String {
    format!("{}{}{}", BUNDLE_PREFIX, time::compact_day(day), BUNDLE_SUFFIX)
}

/// Day encoded in a bundle file name (`YYYYMMDD` or `YYYY-MM-DD`)
pub fn day_from_bundle_name(name: &str) -> Option<NaiveDate> {
    let day = name.strip_prefix(BUNDLE_PREFIX)?.strip_suffix(BUNDLE_SUFFIX)?;
    time::parse_day(day).ok()
}

/// Modification time in whole unix seconds
pub fn modified_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Write the bundle through a temp file and rename it over `target`
fn write_bundle(
    dir: &Path,
    target: &Path,
    rows: &[TrackingFile],
    mut on_progress: Option<BuildProgress>,
) -> Result<(usize, usize), ArchiveError> {
    std::fs::create_dir_all(dir)?;

    // Dropped (and deleted) on every early return
    let tmp = tempfile::Builder::new()
        .prefix(".pdfs-")
        .suffix(".zip.tmp")
        .tempfile_in(dir)?;

    let mut entries = 0;
    let mut skipped = 0;
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let total = rows.len();

    {
        let mut writer = ZipWriter::new(tmp.as_file());
        for (index, row) in rows.iter().enumerate() {
            let key = normalize_tracking(&row.tracking_no);
            let entry_name = format!("{}.pdf", key);

            if key.is_empty() || row.file_path.is_empty() {
                skipped += 1;
            } else {
                match append_entry(&mut writer, Path::new(&row.file_path), entry_name, &mut buf) {
                    Ok(true) => entries += 1,
                    Ok(false) => skipped += 1,
                    Err(e) => return Err(e),
                }
            }

            if let Some(cb) = on_progress.as_mut() {
                cb(index + 1, total, &row.tracking_no);
            }
        }
        writer.finish()?;
    }
    tmp.as_file().sync_all()?;

    if let Err(err) = tmp.persist(target) {
        warn!(
            target = %target.display(),
            error = %err.error,
            "Rename over existing bundle failed; removing and retrying"
        );
        match std::fs::remove_file(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        err.file.persist(target).map_err(|e| e.error)?;
    }

    Ok((entries, skipped))
}

/// Copy one source file into the archive
///
/// Returns `Ok(false)` when the source is missing or unreadable; the partial
/// entry is discarded. Errors writing the archive itself abort the build.
fn append_entry<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    source: &Path,
    entry_name: String,
    buf: &mut [u8],
) -> Result<bool, ArchiveError> {
    let mut file = match File::open(source) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %source.display(), error = %e, "Skipping missing label file");
            return Ok(false);
        }
    };

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;

    loop {
        let n = match file.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Label file unreadable; skipping");
                writer.abort_file()?;
                return Ok(false);
            }
        };
        writer.write_all(&buf[..n])?;
    }
    Ok(true)
}
