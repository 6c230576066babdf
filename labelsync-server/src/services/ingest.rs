//! Background ingest jobs
//!
//! Each job reports through one progress record and finishes it with either
//! `done` (ok) or `error` (ok = false). Handlers spawn these with
//! `tokio::spawn` and return the progress id immediately.

use axum::body::Body;
use chrono::NaiveDate;
use futures::StreamExt;
use labelsync_common::{normalize_tracking, time};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::services::archive_builder::{ArchiveBuilder, ArchiveError, BuildProgress};
use crate::services::mapping_store::{ImportRow, MappingStore};
use crate::services::progress::{ProgressRegistry, ProgressUpdate};

/// Copy buffer for label extraction
const EXTRACT_CHUNK_SIZE: usize = 256 * 1024;

/// Upload progress stops here until extraction starts
const UPLOAD_PERCENT_CAP: i64 = 95;

/// Labels pulled out of an uploaded archive
#[derive(Debug, Default)]
pub struct ExtractedLabels {
    /// `(canonical key, stored path)` in archive order
    pub saved: Vec<(String, PathBuf)>,
    /// PDF entries whose name normalizes to nothing
    pub skipped: usize,
}

fn percent_of(done: u64, total: u64) -> i64 {
    (done.saturating_mul(100) / total.max(1)) as i64
}

/// Progress callback that maps bundle builds onto a progress record
pub fn repackaging_progress(progress: ProgressRegistry, id: String) -> BuildProgress {
    Box::new(move |index, total, tracking_no| {
        progress.mutate(
            &id,
            ProgressUpdate::stage("repackaging")
                .percent(percent_of(index as u64, total as u64))
                .note(tracking_no),
        );
    })
}

/// Import order rows in batches
pub async fn run_order_import(
    store: MappingStore,
    progress: ProgressRegistry,
    id: String,
    rows: Vec<ImportRow>,
) {
    let total = rows.len();
    progress.mutate(
        &id,
        ProgressUpdate::stage("writing").percent(0).note(format!("0/{}", total)),
    );

    let result = store
        .upsert_batch(&rows, |done, total| {
            progress.mutate(
                &id,
                ProgressUpdate::stage("writing")
                    .percent(percent_of(done as u64, total as u64))
                    .note(format!("{}/{}", done, total)),
            );
        })
        .await;

    match result {
        Ok(stats) => {
            progress.mutate(
                &id,
                ProgressUpdate::stage("done").finished().note(format!(
                    "{} rows written, {} skipped",
                    stats.written(),
                    stats.skipped
                )),
            );
        }
        Err(e) => {
            error!(progress_id = %id, error = %e, "Order import failed");
            progress.mutate(&id, ProgressUpdate::stage("error").failed().note(e.to_string()));
        }
    }
}

/// Stream a request body to `dest`, reporting upload progress
///
/// Percent is capped below 100 because extraction still has to run.
pub async fn receive_upload(
    body: Body,
    dest: &Path,
    expected_len: Option<u64>,
    progress: &ProgressRegistry,
    id: &str,
) -> io::Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = body.into_data_stream();
    let mut received: u64 = 0;
    let mut percent: i64 = 0;

    progress.mutate(id, ProgressUpdate::stage("uploading").percent(0));

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(io::Error::other)?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        percent = match expected_len.filter(|len| *len > 0) {
            Some(len) => percent_of(received, len).min(UPLOAD_PERCENT_CAP),
            None => (percent + 1).min(UPLOAD_PERCENT_CAP),
        };
        progress.mutate(
            id,
            ProgressUpdate::stage("uploading")
                .percent(percent)
                .note(format!("{}MB", received / (1024 * 1024))),
        );
    }
    file.flush().await?;
    Ok(received)
}

/// Extract, record and repackage an uploaded label archive
///
/// The uploaded file is removed when the job ends.
pub async fn run_label_upload(
    store: MappingStore,
    archives: ArchiveBuilder,
    progress: ProgressRegistry,
    id: String,
    upload: PathBuf,
    labels_dir: PathBuf,
) {
    let outcome = label_upload_steps(&store, &archives, &progress, &id, &upload, labels_dir).await;

    if let Err(e) = tokio::fs::remove_file(&upload).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %upload.display(), error = %e, "Failed to remove upload staging file");
        }
    }

    match outcome {
        Ok((saved, skipped)) => {
            info!(progress_id = %id, saved, skipped, "Label upload processed");
            progress.mutate(
                &id,
                ProgressUpdate::stage("done")
                    .finished()
                    .note(format!("{} imported, {} skipped", saved, skipped)),
            );
        }
        Err(e) => {
            error!(progress_id = %id, error = %e, "Label upload failed");
            progress.mutate(&id, ProgressUpdate::stage("error").failed().note(e.to_string()));
        }
    }
}

async fn label_upload_steps(
    store: &MappingStore,
    archives: &ArchiveBuilder,
    progress: &ProgressRegistry,
    id: &str,
    upload: &Path,
    labels_dir: PathBuf,
) -> anyhow::Result<(usize, usize)> {
    progress.mutate(id, ProgressUpdate::stage("extracting").percent(0).note("scanning..."));

    let extracted = tokio::task::spawn_blocking({
        let upload = upload.to_path_buf();
        let progress = progress.clone();
        let id = id.to_string();
        move || {
            extract_labels(&upload, &labels_dir, |done, total, key| {
                progress.mutate(
                    &id,
                    ProgressUpdate::stage("extracting")
                        .percent(percent_of(done, total).min(99))
                        .note(key),
                );
            })
        }
    })
    .await??;

    let saved = store.record_files(&extracted.saved).await?.len();

    archives
        .build(
            time::today(),
            Some(repackaging_progress(progress.clone(), id.to_string())),
        )
        .await?;

    Ok((saved, extracted.skipped))
}

/// Pull every `*.pdf` entry out of a ZIP into `labels_dir/{key}.pdf`
///
/// The key is the normalized file stem. `on_progress(bytes_done,
/// bytes_total, key)` runs after each copied chunk.
pub fn extract_labels<F>(
    archive_path: &Path,
    labels_dir: &Path,
    mut on_progress: F,
) -> Result<ExtractedLabels, ArchiveError>
where
    F: FnMut(u64, u64, &str),
{
    std::fs::create_dir_all(labels_dir)?;
    let mut archive = zip::ZipArchive::new(File::open(archive_path)?)?;

    let mut pdf_entries = Vec::new();
    let mut total_bytes: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        if let Some(stem) = pdf_stem(entry.name()) {
            total_bytes += entry.size();
            pdf_entries.push((index, stem.to_string()));
        }
    }

    let mut result = ExtractedLabels::default();
    let mut done_bytes: u64 = 0;
    let mut buf = vec![0u8; EXTRACT_CHUNK_SIZE];

    for (index, stem) in pdf_entries {
        let key = normalize_tracking(&stem);
        if key.is_empty() {
            result.skipped += 1;
            continue;
        }

        let mut entry = archive.by_index(index)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".label-")
            .suffix(".tmp")
            .tempfile_in(labels_dir)?;
        loop {
            let n = match entry.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            tmp.write_all(&buf[..n])?;
            done_bytes += n as u64;
            on_progress(done_bytes, total_bytes, &key);
        }

        let target = labels_dir.join(format!("{}.pdf", key));
        tmp.persist(&target).map_err(|e| e.error)?;
        result.saved.push((key, target));
    }

    Ok(result)
}

/// Stem of a `.pdf` entry name (case-insensitive extension), basename only
fn pdf_stem(entry_name: &str) -> Option<&str> {
    let base = entry_name.rsplit(['/', '\\']).next().unwrap_or(entry_name);
    let split = base.len().checked_sub(4)?;
    let (stem, ext) = (base.get(..split)?, base.get(split..)?);
    (!stem.is_empty() && ext.eq_ignore_ascii_case(".pdf")).then_some(stem)
}

/// Store one label file and record it
///
/// Returns the canonical key, or `None` when the tracking number
/// normalizes to nothing.
pub async fn store_label(
    store: &MappingStore,
    labels_dir: &Path,
    tracking_no: &str,
    contents: &[u8],
) -> labelsync_common::Result<Option<String>> {
    let key = normalize_tracking(tracking_no);
    if key.is_empty() {
        return Ok(None);
    }

    tokio::fs::create_dir_all(labels_dir).await?;
    let target = labels_dir.join(format!("{}.pdf", key));
    let tmp = labels_dir.join(format!(".{}.pdf.tmp", key));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, &target).await?;

    store.record_file(&key, &target).await
}

/// Rebuild a day's bundle, reporting through a progress record
pub async fn run_rebuild(archives: ArchiveBuilder, progress: ProgressRegistry, id: String, day: NaiveDate) {
    progress.mutate(
        &id,
        ProgressUpdate::stage("repackaging")
            .percent(0)
            .note(time::dashed_day(day)),
    );

    match archives
        .build(day, Some(repackaging_progress(progress.clone(), id.clone())))
        .await
    {
        Ok(report) => {
            let note = if report.built {
                format!("{} entries, {} skipped", report.entries, report.skipped)
            } else {
                "no uploads for this day".to_string()
            };
            progress.mutate(&id, ProgressUpdate::stage("done").finished().note(note));
        }
        Err(e) => {
            error!(progress_id = %id, day = %day, error = %e, "Bundle rebuild failed");
            progress.mutate(&id, ProgressUpdate::stage("error").failed().note(e.to_string()));
        }
    }
}
