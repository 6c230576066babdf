//! Resumable, cache-aware file delivery
//!
//! Serves bundles and single label files with a weak ETag, a SHA-256
//! checksum header, conditional GET, HEAD and single-range requests.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use labelsync_common::normalize_tracking;
use labelsync_common::tracking::is_canonical;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::io::{self, Read, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::db::files;
use crate::services::archive_builder::modified_secs;

/// Block size for hashing and streaming
pub const STREAM_CHUNK_SIZE: usize = 1024 * 1024;

pub const CONTENT_TYPE_ZIP: &str = "application/zip";
pub const CONTENT_TYPE_PDF: &str = "application/pdf";

static X_CHECKSUM_SHA256: HeaderName = HeaderName::from_static("x-checksum-sha256");
static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Size, mtime and validator of a file about to be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: i64,
    pub etag: String,
}

impl FileMeta {
    pub async fn read(path: &Path) -> io::Result<Self> {
        Ok(Self::from_metadata(&tokio::fs::metadata(path).await?))
    }

    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let modified = modified_secs(meta);
        Self {
            size: meta.len(),
            modified,
            etag: weak_etag(modified, meta.len()),
        }
    }
}

/// `W/"{mtime}-{size}"`
pub fn weak_etag(modified_secs: i64, size: u64) -> String {
    format!("W/\"{}-{}\"", modified_secs, size)
}

/// SHA-256 hex of a file, read in [`STREAM_CHUNK_SIZE`] blocks
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    sha256_open_file(tokio::fs::File::open(path).await?).await
}

/// SHA-256 hex of everything from the handle's current offset to EOF
///
/// Consumes the handle; pass a `try_clone` to keep reading the same file.
async fn sha256_open_file(file: tokio::fs::File) -> io::Result<String> {
    let mut file = file.into_std().await;
    tokio::task::spawn_blocking(move || {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok::<_, io::Error>(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(io::Error::other)?
}

/// Parse a `Range` header against a file of `size` bytes
///
/// Only a single `bytes=` range is honoured. Returns the inclusive byte span,
/// or `None` when the header is absent, malformed, multi-range or
/// unsatisfiable (the caller then sends the whole file).
pub fn parse_range(value: &str, size: u64) -> Option<(u64, u64)> {
    let value = value.trim();
    let (unit, spec) = (value.get(..6)?, value.get(6..)?);
    if size == 0 || !unit.eq_ignore_ascii_case("bytes=") {
        return None;
    }
    let spec = spec.trim();
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;
    let (start_s, end_s) = (start_s.trim(), end_s.trim());

    if start_s.is_empty() {
        let suffix: u64 = end_s.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix), size - 1));
    }

    let start: u64 = start_s.parse().ok()?;
    let end: u64 = if end_s.is_empty() {
        size - 1
    } else {
        end_s.parse().ok()?
    };
    if start > end || start >= size {
        return None;
    }
    Some((start, end.min(size - 1)))
}

/// Build the response for `path` following the request's method and headers
///
/// Validators, checksum and body all come from one open handle, so a bundle
/// renamed into place mid-request cannot mix two files in one response.
pub async fn serve_file(
    path: &Path,
    content_type: &'static str,
    method: &Method,
    request_headers: &HeaderMap,
) -> io::Result<Response> {
    let mut file = tokio::fs::File::open(path).await?;
    let meta = FileMeta::from_metadata(&file.metadata().await?);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, header_value(&meta.etag));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(X_ACCEL_BUFFERING.clone(), HeaderValue::from_static("no"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!("attachment; filename=\"{}\"", sanitize_filename(&file_name))),
    );

    let range_header = header_str(request_headers, &header::RANGE);
    let if_none_match = header_str(request_headers, &header::IF_NONE_MATCH);

    // Revalidation short-circuit; the checksum is not needed for 304
    if range_header.is_none() && *method != Method::HEAD && if_none_match == Some(meta.etag.as_str()) {
        debug!(path = %path.display(), "Not modified");
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    // The clone shares the file offset; rewind before streaming
    let checksum = sha256_open_file(file.try_clone().await?).await?;
    file.seek(SeekFrom::Start(0)).await?;
    headers.insert(X_CHECKSUM_SHA256.clone(), header_value(&checksum));

    if *method == Method::HEAD {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
        return Ok((StatusCode::OK, headers).into_response());
    }

    let mut range = range_header.and_then(|r| parse_range(r, meta.size));
    if let Some(if_range) = header_str(request_headers, &header::IF_RANGE) {
        if if_range != meta.etag {
            range = None;
        }
    }

    match range {
        Some((start, end)) => {
            let length = end - start + 1;
            file.seek(SeekFrom::Start(start)).await?;
            let stream = ReaderStream::with_capacity(file.take(length), STREAM_CHUNK_SIZE);

            headers.insert(
                header::CONTENT_RANGE,
                header_value(&format!("bytes {}-{}/{}", start, end, meta.size)),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            debug!(path = %path.display(), start, end, "Serving partial content");
            Ok((StatusCode::PARTIAL_CONTENT, headers, Body::from_stream(stream)).into_response())
        }
        None => {
            let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
            Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
        }
    }
}

/// Find the label file for a requested tracking number
///
/// Tries `{raw}.pdf`, then `{canonical}.pdf`, then the recorded path, then a
/// case-insensitive match in the labels directory.
pub async fn locate_label(
    pool: &SqlitePool,
    labels_dir: &Path,
    requested: &str,
) -> labelsync_common::Result<Option<PathBuf>> {
    let raw = requested.trim();
    let key = normalize_tracking(raw);

    // A canonical request is covered by the key lookup below
    if is_plain_file_name(raw) && !is_canonical(raw) {
        let candidate = labels_dir.join(format!("{}.pdf", raw));
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
    }

    if !key.is_empty() {
        let candidate = labels_dir.join(format!("{}.pdf", key));
        if candidate.is_file() {
            return Ok(Some(candidate));
        }

        if let Some(row) = files::get_file(pool, &key).await? {
            let recorded = PathBuf::from(&row.file_path);
            if recorded.is_file() {
                return Ok(Some(recorded));
            }
        }
    }

    if raw.is_empty() || !labels_dir.is_dir() {
        return Ok(None);
    }
    let wanted = format!("{}.pdf", raw).to_lowercase();
    let mut dir = tokio::fs::read_dir(labels_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        if entry.file_name().to_string_lossy().to_lowercase() == wanted {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// True when `name` is a single normal path component
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect()
}
