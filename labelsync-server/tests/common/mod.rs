//! Shared helpers for labelsync-server integration tests
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use labelsync_common::config::{RootFolderInitializer, TomlConfig};
use labelsync_common::db::init_database;
use labelsync_server::services::ProgressRegistry;
use labelsync_server::{build_router, AppState};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

/// Access code created by [`TestApp::with_client`]
pub const CODE: &str = "123456";

/// App state over a throwaway root folder
pub struct TestApp {
    pub root: TempDir,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(TomlConfig::default()).await
    }

    pub async fn with_config(config: TomlConfig) -> Self {
        let root = tempfile::tempdir().expect("Should create temp root");
        let layout = RootFolderInitializer::new(root.path().to_path_buf());
        layout.ensure_directory_exists().expect("Should create layout");

        let pool = init_database(&layout.database_path())
            .await
            .expect("Should open test database");

        // Short poll interval keeps SSE tests fast
        let progress = ProgressRegistry::with_timing(Duration::from_secs(600), Duration::from_millis(20));
        let state = AppState::new(pool, layout, &config).with_progress(progress);

        Self { root, state }
    }

    /// Same as [`TestApp::new`] with one active credential for [`CODE`]
    pub async fn with_client() -> Self {
        let app = Self::new().await;
        app.state
            .auth
            .create(CODE, "test client")
            .await
            .expect("Should create credential");
        app
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.expect("Router should respond")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(request("GET", uri)).await
    }

    /// Store a label as if it had been uploaded now
    pub async fn put_label(&self, tracking_no: &str, contents: &[u8]) -> String {
        labelsync_server::services::ingest::store_label(
            &self.state.store,
            &self.state.layout.labels_dir(),
            tracking_no,
            contents,
        )
        .await
        .expect("Should store label")
        .expect("Tracking number should be usable")
    }

    /// Poll a progress record until it is done
    pub async fn wait_done(&self, id: &str) -> labelsync_server::services::ProgressRecord {
        for _ in 0..500 {
            if let Some(record) = self.state.progress.read(id) {
                if record.done {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("progress {} never finished", id);
    }
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("Should parse JSON")
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

/// In-memory ZIP with the given `(entry name, contents)` pairs
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Sorted entry names of a ZIP
pub fn zip_entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("Should be a ZIP");
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

/// `(entry name, uncompressed size)` pairs of a ZIP, sorted by name
pub fn zip_entry_sizes(bytes: &[u8]) -> Vec<(String, u64)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("Should be a ZIP");
    let mut entries: Vec<(String, u64)> = (0..archive.len())
        .map(|i| {
            let entry = archive.by_index(i).expect("Should read entry");
            (entry.name().to_string(), entry.size())
        })
        .collect();
    entries.sort();
    entries
}
