//! labelsync-server library
//!
//! Distributes shipping-label files and the order → tracking number mapping
//! to client installations that poll with a six digit access code.
//!
//! Exposes the router and state for integration testing.

use axum::Router;
use chrono::{DateTime, Utc};
use labelsync_common::config::{RetentionConfig, RootFolderInitializer, TomlConfig};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use crate::services::{AccessAuthenticator, ArchiveBuilder, MappingStore, ProgressRegistry};

/// Application state shared across handlers and background jobs
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Paths beneath the root folder
    pub layout: RootFolderInitializer,
    pub store: MappingStore,
    pub archives: ArchiveBuilder,
    pub progress: ProgressRegistry,
    pub auth: AccessAuthenticator,
    /// Bearer token for `/admin` routes; admin routes are open when `None`
    pub admin_token: Option<Arc<str>>,
    /// Client build advertised on `/api/v1/version`
    pub client_recommend: Arc<str>,
    pub retention: RetentionConfig,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, layout: RootFolderInitializer, config: &TomlConfig) -> Self {
        let store = MappingStore::new(db.clone(), layout.snapshot_path());
        let archives = ArchiveBuilder::new(db.clone(), layout.archive_dir());
        let auth = AccessAuthenticator::new(db.clone());

        Self {
            db,
            layout,
            store,
            archives,
            progress: ProgressRegistry::new(),
            auth,
            admin_token: config
                .admin_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(Arc::from),
            client_recommend: Arc::from(config.client_recommend.as_deref().unwrap_or_default()),
            retention: config.retention,
            startup_time: Utc::now(),
        }
    }

    /// Replace the progress registry (tests use short timings)
    pub fn with_progress(mut self, progress: ProgressRegistry) -> Self {
        self.progress = progress;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::client_routes(state.clone()))
        .merge(api::admin_routes(state.clone()))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
